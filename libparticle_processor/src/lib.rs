//! # particle_processor
//!
//! particle_processor converts particle distributions between the file formats of
//! accelerator simulation codes, written in Rust. It reads the output of OPAL, TraceWin,
//! COMSOL, IBSimu and Track into a single step-indexed data model, and writes that model
//! back out as OPAL, TraceWin, COMSOL or FreeCAD input.
//!
//! ## Installation
//!
//! The only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running particle_processor, HDF5 must be installed. Typically this
//! will be installed using a package manager (homebrew, apt, etc), and the Rust libraries
//! will auto detect the location of the HDF install. If a newer version was installed to
//! a custom location, write the following snippet into the file `.cargo/config.toml` in
//! the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./particle_processor_cli` from
//! the top level repository. See the `particle_processor_cli` README for usage.
//!
//! ## Data model
//!
//! Every driver produces an [`transfer::ImportedData`] record: a step-indexed datasource
//! plus the ion species, mass, charge, step and particle counts, and optionally the beam
//! current and reference energy. A [`dataset::Dataset`] wraps that record; a
//! [`particle_file::ParticleFile`] groups the datasets loaded from one file.
//!
//! Per step the datasource holds equal-length arrays for the fields
//! `x, y, z` (m), `px, py, pz` (βγ) and optionally `id`, `E` (MeV), `mass` and `q`.
//! Steps may shrink only when the `id` field identifies particles across steps. A particle
//! is considered lost at the first step where it is missing or its position is NaN.
//!
//! ## Configuration
//!
//! A conversion job is described by a YAML file:
//!
//! ```yml
//! input_path: beam.h5
//! input_driver: OPAL
//! output_path: beam.txt
//! output_driver: TraceWin
//! species: H2_1+
//! name: null
//! debug: false
//! drivers:
//!   tracewin:
//!     frequency_mhz: 32.8
//!   track:
//!     z_center: -0.25
//!     t_cut: 10.0
//!     t_split: -10.0
//!     e_mean_total: 0.07
//!     align_bunches: true
//!     rf_frequency_mhz: 32.8
//!   ibsimu:
//!     min_vz: 500000.0
//!     species_index: null
//!   freecad:
//!     trajectories: 1000
//!     step_stride: 5
//!     seed: null
//! ```
//!
//! `species` is required (one of `proton`, `H2_1+`, `4He_2+`, `H_1-`, `electron`). The
//! `drivers` block and each of its entries are optional.
//!
//! ## Output
//!
//! OPAL output follows the h5hut layout read by OPAL:
//!
//! ```text
//! beam.h5 - OPAL_version
//! |---- Step#0 - ENERGY
//! |    |---- x, y, z, px, py, pz(dset)
//! |    |---- id, mass, q(dset)
//! |---- Step#1 - ENERGY
//! ```
pub mod array_wrapper;
pub mod config;
pub mod constants;
pub mod datasource;
pub mod dataset;
pub mod drivers;
pub mod error;
pub mod h5_source;
pub mod hdf_writer;
pub mod kinematics;
pub mod particle_file;
pub mod process;
pub mod species;
pub mod transfer;
pub mod worker_status;
