//! Format drivers and the registry that dispatches to them.
//!
//! Every driver turns one external file format into an [`ImportedData`] record and,
//! where the format has a writer, serializes a [`Dataset`] back out. Drivers are
//! stateless apart from their settings block; failures are returned as [`DriverError`]
//! and logged once at the [`ImportExportDriver`] boundary.

pub mod comsol;
pub mod freecad;
pub mod ibsimu;
pub mod opal;
pub mod text;
pub mod track;
pub mod tracewin;

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::dataset::Dataset;
use super::error::{DriverError, RegistryError};
use super::species::IonSpecies;
use super::transfer::ImportedData;

use comsol::COMSOLDriver;
use freecad::{FreeCADDriver, FreeCADSettings};
use ibsimu::{IBSimuDriver, IBSimuSettings};
use opal::OPALDriver;
use track::{TrackDriver, TrackSettings};
use tracewin::{TraceWinDriver, TraceWinSettings};

/// Contract shared by all format drivers
pub trait Driver: std::fmt::Debug {
    fn program_name(&self) -> &'static str;

    /// Import a file. The species is required: drivers never guess one.
    fn import_data(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError>;

    /// Import every distribution the file holds. Most formats hold exactly one.
    fn import_all(
        &self,
        path: &Path,
        species: &IonSpecies,
    ) -> Result<Vec<ImportedData>, DriverError> {
        Ok(vec![self.import_data(path, species)?])
    }

    fn export_data(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError>;
}

/// A registry entry: a unique driver name and the file extensions it claims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverEntry {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
}

pub const DRIVER_MAPPING: [DriverEntry; 6] = [
    DriverEntry {
        name: "OPAL",
        extensions: &[".h5", ".dat"],
    },
    DriverEntry {
        name: "TraceWin",
        extensions: &[".txt", ".dat", ".dst"],
    },
    DriverEntry {
        name: "COMSOL",
        extensions: &[".txt"],
    },
    DriverEntry {
        name: "IBSimu",
        extensions: &[".txt"],
    },
    DriverEntry {
        name: "FreeCAD",
        extensions: &[".dat"],
    },
    DriverEntry {
        name: "Track",
        extensions: &[".txt", ".dat"],
    },
];

pub fn find_entry(name: &str) -> Option<&'static DriverEntry> {
    DRIVER_MAPPING.iter().find(|entry| entry.name == name)
}

impl DriverEntry {
    /// File picker filter string, e.g. `OPAL Files (*.h5 *.dat)`
    pub fn file_filter(&self) -> String {
        let patterns: Vec<String> = self
            .extensions
            .iter()
            .map(|ext| format!("*{ext}"))
            .collect();
        format!("{} Files ({})", self.name, patterns.join(" "))
    }
}

/// Filters for every registered driver, in registry order
pub fn file_filters() -> Vec<String> {
    DRIVER_MAPPING
        .iter()
        .map(|entry| entry.file_filter())
        .collect()
}

/// Per-driver settings. Every block is optional in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub tracewin: TraceWinSettings,
    pub track: TrackSettings,
    pub ibsimu: IBSimuSettings,
    pub freecad: FreeCADSettings,
}

fn build_driver(name: &str, settings: &DriverSettings) -> Result<Box<dyn Driver>, RegistryError> {
    let driver: Box<dyn Driver> = match name {
        "OPAL" => Box::new(OPALDriver),
        "TraceWin" => Box::new(TraceWinDriver::new(settings.tracewin.clone())),
        "COMSOL" => Box::new(COMSOLDriver),
        "IBSimu" => Box::new(IBSimuDriver::new(settings.ibsimu.clone())),
        "FreeCAD" => Box::new(FreeCADDriver::new(settings.freecad.clone())),
        "Track" => Box::new(TrackDriver::new(settings.track.clone())),
        _ => return Err(RegistryError::UnknownDriver(name.to_string())),
    };
    Ok(driver)
}

/// A thin wrapper around the drivers for importing and exporting particle data
#[derive(Debug)]
pub struct ImportExportDriver {
    driver_name: String,
    driver: Box<dyn Driver>,
}

impl ImportExportDriver {
    /// Look up a driver by its registry name. An unknown name is a configuration error.
    pub fn new(driver_name: &str, settings: &DriverSettings) -> Result<Self, RegistryError> {
        let driver = build_driver(driver_name, settings)?;
        Ok(Self {
            driver_name: driver_name.to_string(),
            driver,
        })
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn program_name(&self) -> &'static str {
        self.driver.program_name()
    }

    pub fn import_data(
        &self,
        path: &Path,
        species: &IonSpecies,
    ) -> Result<ImportedData, DriverError> {
        spdlog::info!(
            "Importing {} with the {} driver",
            path.display(),
            self.driver_name
        );
        self.driver.import_data(path, species).inspect_err(|e| {
            spdlog::error!(
                "Import of {} with the {} driver failed: {e}",
                path.display(),
                self.driver_name
            )
        })
    }

    pub fn import_all(
        &self,
        path: &Path,
        species: &IonSpecies,
    ) -> Result<Vec<ImportedData>, DriverError> {
        spdlog::info!(
            "Importing all distributions in {} with the {} driver",
            path.display(),
            self.driver_name
        );
        self.driver.import_all(path, species).inspect_err(|e| {
            spdlog::error!(
                "Import of {} with the {} driver failed: {e}",
                path.display(),
                self.driver_name
            )
        })
    }

    pub fn export_data(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        spdlog::info!(
            "Exporting to {} with the {} driver",
            path.display(),
            self.driver_name
        );
        self.driver.export_data(dataset, path).inspect_err(|e| {
            spdlog::error!(
                "Export to {} with the {} driver failed: {e}",
                path.display(),
                self.driver_name
            )
        })
    }
}
