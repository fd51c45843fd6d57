use std::io::Write;
use std::path::Path;

use super::text::{create_writer, extension, parse_row, read_text};
use super::Driver;
use crate::array_wrapper::ArrayWrapper;
use crate::dataset::Dataset;
use crate::datasource::{Field, MemorySource, StepData, StepSource};
use crate::error::DriverError;
use crate::h5_source::H5Source;
use crate::hdf_writer::{OpalWriter, OPAL_VERSION_ATTR};
use crate::species::IonSpecies;
use crate::transfer::ImportedData;

/// OPAL `h5hut` output (`.h5`) and the flat OPAL distribution format (`.dat`).
///
/// `.h5` imports stay on disk: the returned datasource is the open file.
#[derive(Debug, Clone, Copy, Default)]
pub struct OPALDriver;

impl OPALDriver {
    fn import_h5(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let source = H5Source::open(path)?;
        if !source.has_root_attr(OPAL_VERSION_ATTR) {
            return Err(DriverError::NotOpal(path.to_path_buf()));
        }
        spdlog::debug!("Found {} steps in {}", source.n_steps(), path.display());

        let particles = source
            .field(0, Field::X)?
            .map_or(0, |values| values.len());
        let mut ion = species.clone();
        let energy = source.step_energy(0)?;
        if let Some(energy) = energy {
            ion.calculate_from_total_energy_mev(energy);
        }

        let data = ImportedData::new(Box::new(source), ion, particles);
        Ok(match energy {
            Some(energy) => data.with_energy(energy),
            None => data,
        })
    }

    fn import_dat(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let contents = read_text(path)?;
        let mut lines = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let expected: usize = match lines.next() {
            Some((_, line)) => line.trim().parse()?,
            None => {
                return Err(DriverError::BadFormat {
                    line: 1,
                    reason: String::from("missing particle count"),
                })
            }
        };

        let mut columns: [Vec<f64>; 6] = Default::default();
        for (idx, line) in lines {
            let values = parse_row(line, idx + 1, 6)?;
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }
        let particles = columns[0].len();
        if particles != expected {
            spdlog::warn!(
                "{} declares {expected} particles but holds {particles}",
                path.display()
            );
        }

        // x px y py z pz, already in m and beta gamma
        let [x, px, y, py, z, pz] = columns;
        let step = StepData::from_fields([
            (Field::X, ArrayWrapper::from(x)),
            (Field::Px, ArrayWrapper::from(px)),
            (Field::Y, ArrayWrapper::from(y)),
            (Field::Py, ArrayWrapper::from(py)),
            (Field::Z, ArrayWrapper::from(z)),
            (Field::Pz, ArrayWrapper::from(pz)),
        ])?;
        let source = MemorySource::single(step)?;
        Ok(ImportedData::new(Box::new(source), species.clone(), particles).with_current(0.0))
    }

    fn export_h5(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        let source = dataset.datasource().ok_or(DriverError::EmptyDataset)?;
        let ion = dataset.ion();
        let mut writer = OpalWriter::new(path)?;
        for step in 0..source.n_steps() {
            let data = source.step(step)?;
            let energy = source
                .step_energy(step)?
                .unwrap_or_else(|| ion.total_energy_mev());
            writer.write_step(&data, ion, energy)?;
        }
        writer.close()
    }

    fn export_dat(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        let source = dataset.datasource().ok_or(DriverError::EmptyDataset)?;
        let step = if source.n_steps() > 1 {
            let step = dataset.current_step().unwrap_or(0);
            spdlog::warn!("The .dat format only supports one step, exporting step {step}");
            step
        } else {
            0
        };
        let data = source.step(step)?;
        data.validate_required()?;

        let mut outfile = create_writer(path)?;
        writeln!(outfile, "{}", data.len())?;
        let columns: Vec<&ArrayWrapper> = [Field::X, Field::Px, Field::Y, Field::Py, Field::Z, Field::Pz]
            .into_iter()
            .map(|field| data.require(field))
            .collect::<Result<_, _>>()?;
        for particle in 0..data.len() {
            let row: Vec<String> = columns
                .iter()
                .map(|column| column[particle].to_string())
                .collect();
            writeln!(outfile, "{}", row.join("  "))?;
        }
        outfile.flush()?;
        Ok(())
    }
}

impl Driver for OPALDriver {
    fn program_name(&self) -> &'static str {
        "OPAL"
    }

    fn import_data(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        match extension(path).as_deref() {
            Some("h5") => self.import_h5(path, species),
            Some("dat") => self.import_dat(path, species),
            _ => Err(DriverError::UnsupportedExtension(path.to_path_buf())),
        }
    }

    fn export_data(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        match extension(path).as_deref() {
            Some("h5") => self.export_h5(dataset, path),
            Some("dat") => self.export_dat(dataset, path),
            _ => Err(DriverError::UnsupportedExtension(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverSettings;
    use crate::kinematics::beta_gamma_from_kinetic;
    use approx::assert_relative_eq;
    use hdf5::File;
    use std::str::FromStr;

    fn write_opal_fixture(path: &Path, ion: &IonSpecies) {
        let mut writer = OpalWriter::new(path).unwrap();
        let bg = beta_gamma_from_kinetic(0.07, ion.mass_mev());
        for step in 0..3 {
            let shift = step as f64 * 1.0e-3;
            let data = StepData::from_fields([
                (Field::X, ArrayWrapper::from(vec![0.001 + shift, -0.002, 0.0035])),
                (Field::Y, ArrayWrapper::from(vec![0.0, 0.004, -0.001])),
                (Field::Z, ArrayWrapper::from(vec![0.1 * step as f64, 0.01, 0.02])),
                (Field::Px, ArrayWrapper::from(vec![1e-4, -2e-4, 3e-5])),
                (Field::Py, ArrayWrapper::from(vec![0.0, 1e-5, -1e-5])),
                (Field::Pz, ArrayWrapper::from(vec![bg, bg * 1.001, bg * 0.999])),
            ])
            .unwrap();
            writer.write_step(&data, ion, 0.07).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_h5_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.h5");
        let output = dir.path().join("output.h5");
        let ion = IonSpecies::from_str("H2_1+").unwrap();
        write_opal_fixture(&input, &ion);

        let mut dataset = Dataset::new(ion.clone());
        dataset
            .load_from_file(&input, "OPAL", "input", &DriverSettings::default())
            .unwrap();
        assert_eq!(dataset.steps(), 3);
        assert_eq!(dataset.particles(), 3);
        assert_relative_eq!(dataset.ion().total_energy_mev(), 0.07, max_relative = 1e-12);
        dataset
            .export_to_file(&output, "OPAL", &DriverSettings::default())
            .unwrap();

        let mut reloaded = Dataset::new(ion);
        reloaded
            .load_from_file(&output, "OPAL", "output", &DriverSettings::default())
            .unwrap();
        assert_eq!(reloaded.steps(), 3);
        for step in 0..3 {
            dataset.set_step_view(step).unwrap();
            reloaded.set_step_view(step).unwrap();
            for key in ["x", "y", "z", "px", "py", "pz"] {
                let original = dataset.get(key).unwrap();
                let copy = reloaded.get(key).unwrap();
                assert_eq!(original.len(), copy.len());
                for (a, b) in original.iter().zip(copy.iter()) {
                    assert_relative_eq!(*a, *b, max_relative = 1e-12);
                }
            }
        }
        dataset.close().unwrap();
        reloaded.close().unwrap();
    }

    #[test]
    fn test_h5_without_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.h5");
        let file = File::create(&path).unwrap();
        file.create_group("Step#0").unwrap();
        drop(file);

        let ion = IonSpecies::from_str("proton").unwrap();
        assert!(matches!(
            OPALDriver.import_data(&path, &ion),
            Err(DriverError::NotOpal(_))
        ));
    }

    #[test]
    fn test_dat_import_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.dat");
        std::fs::write(
            &path,
            "2\n0.001 0.0001 0.002 0.0002 0.0 0.0122\n-0.001 -0.0001 -0.002 -0.0002 0.001 0.0121\n",
        )
        .unwrap();
        let ion = IonSpecies::from_str("proton").unwrap();
        let data = OPALDriver.import_data(&path, &ion).unwrap();
        assert_eq!(data.steps, 1);
        assert_eq!(data.particles, 2);
        assert_eq!(data.current, Some(0.0));
        let step = data.datasource.step(0).unwrap();
        assert_eq!(step.get(Field::Py).unwrap().to_vec(), vec![0.0002, -0.0002]);

        let mut dataset = Dataset::from_imported(data, "dist");
        let out = dir.path().join("copy.dat");
        OPALDriver.export_data(&dataset, &out).unwrap();
        let copy = OPALDriver.import_data(&out, &ion).unwrap();
        assert_eq!(copy.datasource.step(0).unwrap(), step);
        dataset.close().unwrap();
    }

    #[test]
    fn test_unsupported_extension() {
        let ion = IonSpecies::from_str("proton").unwrap();
        assert!(matches!(
            OPALDriver.import_data(Path::new("beam.csv"), &ion),
            Err(DriverError::UnsupportedExtension(_))
        ));
    }
}
