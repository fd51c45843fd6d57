use hdf5::types::VarLenUnicode;
use hdf5::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::array_wrapper::ArrayWrapper;
use super::constants::step_key;
use super::datasource::{Field, StepData};
use super::error::DriverError;
use super::h5_source::{ids_as_u64, ENERGY_ATTR};
use super::species::IonSpecies;

pub const OPAL_VERSION_ATTR: &str = "OPAL_version";
/// Version string tagged onto exported files so they re-import as OPAL output
const OPAL_VERSION: &str = "OPAL 1.9.0";

/// A simple struct which wraps around the hdf5-rust library.
///
/// Creates an HDF5 file in the OPAL `h5hut` layout and writes one group per step.
#[derive(Debug)]
pub struct OpalWriter {
    file_handle: File,
    path: PathBuf,
    steps_written: usize,
}
// Structure
// / - OPAL_version
// |---- Step#n - ENERGY
// |    |---- x, y, z (m), px, py, pz (beta gamma) (dset f64)
// |    |---- id (dset u64)
// |    |---- mass (MeV), q (e) (dset f64)

impl OpalWriter {
    /// Create the writer, truncating any file at path
    pub fn new(path: &Path) -> Result<Self, DriverError> {
        let file_handle = File::create(path)?;
        let version = VarLenUnicode::from_str(OPAL_VERSION)
            .map_err(|e| DriverError::BadAttribute(OPAL_VERSION_ATTR, e.to_string()))?;
        file_handle
            .new_attr::<VarLenUnicode>()
            .create(OPAL_VERSION_ATTR)?
            .write_scalar(&version)?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            steps_written: 0,
        })
    }

    /// Write the next step. `energy` is the reference kinetic energy (MeV) of the step.
    pub fn write_step(
        &mut self,
        data: &StepData,
        ion: &IonSpecies,
        energy: f64,
    ) -> Result<(), DriverError> {
        data.validate_required()?;
        let npart = data.len();
        let group = self.file_handle.create_group(&step_key(self.steps_written))?;
        for field in Field::REQUIRED {
            group
                .new_dataset_builder()
                .with_data(&data.require(field)?.to_vec())
                .create(field.name())?;
        }

        let ids: Vec<u64> = match data.get(Field::Id) {
            Some(ids) => ids_as_u64(ids),
            None => (0..npart as u64).collect(),
        };
        group.new_dataset_builder().with_data(&ids).create("id")?;

        let mass = match data.get(Field::Mass) {
            Some(mass) => mass.clone(),
            None => ArrayWrapper::filled(npart, ion.mass_mev()),
        };
        group
            .new_dataset_builder()
            .with_data(&mass.to_vec())
            .create(Field::Mass.name())?;
        let charge = match data.get(Field::Charge) {
            Some(charge) => charge.clone(),
            None => ArrayWrapper::filled(npart, ion.q()),
        };
        group
            .new_dataset_builder()
            .with_data(&charge.to_vec())
            .create(Field::Charge.name())?;

        group
            .new_attr::<f64>()
            .create(ENERGY_ATTR)?
            .write_scalar(&energy)?;

        self.steps_written += 1;
        Ok(())
    }

    pub fn steps_written(&self) -> usize {
        self.steps_written
    }

    /// Flush and release the file, consuming the writer
    pub fn close(self) -> Result<(), DriverError> {
        spdlog::info!(
            "{} steps written to {}",
            self.steps_written,
            self.path.display()
        );
        self.file_handle.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::StepSource;
    use crate::h5_source::H5Source;

    #[test]
    fn test_writer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h5");
        let ion = IonSpecies::from_str("proton").unwrap();
        let step = StepData::from_fields(
            Field::REQUIRED
                .into_iter()
                .map(|field| (field, ArrayWrapper::from(vec![0.1, 0.2]))),
        )
        .unwrap();

        let mut writer = OpalWriter::new(&path).unwrap();
        writer.write_step(&step, &ion, 1.5).unwrap();
        writer.write_step(&step, &ion, 2.5).unwrap();
        assert_eq!(writer.steps_written(), 2);
        writer.close().unwrap();

        let file = File::open(&path).unwrap();
        let version: VarLenUnicode = file.attr(OPAL_VERSION_ATTR).unwrap().read_scalar().unwrap();
        assert_eq!(version.as_str(), OPAL_VERSION);
        drop(file);

        let source = H5Source::open(&path).unwrap();
        assert_eq!(source.n_steps(), 2);
        assert_eq!(source.step_energy(1).unwrap(), Some(2.5));
        let read = source.step(0).unwrap();
        assert_eq!(read.get(Field::Id).unwrap().to_vec(), vec![0.0, 1.0]);
        assert_eq!(read.get(Field::Charge).unwrap().to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_writer_rejects_incomplete_step() {
        let dir = tempfile::tempdir().unwrap();
        let ion = IonSpecies::from_str("proton").unwrap();
        let mut writer = OpalWriter::new(&dir.path().join("out.h5")).unwrap();
        let step =
            StepData::from_fields([(Field::X, ArrayWrapper::zeros(2))]).unwrap();
        assert!(matches!(
            writer.write_step(&step, &ion, 0.0),
            Err(DriverError::StepDataError(_))
        ));
    }
}
