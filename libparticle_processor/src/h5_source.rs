use hdf5::{File, Group};
use std::path::{Path, PathBuf};

use super::array_wrapper::ArrayWrapper;
use super::constants::{parse_step_key, step_key};
use super::datasource::{Field, StepData, StepSource};
use super::error::DatasourceError;

pub const ENERGY_ATTR: &str = "ENERGY";

/// A lazy step source backed by an open HDF5 file.
///
/// Each step is a group named `Step#<n>` holding one 1-D dataset per field. Only the
/// requested step or field is read from disk. The file handle is held until `close`.
#[derive(Debug)]
pub struct H5Source {
    file: Option<File>,
    path: PathBuf,
    n_steps: usize,
}

impl H5Source {
    /// Open a file read-write so that transforms can be written back. Falls back to
    /// read-only if the file cannot be opened for writing.
    pub fn open(path: &Path) -> Result<Self, DatasourceError> {
        if !path.exists() {
            return Err(DatasourceError::BadFilePath(path.to_path_buf()));
        }
        let file = match File::open_rw(path) {
            Ok(file) => file,
            Err(e) => {
                spdlog::warn!(
                    "Could not open {} for writing ({e}); opening read-only",
                    path.display()
                );
                File::open(path)?
            }
        };
        Self::from_file(file, path)
    }

    /// Wrap an already opened file
    pub fn from_file(file: File, path: &Path) -> Result<Self, DatasourceError> {
        let n_steps = file
            .member_names()?
            .iter()
            .filter_map(|name| parse_step_key(name))
            .count();
        spdlog::debug!("Found {n_steps} steps in {}", path.display());
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            n_steps,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check for an attribute on the file root
    pub fn has_root_attr(&self, name: &str) -> bool {
        self.file
            .as_ref()
            .is_some_and(|file| file.attr(name).is_ok())
    }

    fn step_group(&self, step: usize) -> Result<Group, DatasourceError> {
        let file = self.file.as_ref().ok_or(DatasourceError::Closed)?;
        if step >= self.n_steps {
            return Err(DatasourceError::MissingStep(step));
        }
        Ok(file.group(&step_key(step))?)
    }
}

fn read_field(group: &Group, field: Field) -> Result<Option<ArrayWrapper>, DatasourceError> {
    if !group.link_exists(field.name()) {
        return Ok(None);
    }
    let dataset = group.dataset(field.name())?;
    let values = match field {
        Field::Id => dataset
            .read_raw::<u64>()?
            .into_iter()
            .map(|id| id as f64)
            .collect(),
        _ => ArrayWrapper::from(dataset.read_raw::<f64>()?),
    };
    Ok(Some(values))
}

fn write_field(group: &Group, field: Field, values: &ArrayWrapper) -> Result<(), DatasourceError> {
    let name = field.name();
    if group.link_exists(name) {
        let dataset = group.dataset(name)?;
        if dataset.shape() == vec![values.len()] {
            match field {
                Field::Id => dataset.write_raw(&ids_as_u64(values))?,
                _ => dataset.write_raw(&values.to_vec())?,
            }
            return Ok(());
        }
        // Particle count changed, the dataset has to be recreated
        group.unlink(name)?;
    }
    match field {
        Field::Id => {
            group
                .new_dataset_builder()
                .with_data(&ids_as_u64(values))
                .create(name)?;
        }
        _ => {
            group
                .new_dataset_builder()
                .with_data(&values.to_vec())
                .create(name)?;
        }
    }
    Ok(())
}

pub fn ids_as_u64(values: &ArrayWrapper) -> Vec<u64> {
    values.iter().map(|id| *id as u64).collect()
}

impl StepSource for H5Source {
    fn n_steps(&self) -> usize {
        self.n_steps
    }

    fn step(&self, step: usize) -> Result<StepData, DatasourceError> {
        let group = self.step_group(step)?;
        let mut data = StepData::new();
        for field in Field::ALL {
            if let Some(values) = read_field(&group, field)? {
                data.insert(field, values)?;
            }
        }
        Ok(data)
    }

    fn field(&self, step: usize, field: Field) -> Result<Option<ArrayWrapper>, DatasourceError> {
        let group = self.step_group(step)?;
        read_field(&group, field)
    }

    fn step_len(&self, step: usize) -> Result<usize, DatasourceError> {
        let group = self.step_group(step)?;
        if !group.link_exists(Field::X.name()) {
            return Ok(0);
        }
        Ok(group
            .dataset(Field::X.name())?
            .shape()
            .first()
            .copied()
            .unwrap_or(0))
    }

    fn step_energy(&self, step: usize) -> Result<Option<f64>, DatasourceError> {
        let group = self.step_group(step)?;
        match group.attr(ENERGY_ATTR) {
            Ok(attr) => Ok(Some(attr.read_scalar::<f64>()?)),
            Err(_) => Ok(None),
        }
    }

    fn write_step(&mut self, step: usize, data: &StepData) -> Result<(), DatasourceError> {
        data.validate()?;
        let group = self.step_group(step)?;
        if !data.contains(Field::Id) {
            if let Some(other) = (0..self.n_steps).find(|idx| *idx != step) {
                let expected = self.step_len(other)?;
                if data.len() != expected {
                    return Err(DatasourceError::InconsistentParticleCount {
                        step,
                        expected,
                        found: data.len(),
                    });
                }
            }
        }
        for (field, values) in data.fields() {
            write_field(&group, field, values)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DatasourceError> {
        match self.file.take() {
            Some(file) => {
                file.close()?;
                spdlog::debug!("Closed {}", self.path.display());
                Ok(())
            }
            None => Err(DatasourceError::Closed),
        }
    }

    fn is_file_backed(&self) -> bool {
        true
    }
}
