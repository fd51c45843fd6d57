use std::path::{Path, PathBuf};

use super::dataset::{Dataset, Property, PropertyValue};
use super::drivers::{DriverSettings, ImportExportDriver};
use super::error::ParticleFileError;
use super::species::IonSpecies;

/// All of the datasets loaded from one file.
///
/// Most formats yield a single dataset; IBSimu output can yield one per ion species.
#[derive(Debug)]
pub struct ParticleFile {
    filename: PathBuf,
    datasets: Vec<Dataset>,
}

impl ParticleFile {
    /// Import every distribution in `path`. Datasets are named after the file stem,
    /// suffixed with their index when there is more than one.
    pub fn load(
        path: &Path,
        driver_name: &str,
        species: &IonSpecies,
        settings: &DriverSettings,
    ) -> Result<Self, ParticleFileError> {
        let driver = ImportExportDriver::new(driver_name, settings)?;
        let records = driver.import_all(path, species)?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("dataset"));
        let multispecies = records.len() > 1;

        let mut datasets = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let name = if multispecies {
                format!("{stem}_{idx}")
            } else {
                stem.clone()
            };
            let mut dataset = Dataset::from_imported(record, &name);
            dataset.set_property(Property::Multispecies, PropertyValue::Flag(multispecies))?;
            dataset.assign_color(idx);
            datasets.push(dataset);
        }
        spdlog::info!(
            "Loaded {} dataset(s) from {}",
            datasets.len(),
            path.display()
        );

        Ok(Self {
            filename: path.to_path_buf(),
            datasets,
        })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn dataset(&self, index: usize) -> Result<&Dataset, ParticleFileError> {
        self.datasets
            .get(index)
            .ok_or(ParticleFileError::BadIndex(index))
    }

    pub fn dataset_mut(&mut self, index: usize) -> Result<&mut Dataset, ParticleFileError> {
        self.datasets
            .get_mut(index)
            .ok_or(ParticleFileError::BadIndex(index))
    }

    pub fn add_dataset(&mut self, mut dataset: Dataset) {
        dataset.assign_color(self.datasets.len());
        self.datasets.push(dataset);
    }

    /// Remove a dataset and release its datasource
    pub fn remove_dataset(&mut self, index: usize) -> Result<(), ParticleFileError> {
        if index >= self.datasets.len() {
            return Err(ParticleFileError::BadIndex(index));
        }
        let mut dataset = self.datasets.remove(index);
        dataset.close()?;
        Ok(())
    }

    /// Close every dataset, reporting the first failure after attempting all of them
    pub fn close_all(&mut self) -> Result<(), ParticleFileError> {
        let mut result = Ok(());
        for dataset in self.datasets.iter_mut() {
            if let Err(e) = dataset.close() {
                if result.is_ok() {
                    result = Err(ParticleFileError::from(e));
                }
            }
        }
        result
    }
}
