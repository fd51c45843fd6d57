use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::drivers::DriverSettings;
use super::error::ConfigError;
use super::species::IonSpecies;

/// Structure representing a conversion job: what to read, with which driver, and where to
/// write it.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml.
///
/// The species has no default; a config that omits it does not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_path: PathBuf,
    pub input_driver: String,
    pub output_path: PathBuf,
    pub output_driver: String,
    pub species: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub drivers: DriverSettings,
}

impl Default for Config {
    /// Generate a template Config. Paths are placeholders.
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            input_driver: String::from("OPAL"),
            output_path: PathBuf::from("None"),
            output_driver: String::from("TraceWin"),
            species: String::from("proton"),
            name: None,
            debug: false,
            drivers: DriverSettings::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn ion_species(&self) -> Result<IonSpecies, ConfigError> {
        Ok(IonSpecies::from_str(&self.species)?)
    }

    /// Output path for dataset `index` of `count`. Several datasets get an index suffix
    /// on the file stem.
    pub fn output_path_for(&self, index: usize, count: usize) -> PathBuf {
        if count <= 1 {
            return self.output_path.clone();
        }
        let stem = self
            .output_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_name = match self.output_path.extension() {
            Some(ext) => format!("{stem}_{index}.{}", ext.to_string_lossy()),
            None => format!("{stem}_{index}"),
        };
        self.output_path.with_file_name(file_name)
    }
}
