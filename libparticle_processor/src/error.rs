use std::path::PathBuf;
use thiserror::Error;

use super::datasource::Field;
use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum StepDataError {
    #[error("Field {field} has {found} entries but the step holds {expected} particles")]
    LengthMismatch {
        field: Field,
        expected: usize,
        found: usize,
    },
    #[error("StepData is missing required field {0}")]
    MissingField(Field),
}

#[derive(Debug, Error)]
pub enum DatasourceError {
    #[error("Datasource failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Datasource has no step {0}")]
    MissingStep(usize),
    #[error("Datasource has already been closed")]
    Closed,
    #[error("Datasource was given an inconsistent step: {0}")]
    BadStep(#[from] StepDataError),
    #[error("Step {step} holds {found} particles but other steps hold {expected} and the source carries no particle ids")]
    InconsistentParticleCount {
        step: usize,
        expected: usize,
        found: usize,
    },
    #[error("Could not open datasource because file {0:?} does not exist")]
    BadFilePath(PathBuf),
}

#[derive(Debug, Clone, Error)]
pub enum SpeciesError {
    #[error("Unknown ion species {0}; expected one of proton, H2_1+, 4He_2+, H_1-, electron")]
    UnknownSpecies(String),
    #[error("Ion species {0} has a non-positive rest mass")]
    BadMass(String),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Driver failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not import because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Driver failed to parse a float: {0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),
    #[error("Driver failed to parse an integer: {0}")]
    ParseIntError(#[from] std::num::ParseIntError),
    #[error("Malformed input at line {line}: {reason}")]
    BadFormat { line: usize, reason: String },
    #[error("File {0:?} has an extension this driver does not handle")]
    UnsupportedExtension(PathBuf),
    #[error("File {0:?} is an HDF5 file but was not written by OPAL (no OPAL_version attribute)")]
    NotOpal(PathBuf),
    #[error("Driver failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Could not encode attribute {0}: {1}")]
    BadAttribute(&'static str, String),
    #[error("Driver failed due to datasource error: {0}")]
    DatasourceError(#[from] DatasourceError),
    #[error("Driver built an inconsistent step: {0}")]
    StepDataError(#[from] StepDataError),
    #[error("Driver could not derive an ion species: {0}")]
    SpeciesError(#[from] SpeciesError),
    #[error("{program} driver does not implement {operation}")]
    NotImplemented {
        program: &'static str,
        operation: &'static str,
    },
    #[error("Found {} ion species ({}); select one with species_index", .0.len(), .0.join("; "))]
    AmbiguousSpecies(Vec<String>),
    #[error("Requested species index {0} but only {1} species were found")]
    SpeciesIndexOutOfRange(usize, usize),
    #[error("No particles survived import of {0:?}")]
    NoParticles(PathBuf),
    #[error("Cannot export a dataset that has no datasource")]
    EmptyDataset,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No driver named {0} is registered; known drivers are OPAL, TraceWin, COMSOL, IBSimu, FreeCAD, Track")]
    UnknownDriver(String),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset has no step selected")]
    NoStepSelected,
    #[error("Requested step {0} exceeds the valid range [0, {1})")]
    StepOutOfRange(usize, usize),
    #[error("Key {0} is not one of x, y, z, r, px, py, pz, pr, id, E, mass, q")]
    UnrecognizedKey(String),
    #[error("Field {0} is not stored for step {1}")]
    FieldUnavailable(String, usize),
    #[error("Dataset is not loaded")]
    NotLoaded,
    #[error("Dataset is already loaded")]
    AlreadyLoaded,
    #[error("Particle {0} does not exist at step {1}")]
    NoSuchParticle(usize, usize),
    #[error("Steps {0:?} do not define a circle (collinear points)")]
    DegenerateOrbit([usize; 3]),
    #[error("Unknown property {0}")]
    UnknownProperty(String),
    #[error("Value {1} cannot be assigned to property {0}")]
    BadPropertyValue(String, String),
    #[error("Property {0} follows the datasource and cannot be set")]
    ReadOnlyProperty(String),
    #[error("Dataset failed due to driver error: {0}")]
    DriverError(#[from] DriverError),
    #[error("Dataset failed due to registry error: {0}")]
    RegistryError(#[from] RegistryError),
    #[error("Dataset failed due to datasource error: {0}")]
    DatasourceError(#[from] DatasourceError),
    #[error("Dataset transform produced an inconsistent step: {0}")]
    StepDataError(#[from] StepDataError),
}

#[derive(Debug, Error)]
pub enum ParticleFileError {
    #[error("ParticleFile failed due to registry error: {0}")]
    RegistryError(#[from] RegistryError),
    #[error("ParticleFile failed due to driver error: {0}")]
    DriverError(#[from] DriverError),
    #[error("ParticleFile failed due to dataset error: {0}")]
    DatasetError(#[from] DatasetError),
    #[error("ParticleFile has no dataset at index {0}")]
    BadIndex(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config names an invalid ion species: {0}")]
    SpeciesError(#[from] SpeciesError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to ParticleFile error: {0}")]
    ParticleFileError(#[from] ParticleFileError),
    #[error("Processor failed due to Dataset error: {0}")]
    DatasetError(#[from] DatasetError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
