use fxhash::FxHashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::array_wrapper::ArrayWrapper;
use super::datasource::{Field, StepData, StepSource};
use super::drivers::{DriverSettings, ImportExportDriver};
use super::error::DatasetError;
use super::species::IonSpecies;
use super::transfer::ImportedData;

/// RGB triplet on a 0-255 scale
pub type Color = [f64; 3];

const PALETTE: [Color; 10] = [
    [31.0, 119.0, 180.0],
    [255.0, 127.0, 14.0],
    [44.0, 160.0, 44.0],
    [214.0, 39.0, 40.0],
    [148.0, 103.0, 189.0],
    [140.0, 86.0, 75.0],
    [227.0, 119.0, 194.0],
    [127.0, 127.0, 127.0],
    [188.0, 189.0, 34.0],
    [23.0, 190.0, 207.0],
];

/// Palette entry for an index, wrapping around
pub fn palette_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    Empty,
    Loaded,
    Closed,
}

/// How `get_particle` colors a trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColoringMode {
    #[default]
    None,
    /// Red for early loss fading to green for survivors
    Step,
    /// A fixed palette entry per particle id
    Random,
}

/// Positions of one particle over the steps it survived
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Center and radius (m) of a circle fitted through three points of one orbit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orbit {
    pub x_center: f64,
    pub y_center: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Name,
    Ion,
    Multispecies,
    Current,
    Mass,
    Energy,
    Steps,
    CurStep,
    Charge,
    Particles,
}

impl Property {
    pub const ALL: [Property; 10] = [
        Property::Name,
        Property::Ion,
        Property::Multispecies,
        Property::Current,
        Property::Mass,
        Property::Energy,
        Property::Steps,
        Property::CurStep,
        Property::Charge,
        Property::Particles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Property::Name => "name",
            Property::Ion => "ion",
            Property::Multispecies => "multispecies",
            Property::Current => "current",
            Property::Mass => "mass",
            Property::Energy => "energy",
            Property::Steps => "steps",
            Property::CurStep => "curstep",
            Property::Charge => "charge",
            Property::Particles => "particles",
        }
    }
}

impl Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Property {
    type Err = DatasetError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .into_iter()
            .find(|property| property.name() == s)
            .ok_or_else(|| DatasetError::UnknownProperty(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Species(IonSpecies),
    Flag(bool),
    Number(f64),
    Count(usize),
}

impl Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Text(text) => write!(f, "{text}"),
            PropertyValue::Species(ion) => write!(f, "{ion}"),
            PropertyValue::Flag(flag) => write!(f, "{flag}"),
            PropertyValue::Number(number) => write!(f, "{number}"),
            PropertyValue::Count(count) => write!(f, "{count}"),
        }
    }
}

impl Property {
    /// Whether a value has the right shape for this property
    fn accepts(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (Property::Name, PropertyValue::Text(_))
                | (Property::Ion, PropertyValue::Species(_))
                | (Property::Multispecies, PropertyValue::Flag(_))
                | (
                    Property::Current | Property::Mass | Property::Energy | Property::Charge,
                    PropertyValue::Number(_)
                )
                | (
                    Property::Steps | Property::CurStep | Property::Particles,
                    PropertyValue::Count(_)
                )
        )
    }

    /// Coerce text into a value of this property's type
    fn parse_value(&self, text: &str) -> Result<PropertyValue, DatasetError> {
        let bad = || DatasetError::BadPropertyValue(self.to_string(), text.to_string());
        let text = text.trim();
        Ok(match self {
            Property::Name => PropertyValue::Text(text.to_string()),
            Property::Ion => PropertyValue::Species(IonSpecies::from_str(text).map_err(|_| bad())?),
            Property::Multispecies => PropertyValue::Flag(text.parse().map_err(|_| bad())?),
            Property::Current | Property::Mass | Property::Energy | Property::Charge => {
                PropertyValue::Number(text.parse().map_err(|_| bad())?)
            }
            Property::Steps | Property::CurStep | Property::Particles => {
                PropertyValue::Count(text.parse().map_err(|_| bad())?)
            }
        })
    }
}

/// A single particle distribution with multiple time steps.
///
/// The Dataset owns its datasource (in memory or an open HDF5 file) and releases it on
/// `close` or drop. Field values are read through a step view selected with
/// `set_step_view`; `get` only ever reads from that step.
///
/// Properties mirror the metadata of the import. The ones filled in from the file are
/// recorded as native so callers can tell user overrides apart.
#[derive(Debug)]
pub struct Dataset {
    species: IonSpecies,
    state: DatasetState,
    datasource: Option<Box<dyn StepSource>>,
    view: Option<StepData>,
    properties: FxHashMap<Property, PropertyValue>,
    native_properties: FxHashMap<Property, PropertyValue>,
    orbit: Option<Orbit>,
    color: Color,
    filename: Option<PathBuf>,
    driver_name: Option<String>,
}

impl Dataset {
    /// Create an empty dataset. The species is handed to the driver on import.
    pub fn new(species: IonSpecies) -> Self {
        Self {
            species,
            state: DatasetState::Empty,
            datasource: None,
            view: None,
            properties: FxHashMap::default(),
            native_properties: FxHashMap::default(),
            orbit: None,
            color: [0.0; 3],
            filename: None,
            driver_name: None,
        }
    }

    /// Wrap data that did not come from `load_from_file`, e.g. a generated distribution.
    pub fn from_imported(data: ImportedData, name: &str) -> Self {
        let mut dataset = Self::new(data.ion.clone());
        dataset.populate(data, name);
        if dataset.steps() > 0 {
            if let Err(e) = dataset.set_step_view(0) {
                spdlog::warn!("Dataset {name} has no readable first step: {e}");
            }
        }
        dataset
    }

    fn populate(&mut self, data: ImportedData, name: &str) {
        let mut native = vec![
            (Property::Ion, PropertyValue::Species(data.ion)),
            (Property::Mass, PropertyValue::Number(data.mass)),
            (Property::Charge, PropertyValue::Number(data.charge)),
            (Property::Steps, PropertyValue::Count(data.steps)),
            (Property::Particles, PropertyValue::Count(data.particles)),
        ];
        if let Some(current) = data.current {
            native.push((Property::Current, PropertyValue::Number(current)));
        }
        if let Some(energy) = data.energy {
            native.push((Property::Energy, PropertyValue::Number(energy)));
        }
        for (property, value) in native {
            self.properties.insert(property, value.clone());
            self.native_properties.insert(property, value);
        }
        self.properties
            .insert(Property::Name, PropertyValue::Text(name.to_string()));
        self.properties
            .insert(Property::Multispecies, PropertyValue::Flag(false));
        self.datasource = Some(data.datasource);
        self.state = DatasetState::Loaded;
    }

    /// Import a file through the named driver and view its first step.
    ///
    /// On failure the dataset stays empty.
    pub fn load_from_file(
        &mut self,
        path: &Path,
        driver_name: &str,
        name: &str,
        settings: &DriverSettings,
    ) -> Result<(), DatasetError> {
        if self.state != DatasetState::Empty {
            return Err(DatasetError::AlreadyLoaded);
        }
        let driver = ImportExportDriver::new(driver_name, settings)?;
        let data = driver.import_data(path, &self.species)?;
        spdlog::info!(
            "Loaded {name}: {} steps, {} particles of {}",
            data.steps,
            data.particles,
            data.ion
        );
        self.populate(data, name);
        self.filename = Some(path.to_path_buf());
        self.driver_name = Some(driver_name.to_string());
        if self.steps() > 0 {
            self.set_step_view(0)?;
        }
        Ok(())
    }

    pub fn export_to_file(
        &self,
        path: &Path,
        driver_name: &str,
        settings: &DriverSettings,
    ) -> Result<(), DatasetError> {
        if self.state != DatasetState::Loaded {
            return Err(DatasetError::NotLoaded);
        }
        let driver = ImportExportDriver::new(driver_name, settings)?;
        driver.export_data(self, path)?;
        Ok(())
    }

    fn source(&self) -> Result<&dyn StepSource, DatasetError> {
        match (&self.state, self.datasource.as_deref()) {
            (DatasetState::Loaded, Some(source)) => Ok(source),
            _ => Err(DatasetError::NotLoaded),
        }
    }

    /// Select the step that `get` reads from
    pub fn set_step_view(&mut self, step: usize) -> Result<(), DatasetError> {
        let steps = self.steps();
        let source = self.source()?;
        if step >= steps {
            spdlog::debug!("Requested step {step} exceeds max steps of {steps}");
            return Err(DatasetError::StepOutOfRange(step, steps));
        }
        let data = source.step(step)?;
        self.view = Some(data);
        self.properties
            .insert(Property::CurStep, PropertyValue::Count(step));
        Ok(())
    }

    /// Values of `key` at the current step.
    ///
    /// Stored fields are `x, y, z, px, py, pz, id, E, mass, q`. `r` and `pr` are
    /// computed from the transverse coordinates, relative to the orbit center if one was
    /// fitted.
    pub fn get(&self, key: &str) -> Result<ArrayWrapper, DatasetError> {
        let (view, step) = match (&self.view, self.current_step()) {
            (Some(view), Some(step)) => (view, step),
            _ => return Err(DatasetError::NoStepSelected),
        };
        let stored = |field: Field| {
            view.get(field)
                .cloned()
                .ok_or_else(|| DatasetError::FieldUnavailable(field.to_string(), step))
        };
        match key {
            "r" => {
                let (dx, dy) = self.centered(&stored(Field::X)?, &stored(Field::Y)?);
                Ok(dx
                    .iter()
                    .zip(dy.iter())
                    .map(|(dx, dy)| dx.hypot(*dy))
                    .collect())
            }
            "pr" => {
                let (dx, dy) = self.centered(&stored(Field::X)?, &stored(Field::Y)?);
                let (px, py) = (stored(Field::Px)?, stored(Field::Py)?);
                Ok((0..dx.len())
                    .map(|idx| {
                        let r = dx[idx].hypot(dy[idx]);
                        if r == 0.0 {
                            0.0
                        } else {
                            (px[idx] * dx[idx] + py[idx] * dy[idx]) / r
                        }
                    })
                    .collect())
            }
            _ => {
                let field = Field::from_str(key)
                    .map_err(|_| DatasetError::UnrecognizedKey(key.to_string()))?;
                stored(field)
            }
        }
    }

    fn centered(&self, x: &ArrayWrapper, y: &ArrayWrapper) -> (Vec<f64>, Vec<f64>) {
        let (xc, yc) = self
            .orbit
            .map_or((0.0, 0.0), |orbit| (orbit.x_center, orbit.y_center));
        (
            x.iter().map(|x| x - xc).collect(),
            y.iter().map(|y| y - yc).collect(),
        )
    }

    /// Index of particle `id` at a step; `None` once it is gone
    fn particle_index(&self, step: usize, id: usize) -> Result<Option<usize>, DatasetError> {
        Ok(self.source()?.index_of(step, id)?)
    }

    fn particle_position(&self, step: usize, id: usize) -> Result<Option<[f64; 3]>, DatasetError> {
        let Some(index) = self.particle_index(step, id)? else {
            return Ok(None);
        };
        let source = self.source()?;
        let mut position = [f64::NAN; 3];
        for (value, field) in position.iter_mut().zip([Field::X, Field::Y, Field::Z]) {
            *value = source
                .particle_value(step, field, index)?
                .unwrap_or(f64::NAN);
        }
        Ok(Some(position).filter(|position| position.iter().all(|value| !value.is_nan())))
    }

    /// Trajectory of one particle, followed until it is missing or NaN at some step.
    ///
    /// Scans every step, so the cost grows with the step count.
    pub fn get_particle(
        &self,
        id: usize,
        coloring: ColoringMode,
    ) -> Result<(Trajectory, Option<Color>), DatasetError> {
        let steps = self.steps();
        let mut trajectory = Trajectory::default();
        let mut lost_at = None;
        for step in 0..steps {
            match self.particle_position(step, id)? {
                Some([x, y, z]) => {
                    trajectory.x.push(x);
                    trajectory.y.push(y);
                    trajectory.z.push(z);
                }
                None => {
                    lost_at = Some(step);
                    break;
                }
            }
        }
        if trajectory.is_empty() {
            return Err(DatasetError::NoSuchParticle(id, 0));
        }

        let color = match (coloring, lost_at) {
            (ColoringMode::None, _) => None,
            (ColoringMode::Step, Some(step)) => {
                let factor = step as f64 / steps as f64;
                Some([(1.0 - factor) * 255.0, factor * 255.0, 0.0])
            }
            (ColoringMode::Step, None) => Some([0.0, 255.0, 0.0]),
            (ColoringMode::Random, _) => Some(palette_color(id)),
        };
        Ok((trajectory, color))
    }

    /// Fit a circle through the (x, y) of one particle at three steps and use its center
    /// for `r` and `pr`.
    pub fn xy_orbit(&mut self, triplet: [usize; 3], particle: usize) -> Result<Orbit, DatasetError> {
        let steps = self.steps();
        let mut points = [[0.0; 2]; 3];
        for (point, step) in points.iter_mut().zip(triplet) {
            if step >= steps {
                return Err(DatasetError::StepOutOfRange(step, steps));
            }
            let [x, y, _] = self
                .particle_position(step, particle)?
                .ok_or(DatasetError::NoSuchParticle(particle, step))?;
            *point = [x, y];
        }

        let rows: Vec<[f64; 4]> = points
            .iter()
            .map(|[x, y]| [x * x + y * y, *x, *y, 1.0])
            .collect();
        // Minor of the 3x4 matrix with one column removed
        let minor = |skip: usize| {
            let m: Vec<Vec<f64>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .filter(|(col, _)| *col != skip)
                        .map(|(_, value)| *value)
                        .collect()
                })
                .collect();
            m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
                - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
                + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
        };
        let m11 = minor(0);
        if m11 == 0.0 {
            return Err(DatasetError::DegenerateOrbit(triplet));
        }
        let x_center = 0.5 * minor(1) / m11;
        let y_center = -0.5 * minor(2) / m11;
        let orbit = Orbit {
            x_center,
            y_center,
            radius: (x_center.powi(2) + y_center.powi(2) + minor(3) / m11).sqrt(),
        };
        spdlog::debug!("Fitted orbit {orbit:?}");
        self.orbit = Some(orbit);
        Ok(orbit)
    }

    pub fn clear_orbit(&mut self) {
        self.orbit = None;
    }

    /// Apply an in-place transformation to every step and write it back to the datasource.
    pub fn transform_steps<F>(&mut self, mut transform: F) -> Result<(), DatasetError>
    where
        F: FnMut(usize, &mut StepData),
    {
        if self.state != DatasetState::Loaded {
            return Err(DatasetError::NotLoaded);
        }
        let source = self.datasource.as_mut().ok_or(DatasetError::NotLoaded)?;
        for step in 0..source.n_steps() {
            let mut data = source.step(step)?;
            transform(step, &mut data);
            data.validate()?;
            source.write_step(step, &data)?;
        }
        // the first step holds every particle that ever existed
        let particles = match source.n_steps() {
            0 => 0,
            _ => source.step_len(0)?,
        };
        self.properties
            .insert(Property::Particles, PropertyValue::Count(particles));
        if let Some(step) = self.current_step() {
            self.set_step_view(step)?;
        }
        Ok(())
    }

    /// Release the datasource. Failures are logged and returned.
    pub fn close(&mut self) -> Result<(), DatasetError> {
        self.view = None;
        self.properties.remove(&Property::CurStep);
        if self.state == DatasetState::Loaded {
            self.state = DatasetState::Closed;
        }
        if let Some(mut source) = self.datasource.take() {
            source.close().map_err(|e| {
                spdlog::error!("Exception occurred during closing of datasource: {e}");
                DatasetError::from(e)
            })?;
        }
        Ok(())
    }

    pub fn get_property(&self, property: Property) -> Option<&PropertyValue> {
        self.properties.get(&property)
    }

    /// Override a property. The value must have the property's type; `steps` and
    /// `particles` follow the datasource and `curstep` moves the step view.
    pub fn set_property(
        &mut self,
        property: Property,
        value: PropertyValue,
    ) -> Result<(), DatasetError> {
        if !property.accepts(&value) {
            return Err(DatasetError::BadPropertyValue(
                property.to_string(),
                value.to_string(),
            ));
        }
        match (property, value) {
            (Property::Steps | Property::Particles, _) => {
                Err(DatasetError::ReadOnlyProperty(property.to_string()))
            }
            (Property::CurStep, PropertyValue::Count(step)) => self.set_step_view(step),
            (_, value) => {
                self.properties.insert(property, value);
                Ok(())
            }
        }
    }

    /// Like `set_property`, coercing the value from text
    pub fn set_property_str(&mut self, property: Property, text: &str) -> Result<(), DatasetError> {
        let value = property.parse_value(text)?;
        self.set_property(property, value)
    }

    /// True if the property still holds the value the file provided
    pub fn is_native_property(&self, property: Property) -> bool {
        match self.native_properties.get(&property) {
            Some(native) => self.properties.get(&property) == Some(native),
            None => false,
        }
    }

    pub fn properties(&self) -> &FxHashMap<Property, PropertyValue> {
        &self.properties
    }

    pub fn state(&self) -> DatasetState {
        self.state
    }

    pub fn datasource(&self) -> Option<&dyn StepSource> {
        self.datasource.as_deref()
    }

    /// The species in effect: an `ion` override, else the imported or constructor species
    pub fn ion(&self) -> &IonSpecies {
        match self.properties.get(&Property::Ion) {
            Some(PropertyValue::Species(ion)) => ion,
            _ => &self.species,
        }
    }

    pub fn name(&self) -> &str {
        match self.properties.get(&Property::Name) {
            Some(PropertyValue::Text(name)) => name,
            _ => "",
        }
    }

    pub fn steps(&self) -> usize {
        self.datasource.as_ref().map_or(0, |source| source.n_steps())
    }

    pub fn particles(&self) -> usize {
        match self.properties.get(&Property::Particles) {
            Some(PropertyValue::Count(particles)) => *particles,
            _ => 0,
        }
    }

    pub fn current_step(&self) -> Option<usize> {
        match self.properties.get(&Property::CurStep) {
            Some(PropertyValue::Count(step)) => Some(*step),
            _ => None,
        }
    }

    /// Beam current (A), if the file or the user provided one
    pub fn current(&self) -> Option<f64> {
        match self.properties.get(&Property::Current) {
            Some(PropertyValue::Number(current)) => Some(*current),
            _ => None,
        }
    }

    pub fn orbit(&self) -> Option<Orbit> {
        self.orbit
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn assign_color(&mut self, index: usize) {
        self.color = palette_color(index);
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.driver_name.as_deref()
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Some(mut source) = self.datasource.take() {
            if let Err(e) = source.close() {
                spdlog::warn!("Failed to close datasource of {}: {e}", self.name());
            }
        }
    }
}
