use fxhash::FxHashMap;
use std::fmt::Display;
use std::str::FromStr;

use super::array_wrapper::ArrayWrapper;
use super::error::{DatasourceError, StepDataError};

/// The per-particle columns a step can carry.
///
/// Positions are in m and momenta are normalized (βγ). `Energy` is kinetic energy in MeV,
/// `Mass` and `Charge` are per macroparticle when a format stores them that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    X,
    Y,
    Z,
    Px,
    Py,
    Pz,
    Id,
    Energy,
    Mass,
    Charge,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::X,
        Field::Y,
        Field::Z,
        Field::Px,
        Field::Py,
        Field::Pz,
        Field::Id,
        Field::Energy,
        Field::Mass,
        Field::Charge,
    ];

    pub const REQUIRED: [Field; 6] = [
        Field::X,
        Field::Y,
        Field::Z,
        Field::Px,
        Field::Py,
        Field::Pz,
    ];

    /// Dataset name used on disk and by `Dataset::get`
    pub fn name(&self) -> &'static str {
        match self {
            Field::X => "x",
            Field::Y => "y",
            Field::Z => "z",
            Field::Px => "px",
            Field::Py => "py",
            Field::Pz => "pz",
            Field::Id => "id",
            Field::Energy => "E",
            Field::Mass => "mass",
            Field::Charge => "q",
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Field {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .find(|field| field.name() == s)
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

/// All columns of a single step. Every column has the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepData {
    fields: FxHashMap<Field, ArrayWrapper>,
}

impl StepData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a step from a set of columns, checking their lengths agree
    pub fn from_fields<I>(fields: I) -> Result<Self, StepDataError>
    where
        I: IntoIterator<Item = (Field, ArrayWrapper)>,
    {
        let mut step = Self::new();
        for (field, values) in fields {
            step.insert(field, values)?;
        }
        Ok(step)
    }

    pub fn insert(&mut self, field: Field, values: ArrayWrapper) -> Result<(), StepDataError> {
        if let Some(expected) = self.first_len(field) {
            if expected != values.len() {
                return Err(StepDataError::LengthMismatch {
                    field,
                    expected,
                    found: values.len(),
                });
            }
        }
        self.fields.insert(field, values);
        Ok(())
    }

    // Length of any column other than `skip`
    fn first_len(&self, skip: Field) -> Option<usize> {
        self.fields
            .iter()
            .find(|(field, _)| **field != skip)
            .map(|(_, values)| values.len())
    }

    pub fn get(&self, field: Field) -> Option<&ArrayWrapper> {
        self.fields.get(&field)
    }

    /// Mutable access for in-place transforms. Call `validate` afterwards if lengths may change.
    pub fn get_mut(&mut self, field: Field) -> Option<&mut ArrayWrapper> {
        self.fields.get_mut(&field)
    }

    pub fn require(&self, field: Field) -> Result<&ArrayWrapper, StepDataError> {
        self.fields
            .get(&field)
            .ok_or(StepDataError::MissingField(field))
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Number of particles in the step
    pub fn len(&self) -> usize {
        self.fields.values().next().map_or(0, |values| values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored fields in canonical order
    pub fn fields(&self) -> impl Iterator<Item = (Field, &ArrayWrapper)> {
        Field::ALL
            .into_iter()
            .filter_map(|field| self.fields.get(&field).map(|values| (field, values)))
    }

    pub fn validate(&self) -> Result<(), StepDataError> {
        let expected = self.len();
        for (field, values) in self.fields() {
            if values.len() != expected {
                return Err(StepDataError::LengthMismatch {
                    field,
                    expected,
                    found: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Check that x, y, z, px, py, pz are all present
    pub fn validate_required(&self) -> Result<(), StepDataError> {
        for field in Field::REQUIRED {
            self.require(field)?;
        }
        self.validate()
    }

    /// Index of the particle with identity `id`, or `id` itself when the step carries no ids
    pub fn index_of(&self, id: usize) -> Option<usize> {
        match self.fields.get(&Field::Id) {
            Some(ids) => ids.iter().position(|value| *value == id as f64),
            None if id < self.len() => Some(id),
            None => None,
        }
    }
}

/// A step-indexed provider of per-particle field arrays.
///
/// Implemented by an eager in-memory store and by a lazy HDF5-backed store; drivers pick
/// the implementation and callers only ever see this interface.
pub trait StepSource: std::fmt::Debug {
    fn n_steps(&self) -> usize;

    /// Read every field of a step
    fn step(&self, step: usize) -> Result<StepData, DatasourceError>;

    /// Read a single field of a step. `None` if the step does not store it.
    fn field(&self, step: usize, field: Field) -> Result<Option<ArrayWrapper>, DatasourceError>;

    /// Read a single value. `None` if the field or the particle index is absent.
    fn particle_value(
        &self,
        step: usize,
        field: Field,
        index: usize,
    ) -> Result<Option<f64>, DatasourceError> {
        Ok(self
            .field(step, field)?
            .and_then(|values| values.get(index)))
    }

    /// Number of particles stored at a step
    fn step_len(&self, step: usize) -> Result<usize, DatasourceError> {
        Ok(self.field(step, Field::X)?.map_or(0, |x| x.len()))
    }

    /// Index of the particle with identity `id` at a step, or `id` itself when the step
    /// carries no ids. `None` once the particle is gone.
    fn index_of(&self, step: usize, id: usize) -> Result<Option<usize>, DatasourceError> {
        Ok(match self.field(step, Field::Id)? {
            Some(ids) => ids.iter().position(|value| *value == id as f64),
            None => (id < self.step_len(step)?).then_some(id),
        })
    }

    /// Reference kinetic energy (MeV) recorded for a step, if the format stores one
    fn step_energy(&self, _step: usize) -> Result<Option<f64>, DatasourceError> {
        Ok(None)
    }

    /// Replace the contents of a step. File-backed sources persist the change.
    fn write_step(&mut self, step: usize, data: &StepData) -> Result<(), DatasourceError>;

    /// Release any external handle. Further reads fail with `DatasourceError::Closed`.
    fn close(&mut self) -> Result<(), DatasourceError>;

    fn is_file_backed(&self) -> bool;
}

/// Eagerly built steps held in memory. Used for the text formats.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    steps: Vec<StepData>,
    closed: bool,
}

impl MemorySource {
    /// Create a source from a list of steps.
    ///
    /// Steps without particle ids must all hold the same number of particles.
    pub fn new(steps: Vec<StepData>) -> Result<Self, DatasourceError> {
        if let Some(first) = steps.first() {
            let expected = first.len();
            for (idx, step) in steps.iter().enumerate() {
                step.validate()?;
                if step.len() != expected && !step.contains(Field::Id) {
                    return Err(DatasourceError::InconsistentParticleCount {
                        step: idx,
                        expected,
                        found: step.len(),
                    });
                }
            }
        }
        Ok(Self {
            steps,
            closed: false,
        })
    }

    /// Convenience constructor for single-step distributions
    pub fn single(step: StepData) -> Result<Self, DatasourceError> {
        Self::new(vec![step])
    }

    fn get_step(&self, step: usize) -> Result<&StepData, DatasourceError> {
        if self.closed {
            return Err(DatasourceError::Closed);
        }
        self.steps.get(step).ok_or(DatasourceError::MissingStep(step))
    }
}

impl StepSource for MemorySource {
    fn n_steps(&self) -> usize {
        self.steps.len()
    }

    fn step(&self, step: usize) -> Result<StepData, DatasourceError> {
        Ok(self.get_step(step)?.clone())
    }

    fn field(&self, step: usize, field: Field) -> Result<Option<ArrayWrapper>, DatasourceError> {
        Ok(self.get_step(step)?.get(field).cloned())
    }

    fn particle_value(
        &self,
        step: usize,
        field: Field,
        index: usize,
    ) -> Result<Option<f64>, DatasourceError> {
        Ok(self
            .get_step(step)?
            .get(field)
            .and_then(|values| values.get(index)))
    }

    fn step_len(&self, step: usize) -> Result<usize, DatasourceError> {
        Ok(self.get_step(step)?.len())
    }

    fn index_of(&self, step: usize, id: usize) -> Result<Option<usize>, DatasourceError> {
        Ok(self.get_step(step)?.index_of(id))
    }

    fn write_step(&mut self, step: usize, data: &StepData) -> Result<(), DatasourceError> {
        if self.closed {
            return Err(DatasourceError::Closed);
        }
        data.validate()?;
        let expected = self
            .steps
            .iter()
            .enumerate()
            .find(|(idx, _)| *idx != step)
            .map(|(_, other)| other.len());
        if let Some(expected) = expected {
            if data.len() != expected && !data.contains(Field::Id) {
                return Err(DatasourceError::InconsistentParticleCount {
                    step,
                    expected,
                    found: data.len(),
                });
            }
        }
        let slot = self
            .steps
            .get_mut(step)
            .ok_or(DatasourceError::MissingStep(step))?;
        *slot = data.clone();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DatasourceError> {
        if self.closed {
            return Err(DatasourceError::Closed);
        }
        self.steps.clear();
        self.closed = true;
        Ok(())
    }

    fn is_file_backed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_step(n: usize, offset: f64) -> StepData {
        StepData::from_fields(Field::REQUIRED.into_iter().map(|field| {
            (
                field,
                (0..n).map(|i| i as f64 + offset).collect::<ArrayWrapper>(),
            )
        }))
        .unwrap()
    }

    #[test]
    fn test_step_length_invariant() {
        let mut step = make_step(3, 0.0);
        let result = step.insert(Field::Energy, ArrayWrapper::zeros(2));
        assert!(matches!(
            result,
            Err(StepDataError::LengthMismatch {
                field: Field::Energy,
                expected: 3,
                found: 2
            })
        ));
        // Replacing a column with the same length is fine
        step.insert(Field::X, ArrayWrapper::zeros(3)).unwrap();
        assert_eq!(step.len(), 3);
        step.validate_required().unwrap();
    }

    #[test]
    fn test_field_names() {
        for field in Field::ALL {
            assert_eq!(Field::from_str(field.name()), Ok(field));
        }
        assert!(Field::from_str("r").is_err());
    }

    #[test]
    fn test_index_of() {
        let mut step = make_step(3, 0.0);
        assert_eq!(step.index_of(2), Some(2));
        assert_eq!(step.index_of(3), None);
        step.insert(Field::Id, ArrayWrapper::from(vec![7.0, 9.0, 11.0]))
            .unwrap();
        assert_eq!(step.index_of(9), Some(1));
        assert_eq!(step.index_of(2), None);
    }

    #[test]
    fn test_memory_source_requires_ids_for_losses() {
        let result = MemorySource::new(vec![make_step(3, 0.0), make_step(2, 0.0)]);
        assert!(matches!(
            result,
            Err(DatasourceError::InconsistentParticleCount { step: 1, .. })
        ));

        let mut first = make_step(3, 0.0);
        first
            .insert(Field::Id, ArrayWrapper::from(vec![0.0, 1.0, 2.0]))
            .unwrap();
        let mut second = make_step(2, 0.0);
        second
            .insert(Field::Id, ArrayWrapper::from(vec![0.0, 2.0]))
            .unwrap();
        let source = MemorySource::new(vec![first, second]).unwrap();
        assert_eq!(source.n_steps(), 2);
        assert_eq!(source.particle_value(1, Field::X, 1).unwrap(), Some(1.0));
        assert_eq!(source.particle_value(1, Field::X, 2).unwrap(), None);
        assert_eq!(source.index_of(1, 2).unwrap(), Some(1));
        assert_eq!(source.index_of(1, 1).unwrap(), None);
        assert_eq!(source.step_len(1).unwrap(), 2);
    }

    #[test]
    fn test_write_step_keeps_particle_count_without_ids() {
        let mut source = MemorySource::new(vec![make_step(3, 0.0), make_step(3, 1.0)]).unwrap();
        assert_eq!(source.index_of(0, 2).unwrap(), Some(2));
        assert_eq!(source.index_of(0, 3).unwrap(), None);
        assert!(matches!(
            source.write_step(1, &make_step(2, 0.0)),
            Err(DatasourceError::InconsistentParticleCount {
                step: 1,
                expected: 3,
                found: 2
            })
        ));
        assert_eq!(source.step_len(1).unwrap(), 3);

        let mut shrunk = make_step(2, 0.0);
        shrunk
            .insert(Field::Id, ArrayWrapper::from(vec![0.0, 2.0]))
            .unwrap();
        source.write_step(1, &shrunk).unwrap();
        assert_eq!(source.step_len(1).unwrap(), 2);
    }

    #[test]
    fn test_memory_source_close() {
        let mut source = MemorySource::single(make_step(2, 1.0)).unwrap();
        assert!(!source.is_file_backed());
        source.write_step(0, &make_step(2, 5.0)).unwrap();
        assert_eq!(source.field(0, Field::Y).unwrap().unwrap()[0], 5.0);
        assert!(matches!(
            source.write_step(1, &make_step(2, 0.0)),
            Err(DatasourceError::MissingStep(1))
        ));
        source.close().unwrap();
        assert!(matches!(source.step(0), Err(DatasourceError::Closed)));
        assert!(source.close().is_err());
    }
}
