use super::datasource::StepSource;
use super::species::IonSpecies;

/// Version of the `ImportedData` layout. Bump whenever a field is added or changes meaning.
pub const TRANSFER_VERSION: u32 = 1;

/// The record every driver hands to a `Dataset` after a successful import.
///
/// Required: the step source, the species, the mass (amu), the charge state (e), and the
/// step and particle counts. Current (A) and reference kinetic energy (MeV, per ion) are
/// only present when the file format records them.
#[derive(Debug)]
pub struct ImportedData {
    pub version: u32,
    pub datasource: Box<dyn StepSource>,
    pub ion: IonSpecies,
    pub mass: f64,
    pub charge: f64,
    pub steps: usize,
    pub particles: usize,
    pub current: Option<f64>,
    pub energy: Option<f64>,
}

impl ImportedData {
    /// Mass, charge and step count are taken from the species and the source
    pub fn new(
        datasource: Box<dyn StepSource>,
        ion: IonSpecies,
        particles: usize,
    ) -> Self {
        Self {
            version: TRANSFER_VERSION,
            steps: datasource.n_steps(),
            datasource,
            mass: ion.a(),
            charge: ion.q(),
            ion,
            particles,
            current: None,
            energy: None,
        }
    }

    pub fn with_current(mut self, current: f64) -> Self {
        self.current = Some(current);
        self
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_wrapper::ArrayWrapper;
    use crate::datasource::{Field, MemorySource, StepData};
    use std::str::FromStr;

    #[test]
    fn test_counts_follow_source() {
        let step = StepData::from_fields(
            Field::REQUIRED
                .into_iter()
                .map(|field| (field, ArrayWrapper::zeros(4))),
        )
        .unwrap();
        let source = MemorySource::new(vec![step.clone(), step]).unwrap();
        let ion = IonSpecies::from_str("H2_1+").unwrap();
        let data = ImportedData::new(Box::new(source), ion, 4).with_current(0.01);
        assert_eq!(data.version, TRANSFER_VERSION);
        assert_eq!(data.steps, 2);
        assert_eq!(data.particles, 4);
        assert_eq!(data.charge, 1.0);
        assert_eq!(data.current, Some(0.01));
        assert_eq!(data.energy, None);
    }
}
