use serde::{Deserialize, Serialize};
use std::path::Path;

use super::text::{parse_row, read_text};
use super::Driver;
use crate::array_wrapper::ArrayWrapper;
use crate::constants::{AMU_KG, AMU_MEV};
use crate::dataset::Dataset;
use crate::datasource::{Field, MemorySource, StepData};
use crate::error::DriverError;
use crate::kinematics::{beta_gamma_from_velocity, kinetic_from_beta_gamma, magnitude};
use crate::species::IonSpecies;
use crate::transfer::ImportedData;

/// I (A), M (kg), t, x (m), vx (m/s), y (m), vy (m/s), z (m), vz (m/s)
const COLUMNS: usize = 9;
/// Masses closer than this (relative) belong to the same species
const MASS_TOLERANCE: f64 = 1.0e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IBSimuSettings {
    /// Rows with vz at or below this (m/s) are discarded as noise
    pub min_vz: f64,
    /// Which species to keep when a file holds several, in ascending mass order
    pub species_index: Option<usize>,
}

impl Default for IBSimuSettings {
    fn default() -> Self {
        Self {
            min_vz: 5.0e5,
            species_index: None,
        }
    }
}

/// IBSimu particle output. A single file can mix several ion species; they are separated
/// by rest mass.
#[derive(Debug, Clone, Default)]
pub struct IBSimuDriver {
    settings: IBSimuSettings,
}

struct Particle {
    current: f64,
    mass_kg: f64,
    position: [f64; 3],
    velocity: [f64; 3],
}

impl IBSimuDriver {
    pub fn new(settings: IBSimuSettings) -> Self {
        Self { settings }
    }

    fn read_particles(&self, path: &Path) -> Result<Vec<Particle>, DriverError> {
        let contents = read_text(path)?;
        let mut particles = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let values = parse_row(line, idx + 1, COLUMNS)?;
            particles.push(Particle {
                current: values[0],
                mass_kg: values[1],
                position: [values[3], values[5], values[7]],
                velocity: [values[4], values[6], values[8]],
            });
        }
        Ok(particles)
    }

    /// One record per species found, ordered by ascending mass
    fn species_groups(
        &self,
        path: &Path,
        species: &IonSpecies,
    ) -> Result<Vec<ImportedData>, DriverError> {
        let particles = self.read_particles(path)?;
        let total = particles.len();

        let mut masses: Vec<f64> = particles.iter().map(|particle| particle.mass_kg).collect();
        masses.sort_by(f64::total_cmp);
        masses.dedup_by(|next, kept| ((*next - *kept) / *kept).abs() < MASS_TOLERANCE);

        let mut groups = Vec::with_capacity(masses.len());
        for mass_kg in masses {
            let members: Vec<&Particle> = particles
                .iter()
                .filter(|particle| {
                    ((particle.mass_kg - mass_kg) / mass_kg).abs() < MASS_TOLERANCE
                        && particle.velocity[2] > self.settings.min_vz
                })
                .collect();
            if members.is_empty() {
                spdlog::warn!(
                    "Species with mass {mass_kg} kg has no particles above vz = {} m/s",
                    self.settings.min_vz
                );
                continue;
            }

            let mass_mev = mass_kg / AMU_KG * AMU_MEV;
            let (name, q) = if species.same_mass_as(mass_mev) {
                (species.name().to_string(), species.q())
            } else {
                (format!("Species {}", groups.len() + 1), 1.0)
            };
            let mut ion =
                IonSpecies::custom(&name, mass_mev, (mass_mev / AMU_MEV).round(), q)?;

            let mut columns: [Vec<f64>; 7] = Default::default();
            for particle in members.iter() {
                let p = beta_gamma_from_velocity(particle.velocity);
                let values = [
                    particle.position[0],
                    particle.position[1],
                    particle.position[2],
                    p[0],
                    p[1],
                    p[2],
                    kinetic_from_beta_gamma(magnitude(p), mass_mev),
                ];
                for (column, value) in columns.iter_mut().zip(values) {
                    column.push(value);
                }
            }
            let npart = members.len();
            let current: f64 = members.iter().map(|particle| particle.current).sum();
            let energy = columns[6].iter().sum::<f64>() / npart as f64;
            ion.set_current(current);
            ion.calculate_from_total_energy_mev(energy);
            spdlog::info!(
                "Found {} with {npart} particles, {current} A at {energy} MeV",
                ion
            );

            let [x, y, z, px, py, pz, e] = columns;
            let step = StepData::from_fields([
                (Field::X, ArrayWrapper::from(x)),
                (Field::Y, ArrayWrapper::from(y)),
                (Field::Z, ArrayWrapper::from(z)),
                (Field::Px, ArrayWrapper::from(px)),
                (Field::Py, ArrayWrapper::from(py)),
                (Field::Pz, ArrayWrapper::from(pz)),
                (Field::Energy, ArrayWrapper::from(e)),
            ])?;
            let source = MemorySource::single(step)?;
            groups.push(
                ImportedData::new(Box::new(source), ion, npart)
                    .with_current(current)
                    .with_energy(energy),
            );
        }

        if groups.is_empty() {
            return Err(DriverError::NoParticles(path.to_path_buf()));
        }
        let kept: usize = groups.iter().map(|group| group.particles).sum();
        spdlog::info!(
            "Kept {kept} of {total} particles in {} species",
            groups.len()
        );
        Ok(groups)
    }
}

impl Driver for IBSimuDriver {
    fn program_name(&self) -> &'static str {
        "IBSimu"
    }

    fn import_data(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let mut groups = self.species_groups(path, species)?;
        let n_species = groups.len();
        let index = match self.settings.species_index {
            Some(index) if index < n_species => index,
            Some(index) => return Err(DriverError::SpeciesIndexOutOfRange(index, n_species)),
            None if n_species == 1 => 0,
            None => {
                return Err(DriverError::AmbiguousSpecies(
                    groups
                        .iter()
                        .map(|group| format!("a = {:.5}, q = {:.1}", group.ion.a(), group.ion.q()))
                        .collect(),
                ))
            }
        };
        Ok(groups.swap_remove(index))
    }

    fn import_all(
        &self,
        path: &Path,
        species: &IonSpecies,
    ) -> Result<Vec<ImportedData>, DriverError> {
        self.species_groups(path, species)
    }

    fn export_data(&self, _dataset: &Dataset, _path: &Path) -> Result<(), DriverError> {
        Err(DriverError::NotImplemented {
            program: "IBSimu",
            operation: "export",
        })
    }
}
