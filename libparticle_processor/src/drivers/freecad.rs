use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use super::text::create_writer;
use super::Driver;
use crate::dataset::Dataset;
use crate::datasource::{Field, StepData};
use crate::error::DriverError;
use crate::species::IonSpecies;
use crate::transfer::ImportedData;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeCADSettings {
    /// Number of particle trajectories to sample
    pub trajectories: usize,
    /// Write every n-th step
    pub step_stride: usize,
    /// Fixed seed for reproducible sampling
    pub seed: Option<u64>,
}

impl Default for FreeCADSettings {
    fn default() -> Self {
        Self {
            trajectories: 1000,
            step_stride: 5,
            seed: None,
        }
    }
}

/// Trajectory point lists for drawing in FreeCAD. Export only; output is always `.dat`.
#[derive(Debug, Clone, Default)]
pub struct FreeCADDriver {
    settings: FreeCADSettings,
}

impl FreeCADDriver {
    pub fn new(settings: FreeCADSettings) -> Self {
        Self { settings }
    }

    /// Particle identities to follow, drawn from the first step
    fn sample_ids(&self, first: &StepData) -> Vec<usize> {
        let mut rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let amount = self.settings.trajectories.min(first.len());
        let mut indices = rand::seq::index::sample(&mut rng, first.len(), amount).into_vec();
        indices.sort_unstable();
        match first.get(Field::Id) {
            Some(ids) => indices.into_iter().map(|idx| ids[idx] as usize).collect(),
            None => indices,
        }
    }
}

impl Driver for FreeCADDriver {
    fn program_name(&self) -> &'static str {
        "FreeCAD"
    }

    fn import_data(&self, _path: &Path, _species: &IonSpecies) -> Result<ImportedData, DriverError> {
        Err(DriverError::NotImplemented {
            program: "FreeCAD",
            operation: "import",
        })
    }

    fn export_data(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        let source = dataset.datasource().ok_or(DriverError::EmptyDataset)?;
        let path = path.with_extension("dat");
        let first = source.step(0)?;
        let ids = self.sample_ids(&first);
        let stride = self.settings.step_stride.max(1);
        spdlog::info!(
            "Writing {} trajectories over every {stride} of {} steps",
            ids.len(),
            source.n_steps()
        );

        let mut outfile = create_writer(&path)?;
        writeln!(outfile, "step, ID, x (m), y (m), z (m)")?;
        for step in (0..source.n_steps()).step_by(stride) {
            let data = source.step(step)?;
            let (x, y, z) = (
                data.require(Field::X)?,
                data.require(Field::Y)?,
                data.require(Field::Z)?,
            );
            for id in ids.iter() {
                let Some(idx) = data.index_of(*id) else {
                    continue;
                };
                if x[idx].is_nan() {
                    continue;
                }
                writeln!(outfile, "{step} {id} {} {} {}", x[idx], y[idx], z[idx])?;
            }
        }
        outfile.flush()?;
        Ok(())
    }
}
