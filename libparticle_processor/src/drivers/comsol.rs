use fxhash::FxHashMap;
use std::io::Write;
use std::path::Path;
use time::OffsetDateTime;

use super::text::{create_writer, parse_floats, read_text};
use super::Driver;
use crate::array_wrapper::ArrayWrapper;
use crate::dataset::Dataset;
use crate::datasource::{Field, MemorySource, StepData, StepSource};
use crate::error::DriverError;
use crate::kinematics::{
    beta_gamma_from_kinetic, beta_gamma_from_velocity, kinetic_from_beta_gamma, magnitude,
    split_along, velocity_from_beta_gamma,
};
use crate::species::IonSpecies;
use crate::transfer::ImportedData;

const HEADER_LINES: usize = 8;
/// Line holding the particle count, 1-based
const NODES_LINE: usize = 5;
/// Line naming the tuple columns, 1-based
const COLUMNS_LINE: usize = 8;
/// t (s), x, y, z (m), vx, vy, vz (m/s), E (MeV)
const TUPLE_LEN: usize = 8;
/// t (s), x, y, z (m), vx, vy, vz (m/s)
const TUPLE_LEN_NO_ENERGY: usize = 7;

/// COMSOL particle tracing exports: one line per particle, holding its ID followed by one
/// tuple per step the particle survived. Steps are padded with NaN for dead particles.
#[derive(Debug, Clone, Copy, Default)]
pub struct COMSOLDriver;

/// Step arrays in the order they are filled from a tuple
struct StepColumns {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    px: Vec<f64>,
    py: Vec<f64>,
    pz: Vec<f64>,
    energy: Vec<f64>,
}

impl StepColumns {
    fn new(npart: usize) -> Self {
        Self {
            x: vec![f64::NAN; npart],
            y: vec![f64::NAN; npart],
            z: vec![f64::NAN; npart],
            px: vec![f64::NAN; npart],
            py: vec![f64::NAN; npart],
            pz: vec![f64::NAN; npart],
            energy: vec![f64::NAN; npart],
        }
    }

    fn into_step(self, ids: &ArrayWrapper) -> Result<StepData, DriverError> {
        Ok(StepData::from_fields([
            (Field::X, ArrayWrapper::from(self.x)),
            (Field::Y, ArrayWrapper::from(self.y)),
            (Field::Z, ArrayWrapper::from(self.z)),
            (Field::Px, ArrayWrapper::from(self.px)),
            (Field::Py, ArrayWrapper::from(self.py)),
            (Field::Pz, ArrayWrapper::from(self.pz)),
            (Field::Energy, ArrayWrapper::from(self.energy)),
            (Field::Id, ids.clone()),
        ])?)
    }
}

/// Map particle id -> index for a step. Steps without ids use their index.
fn id_lookup(data: &StepData) -> FxHashMap<u64, usize> {
    match data.get(Field::Id) {
        Some(ids) => ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id as u64, idx))
            .collect(),
        None => (0..data.len()).map(|idx| (idx as u64, idx)).collect(),
    }
}

/// Tuple width named by the column header, 8 unless it lists exactly 7 columns
fn tuple_len(columns: &str) -> usize {
    let names = columns.trim_start_matches('%').split_whitespace().count();
    if names == TUPLE_LEN_NO_ENERGY {
        TUPLE_LEN_NO_ENERGY
    } else {
        TUPLE_LEN
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{}-{:02}-{:02} {:02}:{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute()
    )
}

impl Driver for COMSOLDriver {
    fn program_name(&self) -> &'static str {
        "COMSOL"
    }

    fn import_data(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let contents = read_text(path)?;
        let lines: Vec<&str> = contents.lines().collect();
        if lines.len() < HEADER_LINES {
            return Err(DriverError::BadFormat {
                line: lines.len(),
                reason: String::from("header is incomplete"),
            });
        }
        for line in lines.iter().take(HEADER_LINES) {
            spdlog::debug!("{line}");
        }
        let declared: usize = lines[NODES_LINE - 1]
            .split_whitespace()
            .last()
            .ok_or_else(|| DriverError::BadFormat {
                line: NODES_LINE,
                reason: String::from("missing particle count"),
            })?
            .parse()?;
        let width = tuple_len(lines[COLUMNS_LINE - 1]);

        // Rows are (1-based id, flattened tuples)
        let mut rows: Vec<(u64, Vec<f64>)> = Vec::new();
        let mut n_steps = 0;
        for (idx, line) in lines.iter().enumerate().skip(HEADER_LINES) {
            if line.trim().is_empty() {
                continue;
            }
            let mut values = parse_floats(line, idx + 1)?;
            if values.is_empty() {
                continue;
            }
            let id = values.remove(0);
            if !id.is_finite() || id.fract() != 0.0 || id < 1.0 || id > u32::MAX as f64 {
                return Err(DriverError::BadFormat {
                    line: idx + 1,
                    reason: format!("{id} is not a valid particle id"),
                });
            }
            if values.len() % width != 0 {
                return Err(DriverError::BadFormat {
                    line: idx + 1,
                    reason: format!(
                        "{} values do not split into {width}-tuples",
                        values.len()
                    ),
                });
            }
            n_steps = n_steps.max(values.len() / width);
            rows.push((id as u64, values));
        }
        if rows.is_empty() || n_steps == 0 {
            return Err(DriverError::NoParticles(path.to_path_buf()));
        }
        if rows.len() != declared {
            return Err(DriverError::BadFormat {
                line: NODES_LINE,
                reason: format!(
                    "header declares {declared} particles but the file holds {} trajectories",
                    rows.len()
                ),
            });
        }
        rows.sort_by_key(|(id, _)| *id);
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(DriverError::BadFormat {
                line: NODES_LINE,
                reason: format!("particle id {} appears more than once", pair[0].0),
            });
        }

        let npart = rows.len();
        let mut steps: Vec<StepColumns> = (0..n_steps).map(|_| StepColumns::new(npart)).collect();
        for (index, (_, values)) in rows.iter().enumerate() {
            for (step, tuple) in values.chunks_exact(width).enumerate() {
                let columns = &mut steps[step];
                let velocity = [tuple[4], tuple[5], tuple[6]];
                let (p, energy) = match tuple.get(7) {
                    Some(energy) => (
                        split_along(
                            beta_gamma_from_kinetic(*energy, species.mass_mev()),
                            velocity,
                        ),
                        *energy,
                    ),
                    None => {
                        let p = beta_gamma_from_velocity(velocity);
                        (p, kinetic_from_beta_gamma(magnitude(p), species.mass_mev()))
                    }
                };
                columns.x[index] = tuple[1];
                columns.y[index] = tuple[2];
                columns.z[index] = tuple[3];
                columns.px[index] = p[0];
                columns.py[index] = p[1];
                columns.pz[index] = p[2];
                columns.energy[index] = energy;
            }
        }

        let alive: Vec<f64> = steps[0]
            .energy
            .iter()
            .copied()
            .filter(|energy| energy.is_finite())
            .collect();
        let mut ion = species.clone();
        let energy = if alive.is_empty() {
            None
        } else {
            Some(alive.iter().sum::<f64>() / alive.len() as f64)
        };
        if let Some(energy) = energy {
            ion.calculate_from_total_energy_mev(energy);
        }

        let ids: ArrayWrapper = rows.iter().map(|(id, _)| (id - 1) as f64).collect();
        let steps = steps
            .into_iter()
            .map(|columns| columns.into_step(&ids))
            .collect::<Result<Vec<_>, _>>()?;
        spdlog::debug!("Found {n_steps} steps and {npart} particles");
        let source = MemorySource::new(steps)?;
        let data = ImportedData::new(Box::new(source), ion, npart).with_current(0.0);
        Ok(match energy {
            Some(energy) => data.with_energy(energy),
            None => data,
        })
    }

    fn export_data(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        let source = dataset.datasource().ok_or(DriverError::EmptyDataset)?;
        let ion = dataset.ion();
        let steps = (0..source.n_steps())
            .map(|step| source.step(step))
            .collect::<Result<Vec<_>, _>>()?;
        let first = steps.first().ok_or(DriverError::EmptyDataset)?;
        let particle_ids: Vec<u64> = match first.get(Field::Id) {
            Some(ids) => ids.iter().map(|id| *id as u64).collect(),
            None => (0..first.len() as u64).collect(),
        };
        let lookups: Vec<FxHashMap<u64, usize>> = steps.iter().map(id_lookup).collect();

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut outfile = create_writer(path)?;
        writeln!(outfile, "% Model:              {stem}")?;
        writeln!(outfile, "% Version:            {}", env!("CARGO_PKG_NAME"))?;
        writeln!(outfile, "% Date:               {}", timestamp())?;
        writeln!(outfile, "% Dimension:          3")?;
        writeln!(outfile, "% Nodes:              {}", particle_ids.len())?;
        writeln!(outfile, "% Expressions:        {}", TUPLE_LEN * steps.len())?;
        writeln!(outfile, "% Description:        Particle trajectories")?;
        writeln!(outfile, "% t x y z vx vy vz E")?;

        for id in particle_ids.iter() {
            let mut line = format!("{}", id + 1);
            for (step, (data, lookup)) in steps.iter().zip(lookups.iter()).enumerate() {
                let Some(idx) = lookup.get(id).copied() else {
                    break;
                };
                let mut values = [0.0; 6];
                for (value, field) in values.iter_mut().zip(Field::REQUIRED) {
                    *value = data.require(field)?[idx];
                }
                if values.iter().any(|value| value.is_nan()) {
                    break;
                }
                let p = [values[3], values[4], values[5]];
                let v = velocity_from_beta_gamma(p);
                let energy = kinetic_from_beta_gamma(magnitude(p), ion.mass_mev());
                line.push_str(&format!(
                    " {} {} {} {} {} {} {} {}",
                    step as f64, values[0], values[1], values[2], v[0], v[1], v[2], energy
                ));
            }
            writeln!(outfile, "{line}")?;
        }
        outfile.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    fn two_step_source(ion: &IonSpecies) -> MemorySource {
        let bg = beta_gamma_from_kinetic(0.07, ion.mass_mev());
        let step0 = StepData::from_fields([
            (Field::X, ArrayWrapper::from(vec![0.01, 0.02, 0.03])),
            (Field::Y, ArrayWrapper::from(vec![0.0, -0.01, 0.01])),
            (Field::Z, ArrayWrapper::from(vec![0.0, 0.0, 0.0])),
            (Field::Px, ArrayWrapper::from(vec![0.0, 1e-4, -1e-4])),
            (Field::Py, ArrayWrapper::from(vec![1e-4, 0.0, 0.0])),
            (Field::Pz, ArrayWrapper::from(vec![bg, bg, bg])),
            (Field::Id, ArrayWrapper::from(vec![0.0, 1.0, 2.0])),
        ])
        .unwrap();
        // Particle 1 is lost after the first step
        let step1 = StepData::from_fields([
            (Field::X, ArrayWrapper::from(vec![0.011, 0.031])),
            (Field::Y, ArrayWrapper::from(vec![0.001, 0.011])),
            (Field::Z, ArrayWrapper::from(vec![0.1, 0.1])),
            (Field::Px, ArrayWrapper::from(vec![0.0, -1e-4])),
            (Field::Py, ArrayWrapper::from(vec![1e-4, 0.0])),
            (Field::Pz, ArrayWrapper::from(vec![bg, bg])),
            (Field::Id, ArrayWrapper::from(vec![0.0, 2.0])),
        ])
        .unwrap();
        MemorySource::new(vec![step0, step1]).unwrap()
    }

    #[test]
    fn test_export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.txt");
        let ion = IonSpecies::from_str("H2_1+").unwrap();
        let data = ImportedData::new(Box::new(two_step_source(&ion)), ion.clone(), 3);
        let dataset = Dataset::from_imported(data, "tracks");
        COMSOLDriver.export_data(&dataset, &path).unwrap();

        let imported = COMSOLDriver.import_data(&path, &ion).unwrap();
        assert_eq!(imported.steps, 2);
        assert_eq!(imported.particles, 3);
        assert_relative_eq!(imported.energy.unwrap(), 0.07, max_relative = 1e-3);

        let step0 = imported.datasource.step(0).unwrap();
        assert_eq!(step0.get(Field::Id).unwrap().to_vec(), vec![0.0, 1.0, 2.0]);
        assert_relative_eq!(step0.get(Field::Px).unwrap()[1], 1e-4, max_relative = 1e-9);

        // The lost particle is NaN-padded so every step keeps the same length
        let step1 = imported.datasource.step(1).unwrap();
        assert_eq!(step1.len(), 3);
        assert!(step1.get(Field::X).unwrap()[1].is_nan());
        assert_relative_eq!(step1.get(Field::X).unwrap()[2], 0.031, max_relative = 1e-12);
    }

    const HEADER: &str = "% Model: a\n% Version: b\n% Date: c\n% Dimension: 3\n% Nodes: 1\n% Expressions: 8\n% Description: d\n% t x y z vx vy vz E\n";

    #[test]
    fn test_bad_tuple_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, format!("{HEADER}1 0.0 0.1 0.2 0.3 1.0 1.0 1.0\n")).unwrap();
        let ion = IonSpecies::from_str("proton").unwrap();
        assert!(matches!(
            COMSOLDriver.import_data(&path, &ion),
            Err(DriverError::BadFormat { line: 9, .. })
        ));

        std::fs::write(
            &path,
            format!("{HEADER}0.5 0.0 0.1 0.2 0.3 1.0 1.0 1.0 0.05\n"),
        )
        .unwrap();
        assert!(matches!(
            COMSOLDriver.import_data(&path, &ion),
            Err(DriverError::BadFormat { line: 9, .. })
        ));
    }

    #[test]
    fn test_particle_count_must_match_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count.txt");
        let ion = IonSpecies::from_str("proton").unwrap();
        let row = "1 0.0 0.1 0.2 0.3 1.0 1.0 1.0 0.05\n";

        for nodes in ["1000000000000000000", "18446744073709551615", "2"] {
            let header = HEADER.replace("% Nodes: 1", &format!("% Nodes: {nodes}"));
            std::fs::write(&path, format!("{header}{row}")).unwrap();
            assert!(matches!(
                COMSOLDriver.import_data(&path, &ion),
                Err(DriverError::BadFormat {
                    line: NODES_LINE,
                    ..
                })
            ));
        }

        let header = HEADER.replace("% Nodes: 1", "% Nodes: 2");
        std::fs::write(&path, format!("{header}{row}{row}")).unwrap();
        assert!(matches!(
            COMSOLDriver.import_data(&path, &ion),
            Err(DriverError::BadFormat {
                line: NODES_LINE,
                ..
            })
        ));
    }

    #[test]
    fn test_sparse_ids_survive_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.txt");
        let ion = IonSpecies::from_str("proton").unwrap();
        let bg = beta_gamma_from_kinetic(0.05, ion.mass_mev());
        let step = StepData::from_fields([
            (Field::X, ArrayWrapper::from(vec![0.01, 0.02, 0.03])),
            (Field::Y, ArrayWrapper::from(vec![0.0; 3])),
            (Field::Z, ArrayWrapper::from(vec![0.0; 3])),
            (Field::Px, ArrayWrapper::from(vec![0.0; 3])),
            (Field::Py, ArrayWrapper::from(vec![0.0; 3])),
            (Field::Pz, ArrayWrapper::from(vec![bg; 3])),
            (Field::Id, ArrayWrapper::from(vec![5.0, 9.0, 11.0])),
        ])
        .unwrap();
        let data = ImportedData::new(
            Box::new(MemorySource::single(step).unwrap()),
            ion.clone(),
            3,
        );
        let dataset = Dataset::from_imported(data, "sparse");
        COMSOLDriver.export_data(&dataset, &path).unwrap();

        let imported = COMSOLDriver.import_data(&path, &ion).unwrap();
        assert_eq!(imported.particles, 3);
        let step0 = imported.datasource.step(0).unwrap();
        assert_eq!(
            step0.get(Field::Id).unwrap().to_vec(),
            vec![5.0, 9.0, 11.0]
        );
        assert_relative_eq!(step0.get(Field::X).unwrap()[2], 0.03, max_relative = 1e-12);
    }

    #[test]
    fn test_tuples_without_energy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_energy.txt");
        let ion = IonSpecies::from_str("proton").unwrap();
        let header = HEADER.replace("% t x y z vx vy vz E", "% t x y z vx vy vz");
        let vz = 0.01 * crate::constants::CLIGHT;
        std::fs::write(
            &path,
            format!("{header}1 0.0 0.001 0.002 0.1 0.0 0.0 {vz} 1e-9 0.001 0.002 0.2 0.0 0.0 {vz}\n"),
        )
        .unwrap();

        let imported = COMSOLDriver.import_data(&path, &ion).unwrap();
        assert_eq!(imported.steps, 2);
        let step1 = imported.datasource.step(1).unwrap();
        let bg = 0.01 / (1.0 - 0.01f64.powi(2)).sqrt();
        assert_relative_eq!(step1.get(Field::Pz).unwrap()[0], bg, max_relative = 1e-12);
        assert_relative_eq!(step1.get(Field::Z).unwrap()[0], 0.2, max_relative = 1e-12);
        assert_relative_eq!(
            step1.get(Field::Energy).unwrap()[0],
            kinetic_from_beta_gamma(bg, ion.mass_mev()),
            max_relative = 1e-9
        );
    }
}
