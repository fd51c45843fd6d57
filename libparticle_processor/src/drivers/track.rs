use serde::{Deserialize, Serialize};
use std::path::Path;

use super::text::{parse_row, read_text};
use super::Driver;
use crate::array_wrapper::ArrayWrapper;
use crate::constants::{CLIGHT, CM_TO_M, MHZ_TO_HZ, MRAD_TO_RAD, NS_TO_S};
use crate::dataset::Dataset;
use crate::datasource::{Field, MemorySource, StepData};
use crate::error::DriverError;
use crate::kinematics::beta_from_gamma;
use crate::species::IonSpecies;
use crate::transfer::ImportedData;

/// nseed, iq, dt (ns), dW (MeV/u), x (cm), xp (mrad), y (cm), yp (mrad)
const COLUMNS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    /// Longitudinal position (m) assigned to dt = 0
    pub z_center: f64,
    /// Particles arriving later than this (ns) are dropped
    pub t_cut: f64,
    /// Particles earlier than this (ns) belong to the preceding bunch
    pub t_split: f64,
    /// Reference kinetic energy of one ion (MeV)
    pub e_mean_total: f64,
    /// Shift the preceding bunch forward by one RF period
    pub align_bunches: bool,
    pub rf_frequency_mhz: f64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            z_center: -0.25,
            t_cut: 10.0,
            t_split: -10.0,
            e_mean_total: 0.07,
            align_bunches: true,
            rf_frequency_mhz: 32.8,
        }
    }
}

/// Output of the Track RFQ code. Import only.
#[derive(Debug, Clone, Default)]
pub struct TrackDriver {
    settings: TrackSettings,
}

impl TrackDriver {
    pub fn new(settings: TrackSettings) -> Self {
        Self { settings }
    }

    /// RF period (ns)
    fn rf_period(&self) -> f64 {
        1.0 / (self.settings.rf_frequency_mhz * MHZ_TO_HZ) / NS_TO_S
    }
}

impl Driver for TrackDriver {
    fn program_name(&self) -> &'static str {
        "Track"
    }

    fn import_data(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let contents = read_text(path)?;
        let mut rows = Vec::new();
        // first line is a header
        for (idx, line) in contents.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(parse_row(line, idx + 1, COLUMNS)?);
        }
        let total = rows.len();
        rows.retain(|row| row[2] <= self.settings.t_cut);
        if rows.is_empty() {
            return Err(DriverError::NoParticles(path.to_path_buf()));
        }

        let mut ion = species.clone();
        let e_mean = self.settings.e_mean_total / ion.a();
        ion.calculate_from_energy_mev(e_mean);

        if self.settings.align_bunches {
            let period = self.rf_period();
            let early = rows
                .iter()
                .filter(|row| row[2] < self.settings.t_split)
                .count();
            if early > 0 {
                spdlog::info!(
                    "Moving {early} particles from the preceding bunch forward by {period:.3} ns"
                );
                for row in rows.iter_mut().filter(|row| row[2] < self.settings.t_split) {
                    row[2] += period;
                }
            }
        }

        let mut columns: [Vec<f64>; 7] = Default::default();
        for row in rows.iter() {
            let (dt, dw) = (row[2], row[3]);
            let (xp, yp) = (row[5] * MRAD_TO_RAD, row[7] * MRAD_TO_RAD);
            let gamma = (dw + e_mean) * ion.a() / ion.mass_mev() + 1.0;
            let beta = beta_from_gamma(gamma);
            let pz = gamma * beta;
            let vz = beta * CLIGHT;
            let values = [
                row[4] * CM_TO_M,
                row[6] * CM_TO_M,
                self.settings.z_center - dt * NS_TO_S * vz,
                pz * xp.tan(),
                pz * yp.tan(),
                pz,
                (gamma - 1.0) * ion.mass_mev(),
            ];
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }
        let particles = rows.len();
        spdlog::info!(
            "Kept {particles} of {total} particles ({} beyond dt = {} ns)",
            total - particles,
            self.settings.t_cut
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
        Ok(ImportedData::new(Box::new(source), ion, particles)
            .with_energy(self.settings.e_mean_total))
    }

    fn export_data(&self, _dataset: &Dataset, _path: &Path) -> Result<(), DriverError> {
        Err(DriverError::NotImplemented {
            program: "Track",
            operation: "export",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::StepSource;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    const FIXTURE: &str = "nseed iq dt dW x xp y yp\n\
        1 1 0.0 0.0 0.1 0.0 -0.2 0.0\n\
        2 1 1.0 0.001 0.0 10.0 0.0 0.0\n\
        3 1 -12.0 0.0 0.0 0.0 0.0 0.0\n\
        4 1 25.0 0.0 0.0 0.0 0.0 0.0\n";

    fn import(settings: TrackSettings) -> ImportedData {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.dat");
        std::fs::write(&path, FIXTURE).unwrap();
        let ion = IonSpecies::from_str("H2_1+").unwrap();
        TrackDriver::new(settings).import_data(&path, &ion).unwrap()
    }

    #[test]
    fn test_cut_and_units() {
        let data = import(TrackSettings::default());
        assert_eq!(data.particles, 3);
        assert_eq!(data.energy, Some(0.07));
        assert_relative_eq!(data.ion.total_energy_mev(), 0.07, max_relative = 1e-12);

        let step = data.datasource.step(0).unwrap();
        let x = step.get(Field::X).unwrap();
        let y = step.get(Field::Y).unwrap();
        assert_relative_eq!(x[0], 0.001, max_relative = 1e-12);
        assert_relative_eq!(y[0], -0.002, max_relative = 1e-12);

        // the reference particle sits at z_center with the reference energy
        let z = step.get(Field::Z).unwrap();
        let e = step.get(Field::Energy).unwrap();
        assert_relative_eq!(z[0], -0.25);
        assert_relative_eq!(e[0], 0.07, max_relative = 1e-9);
        assert_relative_eq!(step.get(Field::Pz).unwrap()[0], data.ion.beta_gamma(), max_relative = 1e-9);

        let px = step.get(Field::Px).unwrap();
        let pz = step.get(Field::Pz).unwrap();
        assert_relative_eq!(px[1], pz[1] * 0.01f64.tan(), max_relative = 1e-12);
        assert!(z[1] < -0.25);
    }

    #[test]
    fn test_bunch_alignment() {
        let aligned = import(TrackSettings::default());
        let raw = import(TrackSettings {
            align_bunches: false,
            ..Default::default()
        });
        let aligned_step = aligned.datasource.step(0).unwrap();
        let raw_step = raw.datasource.step(0).unwrap();
        let aligned_z = aligned_step.get(Field::Z).unwrap();
        let raw_z = raw_step.get(Field::Z).unwrap();
        // particle from the preceding bunch lands behind z_center only once shifted
        assert!(raw_z[2] > -0.25);
        assert!(aligned_z[2] < -0.25);
        assert_relative_eq!(aligned_z[0], raw_z[0]);
    }

    #[test]
    fn test_export_not_implemented() {
        let data = import(TrackSettings::default());
        let dataset = Dataset::from_imported(data, "track");
        assert!(matches!(
            TrackDriver::default().export_data(&dataset, Path::new("out.dat")),
            Err(DriverError::NotImplemented { program: "Track", .. })
        ));
    }
}
