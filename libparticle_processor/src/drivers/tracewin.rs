use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::io::{Cursor, Write};
use std::path::Path;

use super::text::{create_writer, extension, parse_row, read_bytes, read_text};
use super::Driver;
use crate::array_wrapper::ArrayWrapper;
use crate::constants::{CLIGHT, CM_TO_M, MA_TO_A, MHZ_TO_HZ, MM_TO_M, MRAD_TO_RAD};
use crate::dataset::Dataset;
use crate::datasource::{Field, MemorySource, StepData, StepSource};
use crate::error::DriverError;
use crate::kinematics::{
    beta_from_beta_gamma, beta_gamma_from_kinetic, kinetic_from_beta_gamma, magnitude,
};
use crate::species::IonSpecies;
use crate::transfer::ImportedData;

/// Columns of a TraceWin text distribution: x xp y yp z zp phase t energy loss
const TEXT_COLUMNS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceWinSettings {
    /// RF frequency used for phases on export (MHz)
    pub frequency_mhz: f64,
}

impl Default for TraceWinSettings {
    fn default() -> Self {
        Self {
            frequency_mhz: 32.8,
        }
    }
}

/// TraceWin particle distributions, as text (`.txt`, `.dat`) or binary partran (`.dst`)
#[derive(Debug, Clone, Default)]
pub struct TraceWinDriver {
    settings: TraceWinSettings,
}

/// One particle in m, rad and MeV (kinetic)
struct Row {
    x: f64,
    xp: f64,
    y: f64,
    yp: f64,
    z: f64,
    energy: f64,
}

/// Convert angles and energies into normalized momenta
fn build_step(rows: &[Row], ion: &IonSpecies) -> Result<StepData, DriverError> {
    let mut x = Vec::with_capacity(rows.len());
    let mut y = Vec::with_capacity(rows.len());
    let mut z = Vec::with_capacity(rows.len());
    let mut px = Vec::with_capacity(rows.len());
    let mut py = Vec::with_capacity(rows.len());
    let mut pz = Vec::with_capacity(rows.len());
    let mut energy = Vec::with_capacity(rows.len());
    for row in rows {
        let bg = beta_gamma_from_kinetic(row.energy, ion.mass_mev());
        let row_px = bg * row.xp.sin();
        let row_py = bg * row.yp.sin();
        x.push(row.x);
        y.push(row.y);
        z.push(row.z);
        px.push(row_px);
        py.push(row_py);
        pz.push((bg * bg - row_px * row_px - row_py * row_py).max(0.0).sqrt());
        energy.push(row.energy);
    }
    Ok(StepData::from_fields([
        (Field::X, ArrayWrapper::from(x)),
        (Field::Y, ArrayWrapper::from(y)),
        (Field::Z, ArrayWrapper::from(z)),
        (Field::Px, ArrayWrapper::from(px)),
        (Field::Py, ArrayWrapper::from(py)),
        (Field::Pz, ArrayWrapper::from(pz)),
        (Field::Energy, ArrayWrapper::from(energy)),
    ])?)
}

/// Inverse of `build_step` for one particle: (x, xp, y, yp, z, energy) in m/rad/MeV.
/// `None` for particles carrying NaN.
fn particle_row(data: &StepData, idx: usize, ion: &IonSpecies) -> Result<Option<Row>, DriverError> {
    let mut values = [0.0; 6];
    for (value, field) in values.iter_mut().zip(Field::REQUIRED) {
        *value = data.require(field)?[idx];
    }
    if values.iter().any(|value| value.is_nan()) {
        return Ok(None);
    }
    let [x, y, z, px, py, pz] = values;
    let bg = magnitude([px, py, pz]);
    let (xp, yp) = if bg > 0.0 {
        ((px / bg).asin(), (py / bg).asin())
    } else {
        (0.0, 0.0)
    };
    Ok(Some(Row {
        x,
        xp,
        y,
        yp,
        z,
        energy: kinetic_from_beta_gamma(bg, ion.mass_mev()),
    }))
}

fn check_species(path: &Path, species: &IonSpecies, mass: f64, charge: Option<f64>) {
    if !species.same_mass_as(mass) {
        spdlog::warn!(
            "{} was written for a rest mass of {mass} MeV but {} has {} MeV",
            path.display(),
            species.name(),
            species.mass_mev()
        );
    }
    if let Some(charge) = charge {
        if charge != species.q() {
            spdlog::warn!(
                "{} was written for charge state {charge} but {} has {}",
                path.display(),
                species.name(),
                species.q()
            );
        }
    }
}

fn format_error(line: usize, reason: &str) -> DriverError {
    DriverError::BadFormat {
        line,
        reason: reason.to_string(),
    }
}

impl TraceWinDriver {
    pub fn new(settings: TraceWinSettings) -> Self {
        Self { settings }
    }

    fn frequency_hz(&self) -> f64 {
        self.settings.frequency_mhz * MHZ_TO_HZ
    }

    fn import_text(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let contents = read_text(path)?;
        let mut lines = contents.lines().enumerate();

        let (_, banner) = lines
            .next()
            .ok_or_else(|| format_error(1, "missing header"))?;
        spdlog::debug!("{banner}");

        let (idx, globals) = lines
            .next()
            .ok_or_else(|| format_error(2, "missing beam parameters"))?;
        let globals = parse_row(globals, idx + 1, 6)?;
        let [npart, mass, energy, frequency, current, charge] =
            [globals[0], globals[1], globals[2], globals[3], globals[4], globals[5]];
        spdlog::debug!(
            "TraceWin header: {npart} particles, {mass} MeV, {energy} MeV, {frequency} MHz, {current} A, q = {charge}"
        );
        check_species(path, species, mass, Some(charge));

        let (_, columns) = lines
            .next()
            .ok_or_else(|| format_error(3, "missing column header"))?;
        spdlog::debug!("{columns}");

        let mut rows = Vec::new();
        let mut lost = 0;
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let values = parse_row(line, idx + 1, TEXT_COLUMNS)?;
            if values[TEXT_COLUMNS - 1] != 0.0 {
                lost += 1;
                continue;
            }
            rows.push(Row {
                x: values[0] * MM_TO_M,
                xp: values[1] * MRAD_TO_RAD,
                y: values[2] * MM_TO_M,
                yp: values[3] * MRAD_TO_RAD,
                z: values[4] * MM_TO_M,
                energy: values[8],
            });
        }
        if rows.is_empty() {
            return Err(DriverError::NoParticles(path.to_path_buf()));
        }
        spdlog::info!(
            "Kept {} particles, dropped {lost} flagged as lost",
            rows.len()
        );

        let mut ion = species.clone();
        ion.calculate_from_total_energy_mev(energy);
        ion.set_current(current);
        let step = build_step(&rows, &ion)?;
        let source = MemorySource::single(step)?;
        Ok(ImportedData::new(Box::new(source), ion, rows.len())
            .with_current(current)
            .with_energy(energy))
    }

    fn import_dst(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        let bytes = read_bytes(path)?;
        let mut cursor = Cursor::new(bytes);
        cursor.read_u8()?;
        cursor.read_u8()?;
        let npart = cursor.read_i32::<LittleEndian>()?;
        let current_ma = cursor.read_f64::<LittleEndian>()?;
        let frequency_mhz = cursor.read_f64::<LittleEndian>()?;
        cursor.read_u8()?;
        let npart = usize::try_from(npart)
            .map_err(|_| format_error(1, "negative particle count"))?;

        let omega = 2.0 * PI * frequency_mhz * MHZ_TO_HZ;
        let mut raw = Vec::with_capacity(npart);
        for _ in 0..npart {
            let mut values = [0.0; 6];
            cursor.read_f64_into::<LittleEndian>(&mut values)?;
            raw.push(values);
        }
        let mass = cursor.read_f64::<LittleEndian>()?;
        check_species(path, species, mass, None);
        if npart == 0 {
            return Err(DriverError::NoParticles(path.to_path_buf()));
        }

        // x (cm) xp (rad) y (cm) yp (rad) phi (rad) W (MeV)
        let rows: Vec<Row> = raw
            .iter()
            .map(|values| {
                let beta =
                    beta_from_beta_gamma(beta_gamma_from_kinetic(values[5], species.mass_mev()));
                Row {
                    x: values[0] * CM_TO_M,
                    xp: values[1],
                    y: values[2] * CM_TO_M,
                    yp: values[3],
                    z: -values[4] * beta * CLIGHT / omega,
                    energy: values[5],
                }
            })
            .collect();
        let mean_energy = rows.iter().map(|row| row.energy).sum::<f64>() / npart as f64;
        let current = current_ma * MA_TO_A;

        let mut ion = species.clone();
        ion.calculate_from_total_energy_mev(mean_energy);
        ion.set_current(current);
        let step = build_step(&rows, &ion)?;
        let source = MemorySource::single(step)?;
        Ok(ImportedData::new(Box::new(source), ion, npart)
            .with_current(current)
            .with_energy(mean_energy))
    }

    fn export_step(&self, dataset: &Dataset) -> Result<StepData, DriverError> {
        let source = dataset.datasource().ok_or(DriverError::EmptyDataset)?;
        let step = dataset.current_step().unwrap_or(0);
        if source.n_steps() > 1 {
            spdlog::warn!("TraceWin distributions hold a single step, exporting step {step}");
        }
        let data = source.step(step)?;
        data.validate_required()?;
        Ok(data)
    }

    fn export_text(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        let data = self.export_step(dataset)?;
        let ion = dataset.ion();
        let frequency = self.frequency_hz();
        let reference = ion.beta_gamma();

        let mut rows = Vec::with_capacity(data.len());
        for idx in 0..data.len() {
            if let Some(row) = particle_row(&data, idx, ion)? {
                rows.push(row);
            }
        }

        let mut outfile = create_writer(path)?;
        writeln!(outfile, "TraceWin distribution")?;
        writeln!(
            outfile,
            "{} {} {} {} {} {}",
            rows.len(),
            ion.mass_mev(),
            ion.total_energy_mev(),
            self.settings.frequency_mhz,
            dataset.current().unwrap_or(0.0),
            ion.q()
        )?;
        writeln!(
            outfile,
            "x(mm) xp(mrad) y(mm) yp(mrad) z(mm) zp(mrad) phase(deg) time(s) energy(MeV) loss"
        )?;
        for row in rows.iter() {
            let bg = beta_gamma_from_kinetic(row.energy, ion.mass_mev());
            let zp = if reference > 0.0 {
                (bg - reference) / reference
            } else {
                0.0
            };
            let beta = beta_from_beta_gamma(bg);
            let time = if beta > 0.0 {
                -row.z / (beta * CLIGHT)
            } else {
                0.0
            };
            writeln!(
                outfile,
                "{} {} {} {} {} {} {} {} {} 0",
                row.x / MM_TO_M,
                row.xp / MRAD_TO_RAD,
                row.y / MM_TO_M,
                row.yp / MRAD_TO_RAD,
                row.z / MM_TO_M,
                zp / MRAD_TO_RAD,
                360.0 * frequency * time,
                time,
                row.energy
            )?;
        }
        outfile.flush()?;
        Ok(())
    }

    fn export_dst(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        let data = self.export_step(dataset)?;
        let ion = dataset.ion();
        let omega = 2.0 * PI * self.frequency_hz();

        let mut rows = Vec::with_capacity(data.len());
        for idx in 0..data.len() {
            if let Some(row) = particle_row(&data, idx, ion)? {
                rows.push(row);
            }
        }
        let npart = i32::try_from(rows.len())
            .map_err(|_| format_error(0, "too many particles for a .dst file"))?;

        let mut outfile = create_writer(path)?;
        outfile.write_u8(0)?;
        outfile.write_u8(0)?;
        outfile.write_i32::<LittleEndian>(npart)?;
        outfile.write_f64::<LittleEndian>(dataset.current().unwrap_or(0.0) / MA_TO_A)?;
        outfile.write_f64::<LittleEndian>(self.settings.frequency_mhz)?;
        outfile.write_u8(0)?;
        for row in rows.iter() {
            let beta = beta_from_beta_gamma(beta_gamma_from_kinetic(row.energy, ion.mass_mev()));
            let phase = if beta > 0.0 {
                -row.z * omega / (beta * CLIGHT)
            } else {
                0.0
            };
            for value in [
                row.x / CM_TO_M,
                row.xp,
                row.y / CM_TO_M,
                row.yp,
                phase,
                row.energy,
            ] {
                outfile.write_f64::<LittleEndian>(value)?;
            }
        }
        outfile.write_f64::<LittleEndian>(ion.mass_mev())?;
        outfile.flush()?;
        Ok(())
    }
}

impl Driver for TraceWinDriver {
    fn program_name(&self) -> &'static str {
        "TraceWin"
    }

    fn import_data(&self, path: &Path, species: &IonSpecies) -> Result<ImportedData, DriverError> {
        match extension(path).as_deref() {
            Some("dst") => self.import_dst(path, species),
            _ => self.import_text(path, species),
        }
    }

    fn export_data(&self, dataset: &Dataset, path: &Path) -> Result<(), DriverError> {
        match extension(path).as_deref() {
            Some("dst") => self.export_dst(dataset, path),
            _ => self.export_text(dataset, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::text::parse_floats;
    use crate::drivers::DriverSettings;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    fn read_text_header(path: &Path) -> Vec<f64> {
        let contents = read_text(path).unwrap();
        parse_floats(contents.lines().nth(1).unwrap(), 2).unwrap()
    }

    const DISTRIBUTION: &str = "\
TraceWin banner
4 938.272 10.0 32.8 0.005 1
x(mm) xp(mrad) y(mm) yp(mrad) z(mm) zp(mrad) phase t E loss
1.0 2.0 -1.0 -3.0 0.5 0.0 0.0 0.0 10.0 0
-2.0 0.0 2.0 1.0 -0.5 0.0 0.0 0.0 10.1 0
99.0 99.0 99.0 99.0 99.0 0.0 0.0 0.0 9.0 1
0.0 -1.5 0.0 0.5 0.0 0.0 0.0 0.0 9.9 0
";

    fn write_distribution(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("dist.txt");
        std::fs::write(&path, DISTRIBUTION).unwrap();
        path
    }

    #[test]
    fn test_lost_particles_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_distribution(dir.path());
        let ion = IonSpecies::from_str("proton").unwrap();

        let mut dataset = Dataset::new(ion);
        dataset
            .load_from_file(&path, "TraceWin", "dist", &DriverSettings::default())
            .unwrap();
        assert_eq!(dataset.steps(), 1);
        assert_eq!(dataset.particles(), 3);
        dataset.set_step_view(0).unwrap();
        for key in ["x", "y", "z", "px", "py", "pz"] {
            let values = dataset.get(key).unwrap();
            assert_eq!(values.len(), 3);
        }
        for key in ["x", "y", "z"] {
            assert!(dataset
                .get(key)
                .unwrap()
                .iter()
                .all(|value| (value - 0.099).abs() > 1e-9));
        }
        assert_eq!(dataset.current(), Some(0.005));
    }

    #[test]
    fn test_unit_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_distribution(dir.path());
        let ion = IonSpecies::from_str("proton").unwrap();
        let data = TraceWinDriver::default().import_data(&path, &ion).unwrap();
        let step = data.datasource.step(0).unwrap();

        assert_relative_eq!(step.get(Field::X).unwrap()[0], 1.0e-3);
        let energies = [10.0, 10.1, 9.9];
        let xps = [2.0e-3, 0.0, -1.5e-3];
        for idx in 0..3 {
            let bg = beta_gamma_from_kinetic(energies[idx], ion.mass_mev());
            let px = step.get(Field::Px).unwrap()[idx];
            let py = step.get(Field::Py).unwrap()[idx];
            let pz = step.get(Field::Pz).unwrap()[idx];
            assert_relative_eq!(px, bg * xps[idx].sin(), epsilon = 1e-15);
            assert_relative_eq!(px * px + py * py + pz * pz, bg * bg, max_relative = 1e-12);
        }
        assert_relative_eq!(data.ion.total_energy_mev(), 10.0, max_relative = 1e-12);
    }

    #[test]
    fn test_text_export_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_distribution(dir.path());
        let ion = IonSpecies::from_str("proton").unwrap();
        let driver = TraceWinDriver::default();
        let data = driver.import_data(&path, &ion).unwrap();
        let original = data.datasource.step(0).unwrap();
        let mut dataset = Dataset::from_imported(data, "dist");

        let out = dir.path().join("copy.txt");
        driver.export_data(&dataset, &out).unwrap();
        let header = read_text_header(&out);
        assert_eq!(header[0], 3.0);
        assert_eq!(header[4], 0.005);

        let copy = driver.import_data(&out, &ion).unwrap();
        let copy = copy.datasource.step(0).unwrap();
        for field in Field::REQUIRED {
            let a = original.get(field).unwrap();
            let b = copy.get(field).unwrap();
            for idx in 0..3 {
                assert_relative_eq!(a[idx], b[idx], epsilon = 1e-12, max_relative = 1e-9);
            }
        }
        dataset.close().unwrap();
    }

    #[test]
    fn test_dst_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_distribution(dir.path());
        let ion = IonSpecies::from_str("proton").unwrap();
        let driver = TraceWinDriver::default();
        let data = driver.import_data(&path, &ion).unwrap();
        let original = data.datasource.step(0).unwrap();
        let dataset = Dataset::from_imported(data, "dist");

        let out = dir.path().join("copy.dst");
        driver.export_data(&dataset, &out).unwrap();
        let copy = driver.import_data(&out, &ion).unwrap();
        assert_eq!(copy.particles, 3);
        assert_relative_eq!(copy.current.unwrap(), 0.005, max_relative = 1e-12);
        let copy = copy.datasource.step(0).unwrap();
        for field in Field::REQUIRED {
            let a = original.get(field).unwrap();
            let b = copy.get(field).unwrap();
            for idx in 0..3 {
                assert_relative_eq!(a[idx], b[idx], epsilon = 1e-12, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_truncated_dst() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.dst");
        std::fs::write(&path, [0u8, 0, 5, 0]).unwrap();
        let ion = IonSpecies::from_str("proton").unwrap();
        assert!(matches!(
            TraceWinDriver::default().import_data(&path, &ion),
            Err(DriverError::IOError(_))
        ));
    }
}
