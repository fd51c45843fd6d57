use std::fmt::Display;
use std::str::FromStr;

use super::constants::{AMU_MEV, ELECTRON_MASS_MEV};
use super::error::SpeciesError;
use super::kinematics::{beta_from_gamma, gamma_from_kinetic};

/// An ion species together with the beam energy and current it is carried at.
///
/// Masses are stored both as rest energy (MeV) and in atomic mass units. The kinetic
/// energy is stored per amu (MeV/u), which is how most accelerator codes quote it;
/// `total_energy_mev` gives the kinetic energy of one ion.
#[derive(Debug, Clone, PartialEq)]
pub struct IonSpecies {
    name: String,
    mass_mev: f64,
    a: f64,
    z: f64,
    q: f64,
    energy_mev: f64,
    current: f64,
}

impl IonSpecies {
    /// Build a species from its rest energy. Energy and current start at zero.
    pub fn custom(name: &str, mass_mev: f64, z: f64, q: f64) -> Result<Self, SpeciesError> {
        if mass_mev <= 0.0 || !mass_mev.is_finite() {
            return Err(SpeciesError::BadMass(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            mass_mev,
            a: mass_mev / AMU_MEV,
            z,
            q,
            energy_mev: 0.0,
            current: 0.0,
        })
    }

    fn preset(name: &str, a: f64, z: f64, q: f64) -> Self {
        Self {
            name: name.to_string(),
            mass_mev: a * AMU_MEV,
            a,
            z,
            q,
            energy_mev: 0.0,
            current: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rest energy (MeV)
    pub fn mass_mev(&self) -> f64 {
        self.mass_mev
    }

    /// Mass (amu)
    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    /// Charge state (e)
    pub fn q(&self) -> f64 {
        self.q
    }

    /// Kinetic energy per amu (MeV/u)
    pub fn energy_mev(&self) -> f64 {
        self.energy_mev
    }

    /// Kinetic energy of a single ion (MeV)
    pub fn total_energy_mev(&self) -> f64 {
        self.energy_mev * self.a
    }

    /// Beam current (A)
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn set_current(&mut self, current: f64) {
        self.current = current;
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_q(&mut self, q: f64) {
        self.q = q;
    }

    pub fn calculate_from_energy_mev(&mut self, energy_per_u: f64) {
        self.energy_mev = energy_per_u;
    }

    pub fn calculate_from_total_energy_mev(&mut self, energy: f64) {
        self.energy_mev = energy / self.a;
    }

    pub fn gamma(&self) -> f64 {
        gamma_from_kinetic(self.total_energy_mev(), self.mass_mev)
    }

    pub fn beta(&self) -> f64 {
        beta_from_gamma(self.gamma())
    }

    pub fn beta_gamma(&self) -> f64 {
        self.beta() * self.gamma()
    }

    /// Two species describe the same particle if their masses agree to a relative 1e-3
    pub fn same_mass_as(&self, mass_mev: f64) -> bool {
        ((self.mass_mev - mass_mev) / self.mass_mev).abs() < 1.0e-3
    }
}

impl FromStr for IonSpecies {
    type Err = SpeciesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proton" | "H_1+" => Ok(Self::preset("proton", 1.007_276_466_88, 1.0, 1.0)),
            "H2_1+" => Ok(Self::preset("H2_1+", 2.015_101_497_7, 1.0, 1.0)),
            "4He_2+" | "alpha" => Ok(Self::preset("4He_2+", 4.001_506_179_1, 2.0, 2.0)),
            "H_1-" => Ok(Self::preset("H_1-", 1.008_373_6, 1.0, -1.0)),
            "electron" => Ok(Self::preset(
                "electron",
                ELECTRON_MASS_MEV / AMU_MEV,
                0.0,
                -1.0,
            )),
            _ => Err(SpeciesError::UnknownSpecies(s.to_string())),
        }
    }
}

impl Display for IonSpecies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (a = {:.5}, q = {:.1}, E = {:.4} MeV/u)",
            self.name, self.a, self.q, self.energy_mev
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_presets() {
        let proton = IonSpecies::from_str("proton").unwrap();
        assert_relative_eq!(proton.mass_mev(), 938.272, max_relative = 1e-5);
        let h2 = IonSpecies::from_str("H2_1+").unwrap();
        assert_relative_eq!(h2.mass_mev(), 1877.06, max_relative = 1e-5);
        assert!(IonSpecies::from_str("unobtainium").is_err());
    }

    #[test]
    fn test_energy() {
        let mut h2 = IonSpecies::from_str("H2_1+").unwrap();
        h2.calculate_from_total_energy_mev(0.07);
        assert_relative_eq!(h2.energy_mev() * h2.a(), 0.07, max_relative = 1e-12);
        assert_relative_eq!(h2.gamma(), 0.07 / h2.mass_mev() + 1.0);
        let bg = h2.beta_gamma();
        assert_relative_eq!(bg * bg, h2.gamma().powi(2) - 1.0, max_relative = 1e-9);
    }

    #[test]
    fn test_custom_rejects_zero_mass() {
        assert!(IonSpecies::custom("nothing", 0.0, 0.0, 0.0).is_err());
    }
}
