//! Physical constants and unit conversion factors shared by every driver.

/// Atomic mass constant energy equivalent (MeV)
pub const AMU_MEV: f64 = 931.494_102_42;
/// Atomic mass constant (kg)
pub const AMU_KG: f64 = 1.660_539_066_60e-27;
/// Speed of light in vacuum (m/s)
pub const CLIGHT: f64 = 299_792_458.0;
/// Electron rest energy (MeV)
pub const ELECTRON_MASS_MEV: f64 = 0.510_998_950_00;

// Unit conversions into the canonical SI representation
pub const MM_TO_M: f64 = 1.0e-3;
pub const CM_TO_M: f64 = 1.0e-2;
pub const MRAD_TO_RAD: f64 = 1.0e-3;
pub const NS_TO_S: f64 = 1.0e-9;
pub const MA_TO_A: f64 = 1.0e-3;
pub const MHZ_TO_HZ: f64 = 1.0e6;

/// Name of the per-step groups in step-indexed containers
pub fn step_key(step: usize) -> String {
    format!("Step#{step}")
}

/// Parse a `Step#<n>` key back into its step index
pub fn parse_step_key(key: &str) -> Option<usize> {
    key.strip_prefix("Step#")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_keys() {
        assert_eq!(step_key(12), "Step#12");
        assert_eq!(parse_step_key("Step#12"), Some(12));
        assert_eq!(parse_step_key("Step#"), None);
        assert_eq!(parse_step_key("Block#3"), None);
    }
}
