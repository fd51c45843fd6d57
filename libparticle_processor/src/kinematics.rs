//! Relativistic conversions between kinetic energy, velocity and normalized momentum.
//!
//! Normalized momentum is βγ (dimensionless); energies are in MeV, velocities in m/s.

use super::constants::CLIGHT;

pub fn gamma_from_kinetic(kinetic_mev: f64, rest_mev: f64) -> f64 {
    kinetic_mev / rest_mev + 1.0
}

pub fn beta_from_gamma(gamma: f64) -> f64 {
    (1.0 - gamma.powi(-2)).sqrt()
}

pub fn beta_gamma_from_kinetic(kinetic_mev: f64, rest_mev: f64) -> f64 {
    let gamma = gamma_from_kinetic(kinetic_mev, rest_mev);
    beta_from_gamma(gamma) * gamma
}

pub fn kinetic_from_beta_gamma(beta_gamma: f64, rest_mev: f64) -> f64 {
    ((1.0 + beta_gamma * beta_gamma).sqrt() - 1.0) * rest_mev
}

pub fn beta_from_beta_gamma(beta_gamma: f64) -> f64 {
    beta_gamma / (1.0 + beta_gamma * beta_gamma).sqrt()
}

pub fn magnitude(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub fn beta_gamma_from_velocity(v: [f64; 3]) -> [f64; 3] {
    let beta = magnitude(v) / CLIGHT;
    let gamma = 1.0 / (1.0 - beta * beta).sqrt();
    [
        gamma * v[0] / CLIGHT,
        gamma * v[1] / CLIGHT,
        gamma * v[2] / CLIGHT,
    ]
}

pub fn velocity_from_beta_gamma(p: [f64; 3]) -> [f64; 3] {
    let gamma = (1.0 + p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
    [
        CLIGHT * p[0] / gamma,
        CLIGHT * p[1] / gamma,
        CLIGHT * p[2] / gamma,
    ]
}

/// Split a total normalized momentum along the direction of `direction`.
/// A zero-length direction yields zero momentum.
pub fn split_along(beta_gamma: f64, direction: [f64; 3]) -> [f64; 3] {
    let norm = magnitude(direction);
    if norm == 0.0 {
        return [0.0; 3];
    }
    [
        beta_gamma * direction[0] / norm,
        beta_gamma * direction[1] / norm,
        beta_gamma * direction[2] / norm,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kinetic_round_trip() {
        let rest = 938.272;
        let bg = beta_gamma_from_kinetic(70.0, rest);
        assert_relative_eq!(kinetic_from_beta_gamma(bg, rest), 70.0, max_relative = 1e-12);
    }

    #[test]
    fn test_velocity_round_trip() {
        let v = [1.0e6, -2.0e6, 3.0e7];
        let back = velocity_from_beta_gamma(beta_gamma_from_velocity(v));
        for i in 0..3 {
            assert_relative_eq!(back[i], v[i], max_relative = 1e-10);
        }
    }

    #[test]
    fn test_split_along() {
        let p = split_along(2.0, [3.0, 0.0, 4.0]);
        assert_relative_eq!(p[0], 1.2);
        assert_relative_eq!(p[2], 1.6);
        assert_eq!(split_along(2.0, [0.0; 3]), [0.0; 3]);
    }
}
