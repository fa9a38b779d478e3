//! Reference-particle kinematics.
//!
//! Energies and momenta are in GeV (GeV/c), masses in GeV/c², charges in
//! units of the elementary charge.

use serde::{Deserialize, Serialize};

use crate::error::{BeamlineError, Result};
use crate::traits::Scalar;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
pub const PROTON_MASS: f64 = 0.938_272_088_16;
pub const ELECTRON_MASS: f64 = 0.000_510_998_950;
pub const MUON_MASS: f64 = 0.105_658_375_5;
/// `Bρ [T·m] = p [GeV/c] / (RIGIDITY_FACTOR · q)`.
pub const RIGIDITY_FACTOR: f64 = 0.299_792_458;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceKinematics {
    mass: f64,
    charge: f64,
    energy: f64,
    momentum: f64,
    beta: f64,
    gamma: f64,
    brho: f64,
}

impl ReferenceKinematics {
    pub fn new(mass: f64, charge: f64, energy: f64) -> Result<Self> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(BeamlineError::InvalidParameter(format!(
                "mass must be positive and finite, got {mass}"
            )));
        }
        if !charge.is_finite() || charge == 0.0 {
            return Err(BeamlineError::InvalidParameter(format!(
                "charge must be non-zero and finite, got {charge}"
            )));
        }
        let mut kin = Self {
            mass,
            charge,
            energy: mass,
            momentum: 0.0,
            beta: 0.0,
            gamma: 1.0,
            brho: 0.0,
        };
        kin.set_energy(energy)?;
        Ok(kin)
    }

    pub fn from_momentum(mass: f64, charge: f64, momentum: f64) -> Result<Self> {
        if !(momentum.is_finite() && momentum >= 0.0) {
            return Err(BeamlineError::InvalidParameter(format!(
                "momentum must be non-negative and finite, got {momentum}"
            )));
        }
        Self::new(mass, charge, (momentum * momentum + mass * mass).sqrt())
    }

    /// Sets the total reference energy, enforcing `E >= m`.
    pub fn set_energy(&mut self, energy: f64) -> Result<()> {
        if !energy.is_finite() || energy < self.mass {
            return Err(BeamlineError::EnergyBelowMass {
                energy,
                mass: self.mass,
            });
        }
        self.energy = energy;
        self.momentum = (energy * energy - self.mass * self.mass).sqrt();
        self.gamma = energy / self.mass;
        self.beta = self.momentum / energy;
        self.brho = self.momentum / (RIGIDITY_FACTOR * self.charge);
        Ok(())
    }

    pub fn set_momentum(&mut self, momentum: f64) -> Result<()> {
        if !(momentum.is_finite() && momentum >= 0.0) {
            return Err(BeamlineError::InvalidParameter(format!(
                "momentum must be non-negative and finite, got {momentum}"
            )));
        }
        self.set_energy((momentum * momentum + self.mass * self.mass).sqrt())
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn charge(&self) -> f64 {
        self.charge
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Magnetic rigidity in T·m, signed by the charge.
    pub fn brho(&self) -> f64 {
        self.brho
    }

    /// Field in tesla that bends the reference particle by `angle` over `length`.
    pub fn field_for_bend(&self, length: f64, angle: f64) -> f64 {
        if length == 0.0 {
            0.0
        } else {
            self.brho * angle / length
        }
    }

    /// Velocity of a particle with relative momentum deviation `ndp`, in units of c.
    pub fn beta_of<S: Scalar>(&self, ndp: &S) -> S {
        let one_plus = ndp.clone() + 1.0;
        let m_over_p = self.mass / self.momentum;
        one_plus.clone() / (one_plus.square() + m_over_p * m_over_p).sqrt()
    }

    /// Total energy of a particle with relative momentum deviation `ndp`.
    pub fn energy_of<S: Scalar>(&self, ndp: &S) -> S {
        let p = (ndp.clone() + 1.0) * self.momentum;
        (p.square() + self.mass * self.mass).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn derived_quantities_are_consistent() {
        let kin = ReferenceKinematics::new(PROTON_MASS, 1.0, 8.938_272_088_16).unwrap();
        assert_relative_eq!(kin.gamma(), kin.energy() / PROTON_MASS);
        assert_relative_eq!(
            kin.beta() * kin.gamma(),
            kin.momentum() / PROTON_MASS,
            max_relative = 1e-14
        );
        assert_relative_eq!(kin.brho(), kin.momentum() / 0.299_792_458, max_relative = 1e-14);
    }

    #[test]
    fn energy_below_mass_is_rejected() {
        let err = ReferenceKinematics::new(PROTON_MASS, 1.0, 0.5).unwrap_err();
        assert!(matches!(err, BeamlineError::EnergyBelowMass { .. }));

        let mut kin = ReferenceKinematics::new(PROTON_MASS, 1.0, 2.0).unwrap();
        assert!(kin.set_energy(0.9).is_err());
        assert_eq!(kin.energy(), 2.0);
    }

    #[test]
    fn neutral_particles_are_rejected() {
        for charge in [0.0, -0.0, f64::NAN] {
            let err = ReferenceKinematics::new(PROTON_MASS, charge, 2.0).unwrap_err();
            assert!(matches!(err, BeamlineError::InvalidParameter(_)), "{err}");
        }
        assert!(ReferenceKinematics::from_momentum(PROTON_MASS, 0.0, 1.0).is_err());
    }

    #[test]
    fn negative_charge_flips_rigidity() {
        let kin = ReferenceKinematics::from_momentum(ELECTRON_MASS, -1.0, 1.0).unwrap();
        assert!(kin.brho() < 0.0);
        assert_relative_eq!(kin.momentum(), 1.0, max_relative = 1e-14);
    }

    #[test]
    fn beta_of_reference_matches_beta() {
        let kin = ReferenceKinematics::new(MUON_MASS, 1.0, 0.3).unwrap();
        assert_relative_eq!(kin.beta_of(&0.0), kin.beta(), max_relative = 1e-14);
        assert!(kin.beta_of(&0.01) > kin.beta());
        assert_relative_eq!(kin.energy_of(&0.0), kin.energy(), max_relative = 1e-14);
    }
}
