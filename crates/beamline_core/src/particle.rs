use std::rc::Rc;

use nalgebra::Matrix6;
use serde::{Deserialize, Serialize};

use crate::differential::{Jet, JetEnvironment};
use crate::error::Result;
use crate::kinematics::{ReferenceKinematics, ELECTRON_MASS, MUON_MASS, PROTON_MASS};
use crate::state::{Coordinate, DifferentialState, PhaseSpaceState, PhaseVector};
use crate::traits::ParticleLike;

/// A particle with a concrete numeric phase-space state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    kinematics: ReferenceKinematics,
    state: PhaseSpaceState,
}

impl Particle {
    pub fn new(kinematics: ReferenceKinematics) -> Self {
        Self {
            kinematics,
            state: PhaseSpaceState::zeros(),
        }
    }

    /// Generic species; `energy` is the total reference energy in GeV.
    pub fn with_mass(mass: f64, charge: f64, energy: f64) -> Result<Self> {
        Ok(Self::new(ReferenceKinematics::new(mass, charge, energy)?))
    }

    pub fn proton(energy: f64) -> Result<Self> {
        Self::with_mass(PROTON_MASS, 1.0, energy)
    }

    pub fn antiproton(energy: f64) -> Result<Self> {
        Self::with_mass(PROTON_MASS, -1.0, energy)
    }

    pub fn electron(energy: f64) -> Result<Self> {
        Self::with_mass(ELECTRON_MASS, -1.0, energy)
    }

    pub fn positron(energy: f64) -> Result<Self> {
        Self::with_mass(ELECTRON_MASS, 1.0, energy)
    }

    pub fn muon(energy: f64) -> Result<Self> {
        Self::with_mass(MUON_MASS, -1.0, energy)
    }

    pub fn with_state(mut self, state: PhaseSpaceState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &PhaseSpaceState {
        &self.state
    }

    pub fn set_state(&mut self, state: PhaseSpaceState) {
        self.state = state;
    }

    pub fn get(&self, coord: Coordinate) -> f64 {
        self.state[coord]
    }

    pub fn set(&mut self, coord: Coordinate, value: f64) {
        self.state[coord] = value;
    }

    pub fn x(&self) -> f64 {
        self.state[Coordinate::X]
    }
    pub fn y(&self) -> f64 {
        self.state[Coordinate::Y]
    }
    pub fn cdt(&self) -> f64 {
        self.state[Coordinate::Cdt]
    }
    pub fn npx(&self) -> f64 {
        self.state[Coordinate::Npx]
    }
    pub fn npy(&self) -> f64 {
        self.state[Coordinate::Npy]
    }
    pub fn ndp(&self) -> f64 {
        self.state[Coordinate::Ndp]
    }

    pub fn reference_energy(&self) -> f64 {
        self.kinematics.energy()
    }

    pub fn reference_momentum(&self) -> f64 {
        self.kinematics.momentum()
    }

    pub fn set_reference_momentum(&mut self, momentum: f64) -> Result<()> {
        self.kinematics.set_momentum(momentum)
    }

    pub fn mass(&self) -> f64 {
        self.kinematics.mass()
    }

    pub fn charge(&self) -> f64 {
        self.kinematics.charge()
    }

    pub fn beta(&self) -> f64 {
        self.kinematics.beta()
    }

    pub fn gamma(&self) -> f64 {
        self.kinematics.gamma()
    }

    pub fn brho(&self) -> f64 {
        self.kinematics.brho()
    }

    /// Momentum of this particle (not the reference), GeV/c.
    pub fn momentum(&self) -> f64 {
        self.kinematics.momentum() * (1.0 + self.ndp())
    }
}

impl ParticleLike for Particle {
    type Coord = f64;

    fn kinematics(&self) -> &ReferenceKinematics {
        &self.kinematics
    }

    fn state(&self) -> &PhaseVector<f64> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PhaseVector<f64> {
        &mut self.state
    }

    fn set_reference_energy(&mut self, energy: f64) -> Result<()> {
        self.kinematics.set_energy(energy)
    }
}

/// A particle whose state is a vector of jets; propagating it yields the
/// transfer map about its expansion point.
#[derive(Debug, Clone)]
pub struct DifferentialParticle {
    kinematics: ReferenceKinematics,
    state: DifferentialState,
}

impl DifferentialParticle {
    pub fn new(kinematics: ReferenceKinematics, state: DifferentialState) -> Self {
        Self { kinematics, state }
    }

    /// Identity map centred on the particle's numeric state.
    pub fn from_particle(particle: &Particle, env: &Rc<JetEnvironment>) -> Result<Self> {
        Ok(Self {
            kinematics: particle.kinematics,
            state: DifferentialState::identity(env, &particle.state)?,
        })
    }

    /// Collapses to standard parts.
    pub fn to_particle(&self) -> Particle {
        Particle {
            kinematics: self.kinematics,
            state: self.state.standard_part(),
        }
    }

    pub fn differential_state(&self) -> &DifferentialState {
        &self.state
    }

    pub fn set_differential_state(&mut self, state: DifferentialState) {
        self.state = state;
    }

    pub fn component(&self, coord: Coordinate) -> &Jet {
        self.state.component(coord)
    }

    pub fn set_component(&mut self, coord: Coordinate, jet: Jet) -> Result<()> {
        self.state.set_component(coord, jet)
    }

    pub fn environment(&self) -> &Rc<JetEnvironment> {
        self.state.environment()
    }

    pub fn jacobian(&self) -> Result<Matrix6<f64>> {
        self.state.jacobian()
    }

    pub fn reference_energy(&self) -> f64 {
        self.kinematics.energy()
    }

    pub fn brho(&self) -> f64 {
        self.kinematics.brho()
    }
}

impl ParticleLike for DifferentialParticle {
    type Coord = Jet;

    fn kinematics(&self) -> &ReferenceKinematics {
        &self.kinematics
    }

    fn state(&self) -> &PhaseVector<Jet> {
        self.state.vector()
    }

    fn state_mut(&mut self) -> &mut PhaseVector<Jet> {
        self.state.vector_mut()
    }

    fn set_reference_energy(&mut self, energy: f64) -> Result<()> {
        self.kinematics.set_energy(energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BeamlineError;

    #[test]
    fn species_constructors_enforce_energy() {
        assert!(Particle::proton(0.5).is_err());
        let p = Particle::proton(1.5).unwrap();
        assert_eq!(p.charge(), 1.0);
        assert!(p.beta() > 0.0 && p.beta() < 1.0);
        assert!(Particle::electron(1.0).unwrap().brho() < 0.0);
    }

    #[test]
    fn reference_energy_update_is_checked() {
        let mut p = Particle::proton(2.0).unwrap();
        let err = p.set_reference_energy(0.1).unwrap_err();
        assert!(matches!(err, BeamlineError::EnergyBelowMass { .. }));
        p.set_reference_energy(3.0).unwrap();
        assert_eq!(p.reference_energy(), 3.0);
    }

    #[test]
    fn differential_round_trip_preserves_state() {
        let state = PhaseSpaceState::from_slice(&[1e-3, -2e-3, 0.0, 1e-4, 0.0, 1e-3]).unwrap();
        let particle = Particle::proton(5.0).unwrap().with_state(state);
        let env = JetEnvironment::phase_space(2).unwrap();
        let dp = DifferentialParticle::from_particle(&particle, &env).unwrap();
        assert_eq!(dp.to_particle(), particle);
        assert_eq!(dp.jacobian().unwrap(), Matrix6::identity());
    }

    #[test]
    fn set_component_checks_environment() {
        let particle = Particle::proton(5.0).unwrap();
        let env = JetEnvironment::phase_space(1).unwrap();
        let other = JetEnvironment::phase_space(1).unwrap();
        let mut dp = DifferentialParticle::from_particle(&particle, &env).unwrap();
        assert_eq!(
            dp.set_component(Coordinate::Y, Jet::zero(&other)),
            Err(BeamlineError::EnvironmentMismatch)
        );
    }
}
