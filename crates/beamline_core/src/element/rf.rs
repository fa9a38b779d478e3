use std::f64::consts::PI;

use crate::error::{BeamlineError, Result};
use crate::kinematics::SPEED_OF_LIGHT;
use crate::state::Coordinate;
use crate::traits::{ParticleLike, Scalar};

use super::chain::ElementChain;
use super::drift::Drift;
use super::thin::subtract_reference_time;
use super::{check_finite, ElementCore};

/// Volts to GeV per unit charge.
const VOLT_TO_GEV: f64 = 1e-9;

/// Zero-length accelerating gap. `strength` is the peak voltage in volts.
///
/// A particle gains `q·V·sin(φs + 2πf·cdt/c)`; the reference gains
/// `q·V·sin φs`, after which the state is renormalised to the new reference
/// momentum.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinRfCavity {
    pub(crate) core: ElementCore,
    phase: f64,
    frequency: f64,
}

impl ThinRfCavity {
    pub fn new(name: impl Into<String>, voltage: f64, phase: f64, frequency: f64) -> Result<Self> {
        let core = ElementCore::new(name, 0.0, voltage)?;
        check_finite(&core.name, "phase", phase)?;
        check_finite(&core.name, "frequency", frequency)?;
        Ok(Self {
            core,
            phase,
            frequency,
        })
    }

    pub fn voltage(&self) -> f64 {
        self.core.strength
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let voltage = self.core.strength;
        if voltage == 0.0 {
            subtract_reference_time(particle.state_mut(), self.core.reference_ct);
            return Ok(());
        }

        let kinematics = *particle.kinematics();
        let gain = kinematics.charge() * voltage * VOLT_TO_GEV;
        let wave_number = 2.0 * PI * self.frequency / SPEED_OF_LIGHT;

        let mass = kinematics.mass();
        let reference_energy = kinematics.energy() + gain * self.phase.sin();
        if !(reference_energy >= mass) {
            return Err(BeamlineError::EnergyBelowMass {
                energy: reference_energy,
                mass,
            });
        }

        let state = particle.state();
        let phase = state.cdt().clone() * wave_number + self.phase;
        let energy = kinematics.energy_of(state.ndp()) + phase.sin() * gain;
        let momentum2 = energy.square() - mass * mass;
        if !(momentum2.standard_part() > 0.0) {
            return Err(BeamlineError::unphysical(
                &self.core.name,
                "particle energy fell to its rest mass",
            ));
        }
        let momentum = momentum2.sqrt();

        let old_p0 = kinematics.momentum();
        particle.set_reference_energy(reference_energy)?;
        let new_p0 = particle.kinematics().momentum();
        if !(new_p0 > 0.0) {
            return Err(BeamlineError::unphysical(
                &self.core.name,
                "reference particle was brought to rest",
            ));
        }
        let scale = old_p0 / new_p0;

        let state = particle.state_mut();
        state[Coordinate::Ndp] = momentum / new_p0 - 1.0;
        state[Coordinate::Npx] = state.npx().clone() * scale;
        state[Coordinate::Npy] = state.npy().clone() * scale;
        subtract_reference_time(state, self.core.reference_ct);
        log::trace!(
            "{}: reference energy {:.9} -> {:.9} GeV",
            self.core.name,
            kinematics.energy(),
            particle.kinematics().energy()
        );
        Ok(())
    }
}

/// Cavity with length: half drift, thin gap, half drift.
#[derive(Debug, Clone)]
pub struct RfCavity {
    pub(crate) core: ElementCore,
    phase: f64,
    frequency: f64,
    pub(crate) chain: ElementChain,
}

impl RfCavity {
    pub fn new(
        name: impl Into<String>,
        length: f64,
        voltage: f64,
        phase: f64,
        frequency: f64,
    ) -> Result<Self> {
        let core = ElementCore::new(name, length, voltage)?;
        check_finite(&core.name, "phase", phase)?;
        check_finite(&core.name, "frequency", frequency)?;
        let mut cavity = Self {
            core,
            phase,
            frequency,
            chain: ElementChain::default(),
        };
        cavity.rebuild_chain()?;
        Ok(cavity)
    }

    pub fn voltage(&self) -> f64 {
        self.core.strength
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_voltage(&mut self, voltage: f64) -> Result<()> {
        check_finite(&self.core.name, "voltage", voltage)?;
        self.core.strength = voltage;
        self.rebuild_chain()
    }

    pub fn set_phase(&mut self, phase: f64) -> Result<()> {
        check_finite(&self.core.name, "phase", phase)?;
        self.phase = phase;
        self.rebuild_chain()
    }

    pub fn chain(&self) -> &ElementChain {
        &self.chain
    }

    pub fn teardown(&mut self) {
        self.chain.teardown();
    }

    pub fn rebuild_chain(&mut self) -> Result<()> {
        let name = &self.core.name;
        let half = 0.5 * self.core.length;
        self.chain = ElementChain::new(
            name,
            vec![
                Drift::new(format!("{name}.upstream"), half)?.into(),
                ThinRfCavity::new(
                    format!("{name}.gap"),
                    self.core.strength,
                    self.phase,
                    self.frequency,
                )?
                .into(),
                Drift::new(format!("{name}.downstream"), half)?.into(),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn split(&self, fraction: f64) -> Result<(RfCavity, RfCavity)> {
        let piece = |f: f64| -> Result<RfCavity> {
            let mut cavity = RfCavity {
                core: self.core.piece(self.core.length * f, self.core.strength * f),
                phase: self.phase,
                frequency: self.frequency,
                chain: ElementChain::default(),
            };
            cavity.rebuild_chain()?;
            Ok(cavity)
        };
        Ok((piece(fraction)?, piece(1.0 - fraction)?))
    }
}
