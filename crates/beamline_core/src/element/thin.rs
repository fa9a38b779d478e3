//! Thin-lens elements: multipole kicks, pole-face edges and steering kickers.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::error::{BeamlineError, Result};
use crate::state::{Coordinate, PhaseVector};
use crate::traits::{ParticleLike, Scalar};

use super::drift::drift_path;
use super::{advance_time, check_finite, snap_angle, ElementCore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultipoleOrder {
    Quadrupole,
    Sextupole,
    Octupole,
}

impl MultipoleOrder {
    pub const ALL: [MultipoleOrder; 3] = [
        MultipoleOrder::Quadrupole,
        MultipoleOrder::Sextupole,
        MultipoleOrder::Octupole,
    ];

    /// Power `n` of `(x + iy)^n` in the kick.
    pub fn power(self) -> u32 {
        match self {
            MultipoleOrder::Quadrupole => 1,
            MultipoleOrder::Sextupole => 2,
            MultipoleOrder::Octupole => 3,
        }
    }

    pub fn from_power(power: u32) -> Result<Self> {
        match power {
            1 => Ok(MultipoleOrder::Quadrupole),
            2 => Ok(MultipoleOrder::Sextupole),
            3 => Ok(MultipoleOrder::Octupole),
            other => Err(BeamlineError::InvalidParameter(format!(
                "multipole power must be 1, 2 or 3, got {other}"
            ))),
        }
    }

    pub fn family(self) -> &'static str {
        match self {
            MultipoleOrder::Quadrupole => "quadrupole",
            MultipoleOrder::Sextupole => "sextupole",
            MultipoleOrder::Octupole => "octupole",
        }
    }
}

/// `Δnpx − iΔnpy = −k (x + iy)^n`.
pub(crate) fn multipole_kick<S: Scalar>(state: &mut PhaseVector<S>, order: MultipoleOrder, k: f64) {
    if k == 0.0 {
        return;
    }
    let x = state.x().clone();
    let y = state.y().clone();
    let mut re = x.clone();
    let mut im = y.clone();
    for _ in 1..order.power() {
        let next_re = re.clone() * x.clone() - im.clone() * y.clone();
        im = re * y.clone() + im * x.clone();
        re = next_re;
    }
    state[Coordinate::Npx] = state.npx().clone() - re * k;
    state[Coordinate::Npy] = state.npy().clone() + im * k;
}

/// Hard-edge pole-face kick with `k = B·tanψ / Bρ`.
pub(crate) fn edge_kick<S: Scalar>(state: &mut PhaseVector<S>, k: f64) {
    if k == 0.0 {
        return;
    }
    state[Coordinate::Npx] = state.npx().clone() + state.x().clone() * k;
    state[Coordinate::Npy] = state.npy().clone() - state.y().clone() * k;
}

pub(crate) fn subtract_reference_time<S: Scalar>(state: &mut PhaseVector<S>, reference_ct: f64) {
    if reference_ct != 0.0 {
        state[Coordinate::Cdt] = state.cdt().clone() - reference_ct;
    }
}

/// Zero-length multipole; `strength` is the integrated field `B⁽ⁿ⁾·L/n!` in T·m¹⁻ⁿ.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinMultipole {
    pub(crate) core: ElementCore,
    order: MultipoleOrder,
}

impl ThinMultipole {
    pub fn new(name: impl Into<String>, order: MultipoleOrder, strength: f64) -> Result<Self> {
        Ok(Self {
            core: ElementCore::new(name, 0.0, strength)?,
            order,
        })
    }

    pub fn order(&self) -> MultipoleOrder {
        self.order
    }

    pub fn set_strength(&mut self, strength: f64) -> Result<()> {
        check_finite(&self.core.name, "strength", strength)?;
        self.core.strength = strength;
        Ok(())
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let k = self.core.strength / particle.kinematics().brho();
        let state = particle.state_mut();
        multipole_kick(state, self.order, k);
        subtract_reference_time(state, self.core.reference_ct);
        Ok(())
    }
}

/// Pole face of a bend, applied as a thin kick. `strength` is the dipole field in tesla.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub(crate) core: ElementCore,
    angle: f64,
    tan_angle: f64,
}

impl Edge {
    pub fn new(name: impl Into<String>, field: f64, angle: f64) -> Result<Self> {
        Self::with_diagnostics(name, field, angle, Diagnostics::global())
    }

    pub fn with_diagnostics(
        name: impl Into<String>,
        field: f64,
        angle: f64,
        diagnostics: &Diagnostics,
    ) -> Result<Self> {
        let core = ElementCore::new(name, 0.0, field)?;
        check_finite(&core.name, "edge angle", angle)?;
        let angle = snap_angle(&core.name, "edge", angle, diagnostics);
        Ok(Self::from_parts(core, angle))
    }

    /// Builds an edge whose angle has already been snapped by its owner.
    pub(crate) fn from_parts(core: ElementCore, angle: f64) -> Self {
        Self {
            core,
            angle,
            tan_angle: angle.tan(),
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn tan_angle(&self) -> f64 {
        self.tan_angle
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let k = self.core.strength * self.tan_angle / particle.kinematics().brho();
        let state = particle.state_mut();
        edge_kick(state, k);
        subtract_reference_time(state, self.core.reference_ct);
        Ok(())
    }
}

/// Steering corrector. Kicks are angles in radians for the reference momentum;
/// a kicker with length applies them between two half drifts.
#[derive(Debug, Clone, PartialEq)]
pub struct Kicker {
    pub(crate) core: ElementCore,
    horizontal: f64,
    vertical: f64,
}

impl Kicker {
    pub fn new(
        name: impl Into<String>,
        length: f64,
        horizontal: f64,
        vertical: f64,
    ) -> Result<Self> {
        let core = ElementCore::new(name, length, 0.0)?;
        check_finite(&core.name, "horizontal kick", horizontal)?;
        check_finite(&core.name, "vertical kick", vertical)?;
        Ok(Self {
            core,
            horizontal,
            vertical,
        })
    }

    pub fn horizontal(&self) -> f64 {
        self.horizontal
    }

    pub fn vertical(&self) -> f64 {
        self.vertical
    }

    pub fn set_kicks(&mut self, horizontal: f64, vertical: f64) -> Result<()> {
        check_finite(&self.core.name, "horizontal kick", horizontal)?;
        check_finite(&self.core.name, "vertical kick", vertical)?;
        self.horizontal = horizontal;
        self.vertical = vertical;
        Ok(())
    }

    fn kick<S: Scalar>(&self, state: &mut PhaseVector<S>) {
        if self.horizontal != 0.0 {
            state[Coordinate::Npx] = state.npx().clone() + self.horizontal;
        }
        if self.vertical != 0.0 {
            state[Coordinate::Npy] = state.npy().clone() + self.vertical;
        }
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let kinematics = *particle.kinematics();
        let state = particle.state_mut();
        if self.core.length == 0.0 {
            self.kick(state);
            subtract_reference_time(state, self.core.reference_ct);
            return Ok(());
        }
        let half = 0.5 * self.core.length;
        let first = drift_path(&self.core.name, state, half)?;
        self.kick(state);
        let second = drift_path(&self.core.name, state, half)?;
        advance_time(&kinematics, state, first + second, self.core.reference_ct);
        Ok(())
    }

    pub(crate) fn split(&self, fraction: f64) -> (Kicker, Kicker) {
        let length = self.core.length;
        let piece = |f: f64| Kicker {
            core: self.core.piece(length * f, 0.0),
            horizontal: self.horizontal * f,
            vertical: self.vertical * f,
        };
        (piece(fraction), piece(1.0 - fraction))
    }
}
