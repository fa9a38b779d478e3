use crate::error::Result;
use crate::kinematics::ReferenceKinematics;
use crate::state::{Coordinate, PhaseVector};
use crate::traits::{ParticleLike, Scalar};

use super::{advance_time, longitudinal_momentum, ElementCore};

/// Moves the transverse coordinates along a straight line of `length` and
/// returns the distance travelled.
pub(crate) fn drift_path<S: Scalar>(
    element: &str,
    state: &mut PhaseVector<S>,
    length: f64,
) -> Result<S> {
    let one_plus = state.ndp().clone() + 1.0;
    let pz = longitudinal_momentum(element, &one_plus, state.npx(), state.npy())?;
    let step = pz.lift(length) / pz;
    state[Coordinate::X] = state.x().clone() + state.npx().clone() * step.clone();
    state[Coordinate::Y] = state.y().clone() + state.npy().clone() * step.clone();
    Ok(one_plus * step)
}

/// Exact field-free drift, reference time included.
pub(crate) fn drift<S: Scalar>(
    element: &str,
    kinematics: &ReferenceKinematics,
    state: &mut PhaseVector<S>,
    length: f64,
    reference_ct: f64,
) -> Result<()> {
    let path = drift_path(element, state, length)?;
    advance_time(kinematics, state, path, reference_ct);
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drift {
    pub(crate) core: ElementCore,
}

impl Drift {
    pub fn new(name: impl Into<String>, length: f64) -> Result<Self> {
        Ok(Self {
            core: ElementCore::new(name, length, 0.0)?,
        })
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let kinematics = *particle.kinematics();
        drift(
            &self.core.name,
            &kinematics,
            particle.state_mut(),
            self.core.length,
            self.core.reference_ct,
        )
    }

    pub(crate) fn split(&self, fraction: f64) -> (Drift, Drift) {
        let length = self.core.length;
        (
            Drift {
                core: self.core.piece(length * fraction, 0.0),
            },
            Drift {
                core: self.core.piece(length * (1.0 - fraction), 0.0),
            },
        )
    }
}

/// Zero-length placeholder; leaves the state untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub(crate) core: ElementCore,
}

impl Marker {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            core: ElementCore::new(name, 0.0, 0.0)?,
        })
    }
}
