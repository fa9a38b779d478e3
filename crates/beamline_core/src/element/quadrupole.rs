//! Thick quadrupoles and sextupoles.
//!
//! Both are composites: a TEAPOT-spaced chain of exact drifts and thin
//! multipole kicks. The quadrupole also offers a linear thick-lens model.

use serde::{Deserialize, Serialize};

use crate::error::{BeamlineError, Result};
use crate::kinematics::ReferenceKinematics;
use crate::particle::Particle;
use crate::state::{Coordinate, PhaseVector};
use crate::traits::{ParticleLike, Scalar};

use super::chain::ElementChain;
use super::drift::Drift;
use super::thin::{MultipoleOrder, ThinMultipole};
use super::{advance_time_linear, check_finite, Element, ElementCore};

/// Drift lengths around `kicks` thin kicks: `L/(2(N+1))` at both ends and
/// `L·N/(N²−1)` between kicks.
pub fn teapot_spacing(length: f64, kicks: usize) -> Vec<f64> {
    if kicks <= 1 {
        return vec![0.5 * length; 2];
    }
    let n = kicks as f64;
    let end = length / (2.0 * (n + 1.0));
    let interior = length * n / (n * n - 1.0);
    let mut spacing = Vec::with_capacity(kicks + 1);
    spacing.push(end);
    spacing.extend(std::iter::repeat(interior).take(kicks - 1));
    spacing.push(end);
    spacing
}

pub(crate) fn check_kick_count(element: &str, kicks: usize) -> Result<()> {
    if kicks == 0 {
        return Err(BeamlineError::InvalidParameter(format!(
            "{element}: at least one thin kick is required"
        )));
    }
    Ok(())
}

fn check_thick(element: &str, length: f64) -> Result<()> {
    if length > 0.0 {
        Ok(())
    } else {
        Err(BeamlineError::InvalidParameter(format!(
            "{element}: a thick multipole needs a positive length"
        )))
    }
}

/// Drifts and kicks of equal strength, `integrated / kicks` each.
fn sliced_multipole(
    name: &str,
    length: f64,
    kicks: usize,
    order: MultipoleOrder,
    integrated: f64,
) -> Result<Vec<Element>> {
    let spacing = teapot_spacing(length, kicks);
    let per_kick = integrated / kicks as f64;
    let mut elements = Vec::with_capacity(2 * kicks + 1);
    for (i, gap) in spacing.iter().enumerate() {
        elements.push(Drift::new(format!("{name}.drift{i}"), *gap)?.into());
        if i < kicks {
            elements.push(ThinMultipole::new(format!("{name}.kick{i}"), order, per_kick)?.into());
        }
    }
    Ok(elements)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuadrupolePropagator {
    /// Sliced chain of exact drifts and thin kicks.
    #[default]
    Teapot,
    /// First-order thick-lens matrix.
    Linear,
}

impl QuadrupolePropagator {
    pub const ALL: [QuadrupolePropagator; 2] =
        [QuadrupolePropagator::Teapot, QuadrupolePropagator::Linear];

    pub fn name(self) -> &'static str {
        match self {
            QuadrupolePropagator::Teapot => "teapot",
            QuadrupolePropagator::Linear => "linear",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| BeamlineError::UnknownPropagator {
                family: "quadrupole".into(),
                name: name.to_string(),
            })
    }
}

/// `(cos, sin/ω, −ω·sin)` for focusing `k`, hyperbolic for `k < 0`.
fn thick_lens_plane(k: f64, length: f64) -> (f64, f64, f64) {
    if k > 0.0 {
        let w = k.sqrt();
        let (s, c) = (w * length).sin_cos();
        (c, s / w, -w * s)
    } else if k < 0.0 {
        let w = (-k).sqrt();
        let phase = w * length;
        (phase.cosh(), phase.sinh() / w, w * phase.sinh())
    } else {
        (1.0, length, 0.0)
    }
}

fn linear_quadrupole<S: Scalar>(
    kinematics: &ReferenceKinematics,
    state: &mut PhaseVector<S>,
    length: f64,
    k: f64,
    reference_ct: f64,
) {
    let (cx, sx, mx) = thick_lens_plane(k, length);
    let (cy, sy, my) = thick_lens_plane(-k, length);
    let (x, px) = (state.x().clone(), state.npx().clone());
    let (y, py) = (state.y().clone(), state.npy().clone());
    state[Coordinate::X] = x.clone() * cx + px.clone() * sx;
    state[Coordinate::Npx] = x * mx + px * cx;
    state[Coordinate::Y] = y.clone() * cy + py.clone() * sy;
    state[Coordinate::Npy] = y * my + py * cy;
    let zero = state.ndp().lift(0.0);
    advance_time_linear(kinematics, state, length, zero, reference_ct);
}

/// Thick quadrupole; `strength` is the field gradient in T/m.
#[derive(Debug, Clone)]
pub struct Quadrupole {
    pub(crate) core: ElementCore,
    kick_count: usize,
    propagator: QuadrupolePropagator,
    pub(crate) chain: ElementChain,
}

impl Quadrupole {
    pub fn new(name: impl Into<String>, length: f64, gradient: f64) -> Result<Self> {
        Self::with_kick_count(name, length, gradient, crate::DEFAULT_KICK_COUNT)
    }

    pub fn with_kick_count(
        name: impl Into<String>,
        length: f64,
        gradient: f64,
        kick_count: usize,
    ) -> Result<Self> {
        let core = ElementCore::new(name, length, gradient)?;
        check_thick(&core.name, length)?;
        check_kick_count(&core.name, kick_count)?;
        let mut quad = Self {
            core,
            kick_count,
            propagator: QuadrupolePropagator::default(),
            chain: ElementChain::default(),
        };
        quad.rebuild_chain()?;
        Ok(quad)
    }

    pub fn with_propagator(mut self, propagator: QuadrupolePropagator) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn gradient(&self) -> f64 {
        self.core.strength
    }

    pub fn kick_count(&self) -> usize {
        self.kick_count
    }

    pub fn propagator(&self) -> QuadrupolePropagator {
        self.propagator
    }

    pub fn set_propagator(&mut self, propagator: QuadrupolePropagator) {
        self.propagator = propagator;
    }

    pub fn set_gradient(&mut self, gradient: f64) -> Result<()> {
        check_finite(&self.core.name, "gradient", gradient)?;
        self.core.strength = gradient;
        self.rebuild_chain()
    }

    pub fn set_kick_count(&mut self, kick_count: usize) -> Result<()> {
        check_kick_count(&self.core.name, kick_count)?;
        self.kick_count = kick_count;
        self.rebuild_chain()
    }

    pub fn chain(&self) -> &ElementChain {
        &self.chain
    }

    pub fn teardown(&mut self) {
        self.chain.teardown();
    }

    pub fn rebuild_chain(&mut self) -> Result<()> {
        let integrated = self.core.strength * self.core.length;
        self.chain = ElementChain::new(
            &self.core.name,
            sliced_multipole(
                &self.core.name,
                self.core.length,
                self.kick_count,
                MultipoleOrder::Quadrupole,
                integrated,
            )?,
        )?;
        Ok(())
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        match self.propagator {
            QuadrupolePropagator::Teapot => self.chain.propagate(&self.core.name, particle),
            QuadrupolePropagator::Linear => {
                let kinematics = *particle.kinematics();
                let k = self.core.strength / kinematics.brho();
                linear_quadrupole(
                    &kinematics,
                    particle.state_mut(),
                    self.core.length,
                    k,
                    self.core.reference_ct,
                );
                Ok(())
            }
        }
    }

    /// Registers both models: the linear one through `reference_ct`, the
    /// sliced one through its children.
    pub(crate) fn register_reference_time(&mut self, particle: &mut Particle) -> Result<()> {
        let mut linear = particle.clone();
        let kinematics = *linear.kinematics();
        linear_quadrupole(
            &kinematics,
            linear.state_mut(),
            self.core.length,
            self.core.strength / kinematics.brho(),
            0.0,
        );
        self.core.reference_ct = linear.cdt() - particle.cdt();
        self.chain.register(particle)
    }

    pub(crate) fn split(&self, fraction: f64) -> Result<(Quadrupole, Quadrupole)> {
        let piece = |f: f64| -> Result<Quadrupole> {
            let mut quad = Quadrupole {
                core: self.core.piece(self.core.length * f, self.core.strength),
                kick_count: self.kick_count,
                propagator: self.propagator,
                chain: ElementChain::default(),
            };
            quad.rebuild_chain()?;
            Ok(quad)
        };
        Ok((piece(fraction)?, piece(1.0 - fraction)?))
    }
}

/// Thick sextupole; `strength` is `B''/2` in T/m².
#[derive(Debug, Clone)]
pub struct Sextupole {
    pub(crate) core: ElementCore,
    kick_count: usize,
    pub(crate) chain: ElementChain,
}

impl Sextupole {
    pub fn new(name: impl Into<String>, length: f64, strength: f64) -> Result<Self> {
        Self::with_kick_count(name, length, strength, crate::DEFAULT_KICK_COUNT)
    }

    pub fn with_kick_count(
        name: impl Into<String>,
        length: f64,
        strength: f64,
        kick_count: usize,
    ) -> Result<Self> {
        let core = ElementCore::new(name, length, strength)?;
        check_thick(&core.name, length)?;
        check_kick_count(&core.name, kick_count)?;
        let mut sextupole = Self {
            core,
            kick_count,
            chain: ElementChain::default(),
        };
        sextupole.rebuild_chain()?;
        Ok(sextupole)
    }

    pub fn kick_count(&self) -> usize {
        self.kick_count
    }

    pub fn set_strength(&mut self, strength: f64) -> Result<()> {
        check_finite(&self.core.name, "strength", strength)?;
        self.core.strength = strength;
        self.rebuild_chain()
    }

    pub fn set_kick_count(&mut self, kick_count: usize) -> Result<()> {
        check_kick_count(&self.core.name, kick_count)?;
        self.kick_count = kick_count;
        self.rebuild_chain()
    }

    pub fn chain(&self) -> &ElementChain {
        &self.chain
    }

    pub fn teardown(&mut self) {
        self.chain.teardown();
    }

    pub fn rebuild_chain(&mut self) -> Result<()> {
        self.chain = ElementChain::new(
            &self.core.name,
            sliced_multipole(
                &self.core.name,
                self.core.length,
                self.kick_count,
                MultipoleOrder::Sextupole,
                self.core.strength * self.core.length,
            )?,
        )?;
        Ok(())
    }

    pub(crate) fn split(&self, fraction: f64) -> Result<(Sextupole, Sextupole)> {
        let piece = |f: f64| -> Result<Sextupole> {
            let mut sextupole = Sextupole {
                core: self.core.piece(self.core.length * f, self.core.strength),
                kick_count: self.kick_count,
                chain: ElementChain::default(),
            };
            sextupole.rebuild_chain()?;
            Ok(sextupole)
        };
        Ok((piece(fraction)?, piece(1.0 - fraction)?))
    }
}
