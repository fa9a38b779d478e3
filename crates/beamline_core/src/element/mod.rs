//! Beamline elements and their propagators.
//!
//! [`Element`] is a closed set of element kinds. Each kind owns an
//! [`ElementCore`] (name, length, strength, alignment, reference time) plus
//! whatever parameters its physics needs, and kinds with more than one
//! numerical model carry the selected model as a runtime field. Every model
//! is written once over [`Scalar`], so tracking a [`crate::Particle`] and
//! extracting a map with a [`crate::DifferentialParticle`] run the same code.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, WarningKind};
use crate::error::{BeamlineError, Result};
use crate::kinematics::ReferenceKinematics;
use crate::particle::Particle;
use crate::state::{Coordinate, PhaseVector};
use crate::traits::{ParticleLike, Scalar};
use crate::SMALL_ANGLE_THRESHOLD;

pub mod beamline;
pub mod bend;
pub mod chain;
pub mod combined;
pub mod drift;
pub mod quadrupole;
pub mod rf;
pub mod thin;

pub use beamline::{Beamline, DeepIter};
pub use bend::{BendPropagator, SectorBend};
pub use chain::ElementChain;
pub use combined::CombinedFunctionBend;
pub use drift::{Drift, Marker};
pub use quadrupole::{teapot_spacing, Quadrupole, QuadrupolePropagator, Sextupole};
pub use rf::{RfCavity, ThinRfCavity};
pub use thin::{Edge, Kicker, MultipoleOrder, ThinMultipole};

/// Name reported by kinds that have a single numerical model.
pub const SINGLE_MODEL_PROPAGATOR: &str = "exact";
/// Name reported by kinds whose action is their child chain.
pub const CHAIN_PROPAGATOR: &str = "chain";

/// Misalignment of an element with respect to the design orbit.
///
/// At the entrance the offsets are subtracted and the transverse plane is
/// rotated by `-roll`; the exit applies the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Alignment {
    pub x_offset: f64,
    pub y_offset: f64,
    pub roll: f64,
}

impl Alignment {
    pub fn new(x_offset: f64, y_offset: f64, roll: f64) -> Self {
        Self {
            x_offset,
            y_offset,
            roll,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.x_offset == 0.0 && self.y_offset == 0.0 && self.roll == 0.0
    }

    pub(crate) fn enter<S: Scalar>(&self, state: &mut PhaseVector<S>) {
        if self.is_identity() {
            return;
        }
        state[Coordinate::X] = state[Coordinate::X].clone() - self.x_offset;
        state[Coordinate::Y] = state[Coordinate::Y].clone() - self.y_offset;
        if self.roll != 0.0 {
            rotate_transverse(state, -self.roll);
        }
    }

    pub(crate) fn exit<S: Scalar>(&self, state: &mut PhaseVector<S>) {
        if self.is_identity() {
            return;
        }
        if self.roll != 0.0 {
            rotate_transverse(state, self.roll);
        }
        state[Coordinate::X] = state[Coordinate::X].clone() + self.x_offset;
        state[Coordinate::Y] = state[Coordinate::Y].clone() + self.y_offset;
    }
}

fn rotate_transverse<S: Scalar>(state: &mut PhaseVector<S>, angle: f64) {
    let (s, c) = angle.sin_cos();
    let (x, y) = (state.x().clone(), state.y().clone());
    state[Coordinate::X] = x.clone() * c - y.clone() * s;
    state[Coordinate::Y] = x * s + y * c;
    let (px, py) = (state.npx().clone(), state.npy().clone());
    state[Coordinate::Npx] = px.clone() * c - py.clone() * s;
    state[Coordinate::Npy] = px * s + py * c;
}

/// Parameters every element kind carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementCore {
    pub(crate) name: String,
    pub(crate) length: f64,
    pub(crate) strength: f64,
    pub(crate) alignment: Alignment,
    pub(crate) reference_ct: f64,
}

impl ElementCore {
    pub(crate) fn new(name: impl Into<String>, length: f64, strength: f64) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(BeamlineError::InvalidParameter(
                "element name must not be empty".into(),
            ));
        }
        if !(length.is_finite() && length >= 0.0) {
            return Err(BeamlineError::InvalidParameter(format!(
                "{name}: length must be non-negative and finite, got {length}"
            )));
        }
        check_finite(&name, "strength", strength)?;
        Ok(Self {
            name,
            length,
            strength,
            alignment: Alignment::default(),
            reference_ct: 0.0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// `c·Δt` of the reference particle through the element, subtracted at the exit.
    pub fn reference_ct(&self) -> f64 {
        self.reference_ct
    }

    /// Copy for a split piece: same name and alignment, unregistered.
    pub(crate) fn piece(&self, length: f64, strength: f64) -> Self {
        Self {
            name: self.name.clone(),
            length,
            strength,
            alignment: self.alignment,
            reference_ct: 0.0,
        }
    }
}

pub(crate) fn check_finite(element: &str, what: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(BeamlineError::InvalidParameter(format!(
            "{element}: {what} must be finite, got {value}"
        )))
    }
}

/// Sets angles below [`SMALL_ANGLE_THRESHOLD`] to exactly zero.
pub(crate) fn snap_angle(element: &str, what: &str, angle: f64, diagnostics: &Diagnostics) -> f64 {
    if angle != 0.0 && angle.abs() < SMALL_ANGLE_THRESHOLD {
        diagnostics.warn_once(
            WarningKind::AngleSnapped,
            format!(
                "{element}: {what} angle {angle:e} rad is below {SMALL_ANGLE_THRESHOLD:e} rad and was set to zero"
            ),
        );
        0.0
    } else {
        angle
    }
}

/// `sqrt((1+δ)² − npx² − npy²)`, failing when the argument is not positive.
pub(crate) fn longitudinal_momentum<S: Scalar>(
    element: &str,
    one_plus_delta: &S,
    npx: &S,
    npy: &S,
) -> Result<S> {
    let pz2 = one_plus_delta.square() - npx.square() - npy.square();
    let value = pz2.standard_part();
    if !(value > 0.0) {
        return Err(BeamlineError::unphysical(
            element,
            format!("longitudinal momentum squared is {value:e}"),
        ));
    }
    Ok(pz2.sqrt())
}

/// Advances `cdt` for a particle that travelled `path` metres, then removes
/// the reference particle's time.
pub(crate) fn advance_time<S: Scalar>(
    kinematics: &ReferenceKinematics,
    state: &mut PhaseVector<S>,
    path: S,
    reference_ct: f64,
) {
    let beta = kinematics.beta_of(state.ndp());
    state[Coordinate::Cdt] = state.cdt().clone() + path / beta - reference_ct;
}

/// Same as [`advance_time`] with the velocity expanded to first order in `δ`.
pub(crate) fn advance_time_linear<S: Scalar>(
    kinematics: &ReferenceKinematics,
    state: &mut PhaseVector<S>,
    length: f64,
    extra_path: S,
    reference_ct: f64,
) {
    let beta0 = kinematics.beta();
    let gamma0 = kinematics.gamma();
    let slip = state.ndp().clone() * (length / (beta0 * gamma0 * gamma0));
    state[Coordinate::Cdt] =
        state.cdt().clone() + (extra_path + length) / beta0 - slip - reference_ct;
}

macro_rules! dispatch {
    ($value:expr, $e:ident => $body:expr) => {
        match $value {
            Element::Marker($e) => $body,
            Element::Drift($e) => $body,
            Element::SectorBend($e) => $body,
            Element::Edge($e) => $body,
            Element::ThinMultipole($e) => $body,
            Element::Kicker($e) => $body,
            Element::Quadrupole($e) => $body,
            Element::Sextupole($e) => $body,
            Element::ThinRfCavity($e) => $body,
            Element::RfCavity($e) => $body,
            Element::CombinedFunctionBend($e) => $body,
            Element::Beamline($e) => $body,
        }
    };
}

#[derive(Debug, Clone)]
pub enum Element {
    Marker(Marker),
    Drift(Drift),
    SectorBend(SectorBend),
    Edge(Edge),
    ThinMultipole(ThinMultipole),
    Kicker(Kicker),
    Quadrupole(Quadrupole),
    Sextupole(Sextupole),
    ThinRfCavity(ThinRfCavity),
    RfCavity(RfCavity),
    CombinedFunctionBend(CombinedFunctionBend),
    Beamline(Beamline),
}

impl Element {
    pub fn core(&self) -> &ElementCore {
        dispatch!(self, e => &e.core)
    }

    pub(crate) fn core_mut(&mut self) -> &mut ElementCore {
        dispatch!(self, e => &mut e.core)
    }

    pub fn name(&self) -> &str {
        &self.core().name
    }

    /// Stable type tag, also used by the persisted line format.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Marker(_) => "marker",
            Element::Drift(_) => "drift",
            Element::SectorBend(_) => "sbend",
            Element::Edge(_) => "edge",
            Element::ThinMultipole(_) => "thin_multipole",
            Element::Kicker(_) => "kicker",
            Element::Quadrupole(_) => "quadrupole",
            Element::Sextupole(_) => "sextupole",
            Element::ThinRfCavity(_) => "thin_rf",
            Element::RfCavity(_) => "rf_cavity",
            Element::CombinedFunctionBend(_) => "cf_bend",
            Element::Beamline(_) => "beamline",
        }
    }

    pub fn length(&self) -> f64 {
        match self {
            Element::Beamline(line) => line.length(),
            other => other.core().length,
        }
    }

    pub fn strength(&self) -> f64 {
        self.core().strength
    }

    pub fn alignment(&self) -> Alignment {
        self.core().alignment
    }

    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.core_mut().alignment = alignment;
    }

    pub fn reference_ct(&self) -> f64 {
        self.core().reference_ct
    }

    pub fn is_composite(&self) -> bool {
        self.chain().is_some()
    }

    pub(crate) fn chain(&self) -> Option<&ElementChain> {
        match self {
            Element::Quadrupole(e) => Some(&e.chain),
            Element::Sextupole(e) => Some(&e.chain),
            Element::RfCavity(e) => Some(&e.chain),
            Element::CombinedFunctionBend(e) => Some(&e.chain),
            _ => None,
        }
    }

    pub(crate) fn chain_mut(&mut self) -> Option<&mut ElementChain> {
        match self {
            Element::Quadrupole(e) => Some(&mut e.chain),
            Element::Sextupole(e) => Some(&mut e.chain),
            Element::RfCavity(e) => Some(&mut e.chain),
            Element::CombinedFunctionBend(e) => Some(&mut e.chain),
            _ => None,
        }
    }

    /// Children of a composite or container, empty for leaves.
    pub fn children(&self) -> &[Element] {
        match self {
            Element::Beamline(line) => line.elements(),
            other => other.chain().map(ElementChain::elements).unwrap_or(&[]),
        }
    }

    /// Rebuilds a composite's chain from its own parameters.
    pub fn rebuild_chain(&mut self) -> Result<()> {
        match self {
            Element::Quadrupole(e) => e.rebuild_chain(),
            Element::Sextupole(e) => e.rebuild_chain(),
            Element::RfCavity(e) => e.rebuild_chain(),
            Element::CombinedFunctionBend(e) => e.rebuild_chain(),
            _ => Ok(()),
        }
    }

    pub fn propagator_name(&self) -> &'static str {
        match self {
            Element::SectorBend(e) => e.propagator().name(),
            Element::Quadrupole(e) => e.propagator().name(),
            Element::Sextupole(_)
            | Element::RfCavity(_)
            | Element::CombinedFunctionBend(_)
            | Element::Beamline(_) => CHAIN_PROPAGATOR,
            _ => SINGLE_MODEL_PROPAGATOR,
        }
    }

    /// Selects a numerical model by its stable name.
    pub fn set_propagator_name(&mut self, name: &str) -> Result<()> {
        match self {
            Element::SectorBend(e) => {
                e.set_propagator(BendPropagator::from_name(name)?);
                Ok(())
            }
            Element::Quadrupole(e) => {
                e.set_propagator(QuadrupolePropagator::from_name(name)?);
                Ok(())
            }
            other => {
                if name == other.propagator_name() {
                    Ok(())
                } else {
                    Err(BeamlineError::UnknownPropagator {
                        family: other.kind_name().to_string(),
                        name: name.to_string(),
                    })
                }
            }
        }
    }

    /// Propagates `particle` through the element, alignment included.
    ///
    /// On error `particle` is left as it was passed in.
    pub fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let entering = particle.clone();
        let result = self.propagate_aligned(particle);
        if result.is_err() {
            *particle = entering;
        }
        result
    }

    /// [`Element::propagate`] without the restore; composites use this for
    /// their children so only the outermost call takes a snapshot.
    pub(crate) fn propagate_aligned<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let alignment = self.core().alignment;
        alignment.enter(particle.state_mut());
        self.propagate_body(particle)?;
        alignment.exit(particle.state_mut());
        if !particle.state().is_finite() {
            return Err(BeamlineError::unphysical(
                self.name(),
                "non-finite phase-space coordinate",
            ));
        }
        Ok(())
    }

    fn propagate_body<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        match self {
            Element::Marker(_) => Ok(()),
            Element::Drift(e) => e.propagate(particle),
            Element::SectorBend(e) => e.propagate(particle),
            Element::Edge(e) => e.propagate(particle),
            Element::ThinMultipole(e) => e.propagate(particle),
            Element::Kicker(e) => e.propagate(particle),
            Element::Quadrupole(e) => e.propagate(particle),
            Element::Sextupole(e) => e.chain.propagate(&e.core.name, particle),
            Element::ThinRfCavity(e) => e.propagate(particle),
            Element::RfCavity(e) => e.chain.propagate(&e.core.name, particle),
            Element::CombinedFunctionBend(e) => e.chain.propagate(&e.core.name, particle),
            Element::Beamline(e) => e.propagate_sequence(particle),
        }
    }

    /// Path length of the on-axis orbit of `particle`'s reference through the element.
    pub fn orbit_length(&self, particle: &Particle) -> Result<f64> {
        match self {
            Element::SectorBend(e) => e.orbit_length(particle),
            Element::CombinedFunctionBend(e) => e.chain.orbit_length(particle),
            Element::Beamline(line) => line
                .iter()
                .try_fold(0.0, |acc, child| Ok(acc + child.orbit_length(particle)?)),
            other => Ok(other.core().length),
        }
    }

    /// Cuts the element at `fraction` of its length.
    ///
    /// Propagating through the first piece and then the second approximates
    /// the whole element; bend edge focusing is handed to the piece that keeps
    /// the corresponding face. The pieces carry no reference time.
    pub fn split(&self, fraction: f64) -> Result<(Element, Element)> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(BeamlineError::InvalidParameter(format!(
                "{}: split fraction must lie in (0, 1), got {fraction}",
                self.name()
            )));
        }
        if let Element::Beamline(_) = self {
            return Err(BeamlineError::unsupported(self.name(), "split of a beamline"));
        }
        if self.core().length == 0.0 {
            return Err(BeamlineError::unsupported(
                self.name(),
                "split of a zero-length element",
            ));
        }
        match self {
            Element::Drift(e) => {
                let (a, b) = e.split(fraction);
                Ok((Element::Drift(a), Element::Drift(b)))
            }
            Element::SectorBend(e) => {
                let (a, b) = e.split(fraction);
                Ok((Element::SectorBend(a), Element::SectorBend(b)))
            }
            Element::Kicker(e) => {
                let (a, b) = e.split(fraction);
                Ok((Element::Kicker(a), Element::Kicker(b)))
            }
            Element::Quadrupole(e) => {
                let (a, b) = e.split(fraction)?;
                Ok((Element::Quadrupole(a), Element::Quadrupole(b)))
            }
            Element::Sextupole(e) => {
                let (a, b) = e.split(fraction)?;
                Ok((Element::Sextupole(a), Element::Sextupole(b)))
            }
            Element::RfCavity(e) => {
                let (a, b) = e.split(fraction)?;
                Ok((Element::RfCavity(a), Element::RfCavity(b)))
            }
            Element::CombinedFunctionBend(e) => {
                let (a, b) = e.split(fraction)?;
                Ok((
                    Element::CombinedFunctionBend(a),
                    Element::CombinedFunctionBend(b),
                ))
            }
            other => Err(BeamlineError::unsupported(other.name(), "split")),
        }
    }

    /// Sets every reference time inside the element so that the reference
    /// particle leaves with `cdt` unchanged, and advances `particle` through it.
    pub fn register_reference_time(&mut self, particle: &mut Particle) -> Result<()> {
        let alignment = self.core().alignment;
        if let Element::Beamline(line) = self {
            alignment.enter(particle.state_mut());
            for child in line.iter_mut() {
                child.register_reference_time(particle)?;
            }
            alignment.exit(particle.state_mut());
            return Ok(());
        }

        let before = particle.cdt();
        let mut local = particle.clone();
        alignment.enter(local.state_mut());
        match self {
            Element::Quadrupole(quad) => quad.register_reference_time(&mut local)?,
            _ => {
                if let Some(chain) = self.chain_mut() {
                    chain.register(&mut local)?;
                } else {
                    self.core_mut().reference_ct = 0.0;
                    self.propagate_body(&mut local)?;
                    self.core_mut().reference_ct = local.cdt() - before;
                }
            }
        }

        self.propagate(particle)?;
        particle.set(Coordinate::Cdt, before);
        log::debug!(
            "registered {} \"{}\": reference c·dt = {:e} m",
            self.kind_name(),
            self.name(),
            self.reference_ct()
        );
        Ok(())
    }
}

macro_rules! element_from {
    ($($kind:ident),* $(,)?) => {
        $(
            impl From<$kind> for Element {
                fn from(value: $kind) -> Self {
                    Element::$kind(value)
                }
            }
        )*
    };
}

element_from!(
    Marker,
    Drift,
    SectorBend,
    Edge,
    ThinMultipole,
    Kicker,
    Quadrupole,
    Sextupole,
    ThinRfCavity,
    RfCavity,
    CombinedFunctionBend,
    Beamline,
);

#[cfg(test)]
pub(crate) mod test_support {
    use std::rc::Rc;

    use crate::differential::JetEnvironment;
    use crate::particle::{DifferentialParticle, Particle};
    use crate::state::PhaseSpaceState;

    use super::Element;

    pub fn proton_at(state: [f64; 6]) -> Particle {
        Particle::proton(2.0)
            .unwrap()
            .with_state(PhaseSpaceState::new(state))
    }

    pub fn track(element: &Element, particle: &Particle) -> Particle {
        let mut out = particle.clone();
        element.propagate(&mut out).unwrap();
        out
    }

    pub fn track_map(element: &Element, particle: &Particle, order: usize) -> DifferentialParticle {
        let env: Rc<JetEnvironment> = JetEnvironment::phase_space(order).unwrap();
        let mut dp = DifferentialParticle::from_particle(particle, &env).unwrap();
        element.propagate(&mut dp).unwrap();
        dp
    }

    /// The jet's standard part must reproduce plain tracking.
    pub fn assert_consistent(element: &Element, particle: &Particle) {
        let numeric = track(element, particle);
        let differential = track_map(element, particle, 2).to_particle();
        let diff = numeric.state().max_abs_difference(differential.state());
        assert!(
            diff <= 1e-14,
            "{}: numeric and differential tracking differ by {diff:e}",
            element.name()
        );
    }

    pub fn assert_err_contains<T: std::fmt::Debug>(
        result: crate::error::Result<T>,
        needle: &str,
    ) {
        match result {
            Ok(value) => panic!("expected error containing \"{needle}\", got Ok({value:?})"),
            Err(err) => assert!(
                err.to_string().contains(needle),
                "expected \"{needle}\" in \"{err}\""
            ),
        }
    }
}
