//! Sector bends.
//!
//! The body of every exact variant is [`sector_body`]: motion in a uniform
//! vertical field between two radial planes `angle` apart. Edge-focusing
//! variants add thin pole-face kicks around that body; they never carry their
//! own copy of the body physics.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::error::{BeamlineError, Result};
use crate::kinematics::ReferenceKinematics;
use crate::particle::Particle;
use crate::state::{Coordinate, PhaseSpaceState, PhaseVector};
use crate::traits::{ParticleLike, Scalar};

use super::drift::drift_path;
use super::thin::edge_kick;
use super::{
    advance_time, advance_time_linear, check_finite, longitudinal_momentum, snap_angle,
    ElementCore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BendPropagator {
    /// Body plus both pole-face kicks.
    #[default]
    Exact,
    /// Body only.
    NoEdge,
    /// Entry face kick, then body.
    InEdge,
    /// Body, then exit face kick.
    OutEdge,
    /// First-order transport matrices for body and faces.
    Mad,
}

impl BendPropagator {
    pub const ALL: [BendPropagator; 5] = [
        BendPropagator::Exact,
        BendPropagator::NoEdge,
        BendPropagator::InEdge,
        BendPropagator::OutEdge,
        BendPropagator::Mad,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BendPropagator::Exact => "exact",
            BendPropagator::NoEdge => "no_edge",
            BendPropagator::InEdge => "in_edge",
            BendPropagator::OutEdge => "out_edge",
            BendPropagator::Mad => "mad",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| BeamlineError::UnknownPropagator {
                family: "bend".into(),
                name: name.to_string(),
            })
    }

    /// Variants for the upstream and downstream pieces of a split, such that
    /// each face is kicked exactly once across the pair.
    pub fn split(self) -> (Self, Self) {
        match self {
            BendPropagator::Exact => (BendPropagator::InEdge, BendPropagator::OutEdge),
            BendPropagator::InEdge => (BendPropagator::InEdge, BendPropagator::NoEdge),
            BendPropagator::OutEdge => (BendPropagator::NoEdge, BendPropagator::OutEdge),
            BendPropagator::NoEdge => (BendPropagator::NoEdge, BendPropagator::NoEdge),
            BendPropagator::Mad => (BendPropagator::Mad, BendPropagator::Mad),
        }
    }

    fn kicks_entry(self) -> bool {
        matches!(
            self,
            BendPropagator::Exact | BendPropagator::InEdge | BendPropagator::Mad
        )
    }

    fn kicks_exit(self) -> bool {
        matches!(
            self,
            BendPropagator::Exact | BendPropagator::OutEdge | BendPropagator::Mad
        )
    }
}

/// `1 − cos θ` without cancellation.
fn versine(angle: f64) -> f64 {
    let s = (0.5 * angle).sin();
    2.0 * s * s
}

/// Transports the transverse coordinates through a uniform field of
/// normalised strength `b1 = B/Bρ` between the entry face and an exit face
/// rotated by `angle`, returning the path length.
pub(crate) fn sector_body<S: Scalar>(
    element: &str,
    state: &mut PhaseVector<S>,
    length: f64,
    angle: f64,
    b1: f64,
) -> Result<S> {
    if b1 == 0.0 && angle == 0.0 {
        return drift_path(element, state, length);
    }

    let one_plus = state.ndp().clone() + 1.0;
    let npx = state.npx().clone();
    let npy = state.npy().clone();
    let x = state.x().clone();
    let pt2 = one_plus.square() - npy.square();
    let pz = longitudinal_momentum(element, &one_plus, &npx, &npy)?;

    if b1 == 0.0 {
        // straight line to the rotated exit face
        let rho = length / angle;
        let (s, c) = angle.sin_cos();
        let denominator = pz.clone() * c - npx.clone() * s;
        if !(denominator.standard_part() > 0.0) {
            return Err(BeamlineError::unphysical(
                element,
                "trajectory does not reach the exit face",
            ));
        }
        let t = (x.clone() + rho) * s / denominator;
        let forward = npx.clone() * c + pz * s;
        state[Coordinate::X] = x * c - rho * versine(angle) + forward.clone() * t.clone();
        state[Coordinate::Npx] = forward;
        state[Coordinate::Y] = state.y().clone() + npy * t.clone();
        return Ok(one_plus * t);
    }

    let pt = pt2.sqrt();
    let (pxf, exit_offset) = if angle == 0.0 {
        (npx.clone() - b1 * length, x.clone())
    } else {
        let rho = length / angle;
        let (s, c) = angle.sin_cos();
        let pxf = npx.clone() * c + (pz.clone() - (x.clone() + rho) * b1) * s;
        (pxf, x.clone() * c - rho * versine(angle))
    };
    let pzf2 = pt2 - pxf.square();
    if !(pzf2.standard_part() > 0.0) {
        return Err(BeamlineError::unphysical(
            element,
            "particle turns back inside the bend",
        ));
    }
    let pzf = pzf2.sqrt();
    let (s, c) = angle.sin_cos();
    let xf = exit_offset + (npx.clone() * s - pz * c + pzf) / b1;
    let phi = (npx / pt.clone()).asin() - (pxf.clone() / pt).asin() + angle;

    state[Coordinate::X] = xf;
    state[Coordinate::Npx] = pxf;
    state[Coordinate::Y] = state.y().clone() + npy * phi.clone() / b1;
    Ok(one_plus * phi / b1)
}

/// First-order sector-bend transport with curvature `h = b1`.
fn mad_body<S: Scalar>(
    kinematics: &ReferenceKinematics,
    state: &mut PhaseVector<S>,
    length: f64,
    h: f64,
    reference_ct: f64,
) {
    let x = state.x().clone();
    let npx = state.npx().clone();
    let delta = state.ndp().clone();
    state[Coordinate::Y] = state.y().clone() + state.npy().clone() * length;

    if h == 0.0 {
        state[Coordinate::X] = x + npx * length;
        let zero = delta.lift(0.0);
        advance_time_linear(kinematics, state, length, zero, reference_ct);
        return;
    }

    let theta = h * length;
    let rho = 1.0 / h;
    let (s, c) = theta.sin_cos();
    let v = versine(theta);
    state[Coordinate::X] =
        x.clone() * c + npx.clone() * (rho * s) + delta.clone() * (rho * v);
    state[Coordinate::Npx] = x.clone() * (-s * h) + npx.clone() * c + delta.clone() * s;
    let extra = x * s + npx * (rho * v) + delta * (rho * (theta - s));
    advance_time_linear(kinematics, state, length, extra, reference_ct);
}

/// Bend with radial entry and exit planes. `strength` is the dipole field in
/// tesla; `angle` is the geometric bend angle of the reference frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorBend {
    pub(crate) core: ElementCore,
    angle: f64,
    entry_angle: f64,
    exit_angle: f64,
    tan_entry: f64,
    tan_exit: f64,
    propagator: BendPropagator,
}

impl SectorBend {
    pub fn new(name: impl Into<String>, length: f64, field: f64, angle: f64) -> Result<Self> {
        Self::with_edges(name, length, field, angle, 0.0, 0.0)
    }

    pub fn with_edges(
        name: impl Into<String>,
        length: f64,
        field: f64,
        angle: f64,
        entry_angle: f64,
        exit_angle: f64,
    ) -> Result<Self> {
        Self::with_diagnostics(
            name,
            length,
            field,
            angle,
            entry_angle,
            exit_angle,
            Diagnostics::global(),
        )
    }

    pub fn with_diagnostics(
        name: impl Into<String>,
        length: f64,
        field: f64,
        angle: f64,
        entry_angle: f64,
        exit_angle: f64,
        diagnostics: &Diagnostics,
    ) -> Result<Self> {
        let core = ElementCore::new(name, length, field)?;
        check_finite(&core.name, "bend angle", angle)?;
        let angle = snap_angle(&core.name, "bend", angle, diagnostics);
        if angle != 0.0 && length == 0.0 {
            return Err(BeamlineError::InvalidParameter(format!(
                "{}: a zero-length bend cannot bend by {angle} rad",
                core.name
            )));
        }
        let mut bend = Self::from_parts(core, angle, 0.0, 0.0, BendPropagator::Exact);
        bend.set_edge_angles_with(entry_angle, exit_angle, diagnostics)?;
        Ok(bend)
    }

    /// Internal constructor; angles are taken as already snapped.
    pub(crate) fn from_parts(
        core: ElementCore,
        angle: f64,
        entry_angle: f64,
        exit_angle: f64,
        propagator: BendPropagator,
    ) -> Self {
        Self {
            core,
            angle,
            entry_angle,
            exit_angle,
            tan_entry: entry_angle.tan(),
            tan_exit: exit_angle.tan(),
            propagator,
        }
    }

    pub fn with_propagator(mut self, propagator: BendPropagator) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn field(&self) -> f64 {
        self.core.strength
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn entry_angle(&self) -> f64 {
        self.entry_angle
    }

    pub fn exit_angle(&self) -> f64 {
        self.exit_angle
    }

    pub fn tan_entry(&self) -> f64 {
        self.tan_entry
    }

    pub fn tan_exit(&self) -> f64 {
        self.tan_exit
    }

    pub fn propagator(&self) -> BendPropagator {
        self.propagator
    }

    pub fn set_propagator(&mut self, propagator: BendPropagator) {
        self.propagator = propagator;
    }

    pub fn set_field(&mut self, field: f64) -> Result<()> {
        check_finite(&self.core.name, "field", field)?;
        self.core.strength = field;
        Ok(())
    }

    pub fn set_edge_angles(&mut self, entry_angle: f64, exit_angle: f64) -> Result<()> {
        self.set_edge_angles_with(entry_angle, exit_angle, Diagnostics::global())
    }

    pub fn set_edge_angles_with(
        &mut self,
        entry_angle: f64,
        exit_angle: f64,
        diagnostics: &Diagnostics,
    ) -> Result<()> {
        check_finite(&self.core.name, "entry edge angle", entry_angle)?;
        check_finite(&self.core.name, "exit edge angle", exit_angle)?;
        self.entry_angle = snap_angle(&self.core.name, "entry edge", entry_angle, diagnostics);
        self.exit_angle = snap_angle(&self.core.name, "exit edge", exit_angle, diagnostics);
        self.tan_entry = self.entry_angle.tan();
        self.tan_exit = self.exit_angle.tan();
        Ok(())
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        let kinematics = *particle.kinematics();
        let b1 = self.core.strength / kinematics.brho();
        let state = particle.state_mut();

        if self.propagator.kicks_entry() {
            edge_kick(state, b1 * self.tan_entry);
        }
        if self.propagator == BendPropagator::Mad {
            mad_body(
                &kinematics,
                state,
                self.core.length,
                b1,
                self.core.reference_ct,
            );
        } else {
            let path = sector_body(&self.core.name, state, self.core.length, self.angle, b1)?;
            advance_time(&kinematics, state, path, self.core.reference_ct);
        }
        if self.propagator.kicks_exit() {
            edge_kick(state, b1 * self.tan_exit);
        }
        Ok(())
    }

    pub(crate) fn orbit_length(&self, particle: &Particle) -> Result<f64> {
        let b1 = self.core.strength / particle.brho();
        let mut state = PhaseSpaceState::zeros();
        sector_body(&self.core.name, &mut state, self.core.length, self.angle, b1)
    }

    pub(crate) fn split(&self, fraction: f64) -> (SectorBend, SectorBend) {
        self.split_with(fraction, Diagnostics::global())
    }

    /// Piece angles that fall below the snapping threshold become zero.
    pub(crate) fn split_with(
        &self,
        fraction: f64,
        diagnostics: &Diagnostics,
    ) -> (SectorBend, SectorBend) {
        let (first, second) = self.propagator.split();
        let length = self.core.length;
        let name = &self.core.name;
        let a = Self::from_parts(
            self.core.piece(length * fraction, self.core.strength),
            snap_angle(name, "bend", self.angle * fraction, diagnostics),
            self.entry_angle,
            0.0,
            first,
        );
        let b = Self::from_parts(
            self.core.piece(length * (1.0 - fraction), self.core.strength),
            snap_angle(name, "bend", self.angle * (1.0 - fraction), diagnostics),
            0.0,
            self.exit_angle,
            second,
        );
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::WarningKind;
    use crate::element::drift::Drift;
    use crate::element::test_support::*;
    use crate::element::Element;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const LENGTH: f64 = 2.0;
    const ANGLE: f64 = 0.2;

    fn matched_bend(entry: f64, exit: f64) -> SectorBend {
        let p = proton_at([0.0; 6]);
        let field = p.kinematics().field_for_bend(LENGTH, ANGLE);
        SectorBend::with_diagnostics("b", LENGTH, field, ANGLE, entry, exit, &Diagnostics::new())
            .unwrap()
    }

    fn off_axis() -> Particle {
        proton_at([1e-3, -5e-4, 0.0, 2e-4, 3e-4, 1e-3])
    }

    #[test]
    fn reference_particle_follows_the_design_arc() {
        let bend = Element::from(matched_bend(0.0, 0.0));
        let p = proton_at([0.0; 6]);
        let out = track(&bend, &p);
        assert_abs_diff_eq!(out.x(), 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(out.npx(), 0.0, epsilon = 1e-14);
        assert_relative_eq!(out.cdt(), LENGTH / p.beta(), max_relative = 1e-12);
        assert_relative_eq!(bend.orbit_length(&p).unwrap(), LENGTH, max_relative = 1e-12);
    }

    #[test]
    fn every_variant_agrees_with_its_differential_form() {
        for propagator in BendPropagator::ALL {
            let bend = Element::from(matched_bend(0.05, -0.03).with_propagator(propagator));
            assert_consistent(&bend, &off_axis());
        }
        let rectangular = SectorBend::new("r", 1.0, 0.3, 0.0).unwrap();
        assert_consistent(&Element::from(rectangular), &off_axis());
        let field_free = SectorBend::new("f", 1.0, 0.0, 0.1).unwrap();
        assert_consistent(&Element::from(field_free), &off_axis());
    }

    #[test]
    fn zero_field_bend_is_a_drift_for_every_variant() {
        let p = off_axis();
        let drift = track(&Element::from(Drift::new("d", LENGTH).unwrap()), &p);
        for propagator in BendPropagator::ALL {
            let bend = SectorBend::with_edges("b0", LENGTH, 0.0, 0.0, 0.1, 0.2)
                .unwrap()
                .with_propagator(propagator);
            let out = track(&Element::from(bend), &p);
            if propagator == BendPropagator::Mad {
                assert_relative_eq!(out.x(), p.x() + LENGTH * p.npx(), max_relative = 1e-14);
                assert_relative_eq!(out.y(), p.y() + LENGTH * p.npy(), max_relative = 1e-14);
            } else {
                assert_eq!(out.state(), drift.state(), "{}", propagator.name());
            }
            assert_eq!(out.npx(), p.npx());
            assert_eq!(out.npy(), p.npy());
        }
    }

    #[test]
    fn split_pieces_reproduce_the_whole_bend() {
        let p = off_axis();
        for propagator in BendPropagator::ALL {
            let whole = Element::from(matched_bend(0.07, 0.04).with_propagator(propagator));
            for fraction in [0.25, 0.5, 0.8] {
                let (a, b) = whole.split(fraction).unwrap();
                let pieces = track(&b, &track(&a, &p));
                let diff = track(&whole, &p).state().max_abs_difference(pieces.state());
                assert!(diff < 1e-12, "{} at {fraction}: {diff:e}", propagator.name());
            }
        }
    }

    #[test]
    fn split_hands_each_face_to_one_piece() {
        let bend = matched_bend(0.07, 0.04);
        let (a, b) = bend.split(0.4);
        assert_eq!(a.propagator(), BendPropagator::InEdge);
        assert_eq!(b.propagator(), BendPropagator::OutEdge);
        assert_eq!((a.entry_angle(), a.exit_angle()), (0.07, 0.0));
        assert_eq!((b.entry_angle(), b.exit_angle()), (0.0, 0.04));
        assert_relative_eq!(a.angle() + b.angle(), ANGLE);

        let (a2, b2) = a.split(0.5);
        assert_eq!(a2.propagator(), BendPropagator::InEdge);
        assert_eq!(b2.propagator(), BendPropagator::NoEdge);
    }

    #[test]
    fn split_snaps_tiny_piece_angles() {
        let diagnostics = Diagnostics::new();
        let bend =
            SectorBend::with_diagnostics("b", 1.0, 0.5, 1.5e-6, 0.0, 0.0, &diagnostics).unwrap();
        assert_eq!(bend.angle(), 1.5e-6);
        assert!(!diagnostics.has_fired(WarningKind::AngleSnapped));

        let (a, b) = bend.split_with(0.5, &diagnostics);
        assert_eq!(a.angle().to_bits(), 0.0f64.to_bits());
        assert_eq!(b.angle().to_bits(), 0.0f64.to_bits());
        assert!(diagnostics.has_fired(WarningKind::AngleSnapped));

        let (a, b) = bend.split_with(0.9, &diagnostics);
        assert_eq!(a.angle(), 1.5e-6 * 0.9);
        assert_eq!(b.angle(), 0.0);
    }

    #[test]
    fn tiny_edge_angles_snap_to_zero() {
        let diagnostics = Diagnostics::new();
        let snapped =
            SectorBend::with_diagnostics("b", 1.0, 0.5, 0.1, 5e-7, -5e-7, &diagnostics).unwrap();
        let exact =
            SectorBend::with_diagnostics("b", 1.0, 0.5, 0.1, 0.0, 0.0, &diagnostics).unwrap();
        assert_eq!(snapped, exact);
        assert_eq!(snapped.entry_angle().to_bits(), 0.0f64.to_bits());
        assert_eq!(snapped.tan_exit().to_bits(), 0.0f64.to_bits());
        assert!(diagnostics.has_fired(WarningKind::AngleSnapped));

        let p = off_axis();
        assert_eq!(
            track(&Element::from(snapped), &p),
            track(&Element::from(exact), &p)
        );
    }

    #[test]
    fn exact_map_is_transversely_symplectic() {
        let bend = Element::from(matched_bend(0.1, -0.05));
        let map = track_map(&bend, &off_axis(), 1);
        let error = map.differential_state().transverse_symplectic_error().unwrap();
        assert!(error < 1e-12, "symplectic error {error:e}");
    }

    #[test]
    fn mad_matches_exact_to_first_order_on_axis() {
        let p = proton_at([0.0; 6]);
        let exact = track_map(&Element::from(matched_bend(0.1, 0.1)), &p, 1)
            .jacobian()
            .unwrap();
        let mad = track_map(
            &Element::from(matched_bend(0.1, 0.1).with_propagator(BendPropagator::Mad)),
            &p,
            1,
        )
        .jacobian()
        .unwrap();
        for (e, m) in exact.iter().zip(mad.iter()) {
            assert_abs_diff_eq!(*e, *m, epsilon = 1e-10);
        }
    }

    #[test]
    fn propagator_names_round_trip() {
        for propagator in BendPropagator::ALL {
            assert_eq!(BendPropagator::from_name(propagator.name()).unwrap(), propagator);
        }
        assert!(BendPropagator::from_name("teapot").is_err());
    }

    #[test]
    fn zero_length_bend_with_angle_is_rejected() {
        assert!(SectorBend::new("b", 0.0, 1.0, 0.1).is_err());
    }
}
