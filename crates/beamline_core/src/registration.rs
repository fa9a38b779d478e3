//! Reference-orbit registration.
//!
//! A combined-function bend is aligned by shifting it horizontally until the
//! reference particle leaves with the mirror image of its entry angle
//! (`npx_out = -npx_in`). The shift is found with Newton's method on the
//! entry position measured from the magnet axis; the derivative comes from a
//! first-order map. When Newton does not converge a bounded stepping search
//! takes over and the result is reported as a warning.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, WarningKind};
use crate::differential::JetEnvironment;
use crate::element::{Alignment, Element};
use crate::error::{BeamlineError, Result};
use crate::particle::{DifferentialParticle, Particle};
use crate::state::Coordinate;
use crate::traits::ParticleLike;

/// Newton iterations always performed before convergence is accepted.
pub const NEWTON_MIN_ITERATIONS: usize = 5;
/// Newton iterations after which the stepping search takes over.
pub const NEWTON_MAX_ITERATIONS: usize = 15;
/// Residual angle (rad) accepted as converged.
pub const NEWTON_TOLERANCE: f64 = 1e-9;
/// `|∂npx_out/∂x_in|` below this is treated as a singular Jacobian.
pub const SINGULAR_JACOBIAN_THRESHOLD: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub min_newton_iterations: usize,
    pub max_newton_iterations: usize,
    pub newton_tolerance: f64,
    pub singular_threshold: f64,
    pub bracket_initial_step: f64,
    pub bracket_min_step: f64,
    pub bracket_shrink: f64,
    pub bracket_max_steps_per_stage: usize,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            min_newton_iterations: NEWTON_MIN_ITERATIONS,
            max_newton_iterations: NEWTON_MAX_ITERATIONS,
            newton_tolerance: NEWTON_TOLERANCE,
            singular_threshold: SINGULAR_JACOBIAN_THRESHOLD,
            bracket_initial_step: 1e-4,
            bracket_min_step: 0.9e-6,
            bracket_shrink: 10.0,
            bracket_max_steps_per_stage: 1000,
        }
    }
}

impl RegistrationSettings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> Result<()> {
            Err(BeamlineError::InvalidParameter(message.to_string()))
        };
        if self.max_newton_iterations == 0 {
            return invalid("max_newton_iterations must be greater than zero");
        }
        if self.min_newton_iterations > self.max_newton_iterations {
            return invalid("min_newton_iterations must not exceed max_newton_iterations");
        }
        if !(self.newton_tolerance >= 0.0 && self.newton_tolerance.is_finite()) {
            return invalid("newton_tolerance must be non-negative");
        }
        if !(self.singular_threshold >= 0.0 && self.singular_threshold.is_finite()) {
            return invalid("singular_threshold must be non-negative");
        }
        if !(self.bracket_initial_step > 0.0 && self.bracket_initial_step.is_finite()) {
            return invalid("bracket_initial_step must be positive");
        }
        if !(self.bracket_min_step > 0.0) {
            return invalid("bracket_min_step must be positive");
        }
        if !(self.bracket_shrink > 1.0 && self.bracket_shrink.is_finite()) {
            return invalid("bracket_shrink must be greater than one");
        }
        if self.bracket_max_steps_per_stage == 0 {
            return invalid("bracket_max_steps_per_stage must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMethod {
    Newton,
    Bracketing,
}

/// Result of aligning one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOutcome {
    pub element: String,
    /// Horizontal offset written into the element's alignment (m).
    pub offset: f64,
    /// `npx_out + npx_in` at the stored offset (rad).
    pub residual: f64,
    /// Newton iterations plus stepping-search evaluations.
    pub iterations: usize,
    pub method: AlignmentMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReport {
    pub alignments: Vec<AlignmentOutcome>,
}

impl RegistrationReport {
    pub fn fallback_count(&self) -> usize {
        self.alignments
            .iter()
            .filter(|outcome| outcome.method == AlignmentMethod::Bracketing)
            .count()
    }
}

pub struct ReferenceOrbitRegistrar<'a> {
    settings: RegistrationSettings,
    diagnostics: &'a Diagnostics,
}

impl ReferenceOrbitRegistrar<'static> {
    /// Registrar reporting through [`Diagnostics::global`].
    pub fn new(settings: RegistrationSettings) -> Result<Self> {
        Self::with_diagnostics(settings, Diagnostics::global())
    }
}

impl<'a> ReferenceOrbitRegistrar<'a> {
    pub fn with_diagnostics(
        settings: RegistrationSettings,
        diagnostics: &'a Diagnostics,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            diagnostics,
        })
    }

    pub fn settings(&self) -> &RegistrationSettings {
        &self.settings
    }

    /// Finds and stores the horizontal offset that makes `particle` leave
    /// `element` with `npx_out = -npx_in`.
    ///
    /// `particle` is the reference at the element entrance and is not
    /// modified. The vertical offset and roll of the element are kept.
    pub fn adjust_position(
        &self,
        element: &mut Element,
        particle: &Particle,
    ) -> Result<AlignmentOutcome> {
        match element {
            Element::SectorBend(_) | Element::CombinedFunctionBend(_) => {}
            other => {
                return Err(BeamlineError::unsupported(
                    other.name(),
                    "reference-orbit alignment",
                ))
            }
        }

        let x_ref = particle.x();
        let current = element.alignment();
        let mut unshifted = element.clone();
        unshifted.set_alignment(Alignment::new(0.0, current.y_offset, current.roll));
        let search = OffsetSearch {
            element: &unshifted,
            particle,
            env: JetEnvironment::phase_space(1)?,
        };

        let (z, residual, iterations, method) =
            match self.newton(&search, x_ref - current.x_offset)? {
                NewtonResult::Converged {
                    z,
                    residual,
                    iterations,
                } => (z, residual, iterations, AlignmentMethod::Newton),
                NewtonResult::Failed { iterations, last } => {
                    let (z, residual, evaluations) =
                        self.bracket(search.name(), x_ref, |z| search.residual(z))?;
                    self.diagnostics.warn(
                        WarningKind::AlignmentFallback,
                        format!(
                            "{}: Newton alignment did not converge after {iterations} iterations \
                             (last residual {last:e} rad); stepping search gave offset {:e} m \
                             with residual {residual:e} rad after {evaluations} evaluations",
                            element.name(),
                            x_ref - z,
                        ),
                    );
                    (
                        z,
                        residual,
                        iterations + evaluations,
                        AlignmentMethod::Bracketing,
                    )
                }
            };

        let offset = x_ref - z;
        element.set_alignment(Alignment::new(offset, current.y_offset, current.roll));
        log::debug!(
            "aligned \"{}\": x offset {offset:e} m, residual {residual:e} rad ({method:?}, {iterations} iterations)",
            element.name()
        );
        Ok(AlignmentOutcome {
            element: element.name().to_string(),
            offset,
            residual,
            iterations,
            method,
        })
    }

    /// Aligns every combined-function bend in `element`, then registers the
    /// reference time of every leaf, advancing `particle` through the whole
    /// element.
    pub fn register(
        &self,
        element: &mut Element,
        particle: &mut Particle,
    ) -> Result<RegistrationReport> {
        let mut report = RegistrationReport::default();
        self.register_into(element, particle, &mut report)?;
        log::info!(
            "registered \"{}\": {} bends aligned, {} by stepping search",
            element.name(),
            report.alignments.len(),
            report.fallback_count()
        );
        Ok(report)
    }

    fn register_into(
        &self,
        element: &mut Element,
        particle: &mut Particle,
        report: &mut RegistrationReport,
    ) -> Result<()> {
        match element {
            Element::Beamline(line) => {
                let alignment = line.core.alignment;
                alignment.enter(particle.state_mut());
                for child in line.iter_mut() {
                    self.register_into(child, particle, report)?;
                }
                alignment.exit(particle.state_mut());
                Ok(())
            }
            Element::CombinedFunctionBend(_) => {
                report
                    .alignments
                    .push(self.adjust_position(element, particle)?);
                element.register_reference_time(particle)
            }
            _ => element.register_reference_time(particle),
        }
    }

    fn newton(&self, search: &OffsetSearch<'_>, start: f64) -> Result<NewtonResult> {
        let settings = &self.settings;
        let mut z = start;
        let mut last = f64::NAN;
        for iteration in 1..=settings.max_newton_iterations {
            let (residual, derivative) = match search.linearize(z) {
                Ok(value) => value,
                Err(err) => {
                    log::debug!(
                        "{}: Newton iterate {z:e} m left the aperture: {err}",
                        search.name()
                    );
                    return Ok(NewtonResult::Failed {
                        iterations: iteration,
                        last,
                    });
                }
            };
            last = residual;
            if derivative.abs() < settings.singular_threshold {
                return Err(BeamlineError::SingularJacobian {
                    element: search.name().to_string(),
                    derivative,
                    offset: search.particle.x() - z,
                    iteration,
                });
            }
            if iteration >= settings.min_newton_iterations
                && residual.abs() < settings.newton_tolerance
            {
                return Ok(NewtonResult::Converged {
                    z,
                    residual,
                    iterations: iteration,
                });
            }
            z -= residual / derivative;
        }
        Ok(NewtonResult::Failed {
            iterations: settings.max_newton_iterations,
            last,
        })
    }

    /// Stepping search from the unshifted element, entering at `origin`.
    ///
    /// The direction is set by comparing the residual where the search stands
    /// with the residual one step further along. A stage walks while the
    /// residual keeps decreasing; a stage whose first step does not improve
    /// reverses direction before walking. After each stage the step shrinks.
    /// Returns the entry position, its residual and the number of residual
    /// evaluations.
    fn bracket(
        &self,
        name: &str,
        origin: f64,
        mut residual_at: impl FnMut(f64) -> Result<f64>,
    ) -> Result<(f64, f64, usize)> {
        let settings = &self.settings;
        let mut z = origin;
        let mut residual = residual_at(z)?;
        let mut evaluations = 1;
        let mut step = settings.bracket_initial_step;
        let mut direction = 1.0;

        while step >= settings.bracket_min_step {
            let mut candidate = residual_at(z + direction * step)?;
            evaluations += 1;
            if candidate.abs() >= residual.abs() {
                direction = -direction;
                candidate = residual_at(z + direction * step)?;
                evaluations += 1;
            }

            let mut taken = 0;
            while candidate.abs() < residual.abs() {
                z += direction * step;
                residual = candidate;
                taken += 1;
                if taken == settings.bracket_max_steps_per_stage {
                    self.diagnostics.warn(
                        WarningKind::AlignmentNotConverged,
                        format!(
                            "{name}: stepping search hit {taken} steps of {step:e} m at offset \
                             {:e} m (residual {residual:e} rad)",
                            origin - z,
                        ),
                    );
                    break;
                }
                candidate = residual_at(z + direction * step)?;
                evaluations += 1;
            }
            step /= settings.bracket_shrink;
        }
        Ok((z, residual, evaluations))
    }
}

enum NewtonResult {
    Converged {
        z: f64,
        residual: f64,
        iterations: usize,
    },
    Failed {
        iterations: usize,
        last: f64,
    },
}

/// Evaluates the alignment residual of a copy of the element with its
/// horizontal offset removed, as a function of the entry position `z`.
/// Entering that copy at `z` is the same as entering the element at `x_ref`
/// with `x_offset = x_ref - z`.
struct OffsetSearch<'a> {
    element: &'a Element,
    particle: &'a Particle,
    env: Rc<JetEnvironment>,
}

impl OffsetSearch<'_> {
    fn name(&self) -> &str {
        self.element.name()
    }

    fn entering_at(&self, z: f64) -> Particle {
        let mut entering = self.particle.clone();
        entering.set(Coordinate::X, z);
        entering
    }

    fn residual(&self, z: f64) -> Result<f64> {
        let mut tracked = self.entering_at(z);
        self.element.propagate(&mut tracked)?;
        Ok(tracked.npx() + self.particle.npx())
    }

    /// Residual from plain tracking and `∂npx_out/∂x_in` from a first-order map.
    fn linearize(&self, z: f64) -> Result<(f64, f64)> {
        let residual = self.residual(z)?;
        let mut map = DifferentialParticle::from_particle(&self.entering_at(z), &self.env)?;
        self.element.propagate(&mut map)?;
        let derivative = map.component(Coordinate::Npx).partial(Coordinate::X.index());
        Ok((residual, derivative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::test_support::*;
    use crate::element::{Beamline, CombinedFunctionBend, Drift, Quadrupole, SectorBend};
    use approx::assert_abs_diff_eq;

    const LENGTH: f64 = 2.0;
    const ANGLE: f64 = 0.05;

    fn focusing_bend() -> Element {
        let field = proton_at([0.0; 6])
            .kinematics()
            .field_for_bend(LENGTH, ANGLE);
        let mut bend =
            CombinedFunctionBend::with_edges("cf", LENGTH, field, ANGLE, 0.5 * ANGLE, 0.5 * ANGLE)
                .unwrap();
        bend.set_quadrupole(0.5).unwrap();
        Element::from(bend)
    }

    #[test]
    fn symmetric_bend_needs_no_offset() {
        let diagnostics = Diagnostics::new();
        let registrar =
            ReferenceOrbitRegistrar::with_diagnostics(RegistrationSettings::default(), &diagnostics)
                .unwrap();
        let mut bend = focusing_bend();
        let outcome = registrar
            .adjust_position(&mut bend, &proton_at([0.0; 6]))
            .unwrap();
        assert_eq!(outcome.method, AlignmentMethod::Newton);
        assert_eq!(outcome.iterations, NEWTON_MIN_ITERATIONS);
        assert_abs_diff_eq!(outcome.offset, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(bend.alignment().x_offset, outcome.offset);
        assert!(!diagnostics.has_fired(WarningKind::AlignmentFallback));
    }

    #[test]
    fn newton_mirrors_the_entry_angle() {
        let diagnostics = Diagnostics::new();
        let registrar =
            ReferenceOrbitRegistrar::with_diagnostics(RegistrationSettings::default(), &diagnostics)
                .unwrap();
        let mut bend = focusing_bend();
        bend.set_alignment(Alignment::new(0.0, 1e-4, 0.0));
        let p = proton_at([1e-3, 0.0, 0.0, 1e-4, 0.0, 0.0]);
        let outcome = registrar.adjust_position(&mut bend, &p).unwrap();

        assert_eq!(outcome.method, AlignmentMethod::Newton);
        assert!(outcome.residual.abs() < NEWTON_TOLERANCE);
        assert!(outcome.offset.abs() > 1e-5);
        assert_eq!(bend.alignment().y_offset, 1e-4);

        let mut unshifted = bend.clone();
        unshifted.set_alignment(Alignment::new(0.0, 1e-4, 0.0));
        let before = track(&unshifted, &p);
        assert!((before.npx() + p.npx()).abs() > 1e-6);
        let out = track(&bend, &p);
        assert_abs_diff_eq!(out.npx(), -p.npx(), epsilon = 1e-9);
    }

    #[test]
    fn stepping_search_takes_over_and_terminates() {
        let diagnostics = Diagnostics::new();
        let settings = RegistrationSettings {
            newton_tolerance: 0.0,
            ..Default::default()
        };
        let registrar = ReferenceOrbitRegistrar::with_diagnostics(settings, &diagnostics).unwrap();
        let p = proton_at([0.0, 0.0, 0.0, 1e-4, 0.0, 0.0]);
        let mut bend = focusing_bend();
        let outcome = registrar.adjust_position(&mut bend, &p).unwrap();

        assert_eq!(outcome.method, AlignmentMethod::Bracketing);
        assert!(outcome.iterations > NEWTON_MAX_ITERATIONS);
        assert!(outcome.residual.abs() < 1e-5, "residual {}", outcome.residual);
        assert_eq!(diagnostics.count(WarningKind::AlignmentFallback), 1);
        assert!(!diagnostics.has_fired(WarningKind::AlignmentNotConverged));
        assert_abs_diff_eq!(
            track(&bend, &p).npx() + p.npx(),
            outcome.residual,
            epsilon = 1e-15
        );
    }

    #[test]
    fn stepping_search_is_bounded_per_stage() {
        let diagnostics = Diagnostics::new();
        let settings = RegistrationSettings {
            newton_tolerance: 0.0,
            bracket_max_steps_per_stage: 1,
            ..Default::default()
        };
        let registrar = ReferenceOrbitRegistrar::with_diagnostics(settings, &diagnostics).unwrap();
        let mut bend = focusing_bend();
        let p = proton_at([0.0, 0.0, 0.0, 1e-3, 0.0, 0.0]);
        let outcome = registrar.adjust_position(&mut bend, &p).unwrap();
        assert_eq!(outcome.method, AlignmentMethod::Bracketing);
        assert!(diagnostics.has_fired(WarningKind::AlignmentNotConverged));
    }

    #[test]
    fn stepping_direction_follows_the_first_step() {
        let diagnostics = Diagnostics::new();
        let registrar =
            ReferenceOrbitRegistrar::with_diagnostics(RegistrationSettings::default(), &diagnostics)
                .unwrap();
        // Roots at -1e-4 and 1.5e-4. One step forward improves on the origin,
        // while one step back lands exactly on the other root.
        let residual = |z: f64| -> Result<f64> { Ok((z + 1e-4) * (z - 1.5e-4)) };
        assert!(residual(-1e-4).unwrap() == 0.0);

        let (z, r, evaluations) = registrar.bracket("cf", 0.0, residual).unwrap();
        assert_abs_diff_eq!(z, 1.5e-4, epsilon = 1e-6);
        assert!(r.abs() < 1e-12, "residual {r:e}");
        assert!(evaluations > 3);
        assert!(!diagnostics.has_fired(WarningKind::AlignmentNotConverged));
    }

    #[test]
    fn stepping_search_turns_back_after_overshooting() {
        let diagnostics = Diagnostics::new();
        let registrar = ReferenceOrbitRegistrar::with_diagnostics(
            RegistrationSettings::default(),
            &diagnostics,
        )
        .unwrap();
        // Root at 2.38e-4: the coarse stage stops at 2e-4, the next stage
        // continues forward to 2.4e-4, and the finest stage has to come back.
        let residual = |z: f64| -> Result<f64> { Ok(z - 2.38e-4) };
        let (z, r, _) = registrar.bracket("cf", 0.0, residual).unwrap();
        assert_abs_diff_eq!(z, 2.38e-4, epsilon = 1e-6);
        assert!(r.abs() < 1e-6);

        // Negative root: the first forward step gets worse and the search
        // reverses before walking.
        let (z, _, _) = registrar.bracket("cf", 0.0, |z| Ok(z + 3.2e-4)).unwrap();
        assert_abs_diff_eq!(z, -3.2e-4, epsilon = 1e-6);
    }

    #[test]
    fn field_free_bend_has_singular_jacobian() {
        let diagnostics = Diagnostics::new();
        let registrar =
            ReferenceOrbitRegistrar::with_diagnostics(RegistrationSettings::default(), &diagnostics)
                .unwrap();
        let mut bend = Element::from(SectorBend::new("flat", 1.0, 0.0, 0.0).unwrap());
        let err = registrar
            .adjust_position(&mut bend, &proton_at([0.0; 6]))
            .unwrap_err();
        match err {
            BeamlineError::SingularJacobian {
                element,
                derivative,
                iteration,
                ..
            } => {
                assert_eq!(element, "flat");
                assert_eq!(derivative, 0.0);
                assert_eq!(iteration, 1);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(bend.alignment(), Alignment::default());
    }

    #[test]
    fn only_bends_can_be_aligned() {
        let registrar = ReferenceOrbitRegistrar::new(RegistrationSettings::default()).unwrap();
        let mut quad = Element::from(Quadrupole::new("q", 0.5, 1.0).unwrap());
        assert_err_contains(
            registrar.adjust_position(&mut quad, &proton_at([0.0; 6])),
            "not supported",
        );
    }

    #[test]
    fn register_preserves_reference_time() {
        let diagnostics = Diagnostics::new();
        let registrar =
            ReferenceOrbitRegistrar::with_diagnostics(RegistrationSettings::default(), &diagnostics)
                .unwrap();
        let mut cell = Beamline::new("cell").unwrap();
        cell.push(Drift::new("d1", 1.5).unwrap());
        cell.push(Quadrupole::new("qf", 0.5, 1.2).unwrap());
        let mut line = Beamline::new("line").unwrap();
        line.push(cell);
        line.push(focusing_bend());
        line.push(Drift::new("d2", 0.7).unwrap());
        let mut line = Element::from(line);

        let mut reference = proton_at([0.0; 6]);
        let report = registrar.register(&mut line, &mut reference).unwrap();
        assert_eq!(report.alignments.len(), 1);
        assert_eq!(report.alignments[0].element, "cf");
        assert_eq!(report.fallback_count(), 0);
        assert_eq!(reference.cdt(), 0.0);

        let Element::Beamline(registered) = &line else {
            unreachable!()
        };
        let drift = registered.deep_iter().next().unwrap();
        assert!(drift.reference_ct() > 1.5);

        let out = track(&line, &proton_at([0.0; 6]));
        assert_abs_diff_eq!(out.cdt(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.x(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn settings_are_validated() {
        assert!(RegistrationSettings::default().validate().is_ok());
        let bad = [
            RegistrationSettings {
                max_newton_iterations: 0,
                ..Default::default()
            },
            RegistrationSettings {
                min_newton_iterations: 20,
                ..Default::default()
            },
            RegistrationSettings {
                bracket_shrink: 1.0,
                ..Default::default()
            },
            RegistrationSettings {
                bracket_min_step: 0.0,
                ..Default::default()
            },
        ];
        for settings in bad {
            assert!(ReferenceOrbitRegistrar::new(settings).is_err());
        }
    }
}
