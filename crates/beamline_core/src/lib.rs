//! The `beamline_core` crate propagates particles through accelerator beamline
//! elements and extracts truncated-power-series transfer maps from the same
//! physics.
//!
//! Every element model is written once over the [`Scalar`] abstraction, so a
//! plain [`Particle`] (`f64` coordinates) and a [`DifferentialParticle`]
//! ([`Jet`] coordinates) run identical code and the standard part of a map
//! reproduces numeric tracking bit for bit.
//!
//! Key components:
//! - **Differential algebra**: [`JetEnvironment`] and [`Jet`], multivariate
//!   truncated power series with analytic functions.
//! - **Elements**: the closed [`Element`] set, runtime-selectable propagator
//!   variants, composite magnets that own an internal chain, and splitting.
//! - **Registration**: [`ReferenceOrbitRegistrar`] aligns combined-function
//!   bends and sets per-element reference times.
//! - **Persistence**: a whitespace-delimited line format for element lists.

pub mod diagnostics;
pub mod differential;
pub mod element;
pub mod error;
pub mod kinematics;
pub mod particle;
pub mod persist;
pub mod registration;
pub mod state;
pub mod traits;

/// Edge and bend angles smaller than this (radians) are set to exactly zero.
pub const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Number of thin kicks a composite magnet is sliced into by default.
pub const DEFAULT_KICK_COUNT: usize = 4;

pub use diagnostics::{Diagnostics, WarningKind};
pub use differential::{Jet, JetEnvironment};
pub use element::{Alignment, Beamline, Element};
pub use error::{BeamlineError, Result};
pub use kinematics::ReferenceKinematics;
pub use particle::{DifferentialParticle, Particle};
pub use registration::{
    AlignmentMethod, AlignmentOutcome, ReferenceOrbitRegistrar, RegistrationReport,
    RegistrationSettings,
};
pub use state::{Coordinate, DifferentialState, PhaseSpaceState, PhaseVector};
pub use traits::{ParticleLike, Scalar};
