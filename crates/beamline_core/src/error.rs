//! Error types for beamline_core.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BeamlineError {
    #[error("Reference energy {energy} GeV is below the rest mass {mass} GeV")]
    EnergyBelowMass { energy: f64, mass: f64 },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Differential states belong to different environments")]
    EnvironmentMismatch,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Element {element}: unphysical state ({reason})")]
    UnphysicalState { element: String, reason: String },

    #[error(
        "Element {element}: singular Jacobian d(npx_out)/d(x_in) = {derivative:e} \
         at offset {offset:e} m (iteration {iteration}); the alignment may be multi-valued"
    )]
    SingularJacobian {
        element: String,
        derivative: f64,
        offset: f64,
        iteration: usize,
    },

    #[error("Element {element}: {operation} is not supported")]
    Unsupported { element: String, operation: String },

    #[error("Element {element}: no {family} multipole in chain")]
    NoSuchMultipole { element: String, family: String },

    #[error("Unknown {family} propagator \"{name}\"")]
    UnknownPropagator { family: String, name: String },
}

pub type Result<T> = std::result::Result<T, BeamlineError>;

impl BeamlineError {
    pub(crate) fn unphysical(element: &str, reason: impl Into<String>) -> Self {
        BeamlineError::UnphysicalState {
            element: element.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(element: &str, operation: impl Into<String>) -> Self {
        BeamlineError::Unsupported {
            element: element.to_string(),
            operation: operation.into(),
        }
    }
}
