//! Differential algebra: truncated power series over a shared environment.

pub mod environment;
pub mod jet;
pub mod series;

pub use environment::{monomial_count, JetEnvironment, MAX_SUPPORTED_ORDER, MAX_TERMS};
pub use jet::Jet;
