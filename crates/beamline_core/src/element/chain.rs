use crate::error::{BeamlineError, Result};
use crate::particle::Particle;
use crate::traits::ParticleLike;

use super::Element;

/// Ordered children owned by a composite element.
///
/// A chain is never empty while in use; [`ElementChain::teardown`] empties it
/// and the owning element's `rebuild_chain` fills it again.
#[derive(Debug, Clone, Default)]
pub struct ElementChain {
    elements: Vec<Element>,
}

impl ElementChain {
    pub(crate) fn new(owner: &str, elements: Vec<Element>) -> Result<Self> {
        if elements.is_empty() {
            return Err(BeamlineError::InvalidParameter(format!(
                "{owner}: a composite needs at least one child"
            )));
        }
        Ok(Self { elements })
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Drops every child.
    pub fn teardown(&mut self) {
        self.elements.clear();
    }

    pub(crate) fn propagate<P: ParticleLike>(&self, owner: &str, particle: &mut P) -> Result<()> {
        if self.elements.is_empty() {
            return Err(BeamlineError::unsupported(
                owner,
                "propagation through a torn-down chain",
            ));
        }
        for child in &self.elements {
            child.propagate_aligned(particle)?;
        }
        Ok(())
    }

    pub(crate) fn register(&mut self, particle: &mut Particle) -> Result<()> {
        for child in &mut self.elements {
            child.register_reference_time(particle)?;
        }
        Ok(())
    }

    pub(crate) fn orbit_length(&self, particle: &Particle) -> Result<f64> {
        self.elements
            .iter()
            .try_fold(0.0, |acc, child| Ok(acc + child.orbit_length(particle)?))
    }
}
