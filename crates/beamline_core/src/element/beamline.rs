use crate::error::Result;
use crate::traits::ParticleLike;

use super::{Element, ElementCore};

/// Ordered, possibly nested, sequence of elements.
#[derive(Debug, Clone)]
pub struct Beamline {
    pub(crate) core: ElementCore,
    elements: Vec<Element>,
}

impl Beamline {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            core: ElementCore::new(name, 0.0, 0.0)?,
            elements: Vec::new(),
        })
    }

    /// Infallible constructor for callers that already hold the elements.
    ///
    /// An empty name is replaced by `"beamline"`.
    pub fn with_elements(name: impl Into<String>, elements: Vec<Element>) -> Self {
        let mut name = name.into();
        if name.is_empty() {
            name = "beamline".into();
        }
        let mut line = Self {
            core: ElementCore {
                name,
                length: 0.0,
                strength: 0.0,
                alignment: Default::default(),
                reference_ct: 0.0,
            },
            elements,
        };
        line.update_length();
        line
    }

    pub fn push(&mut self, element: impl Into<Element>) {
        self.elements.push(element.into());
        self.update_length();
    }

    fn update_length(&mut self) {
        self.core.length = self.elements.iter().map(Element::length).sum();
    }

    pub fn length(&self) -> f64 {
        self.core.length
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Top-level elements only.
    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Element> {
        self.elements.iter_mut()
    }

    /// Every element that is not itself a beamline, descending into nested
    /// beamlines in order. Composites are yielded whole.
    pub fn deep_iter(&self) -> DeepIter<'_> {
        DeepIter {
            stack: vec![self.elements.iter()],
        }
    }

    pub(crate) fn propagate_sequence<P: ParticleLike>(&self, particle: &mut P) -> Result<()> {
        for element in &self.elements {
            element.propagate_aligned(particle)?;
        }
        Ok(())
    }
}

pub struct DeepIter<'a> {
    stack: Vec<std::slice::Iter<'a, Element>>,
}

impl<'a> Iterator for DeepIter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(Element::Beamline(inner)) => self.stack.push(inner.elements.iter()),
                Some(element) => return Some(element),
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}
