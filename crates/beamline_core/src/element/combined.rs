//! Combined-function bends.
//!
//! The magnet is modelled as a chain: entry face, `N` thin stations of
//! quadrupole, sextupole and octupole kicks interleaved with `N + 1` body
//! segments on TEAPOT spacing, and the exit face. Body segments share the
//! dipole field and bend by the same fraction of the total angle as their
//! share of the length.

use crate::diagnostics::Diagnostics;
use crate::error::{BeamlineError, Result};

use super::bend::{BendPropagator, SectorBend};
use super::chain::ElementChain;
use super::quadrupole::{check_kick_count, teapot_spacing};
use super::thin::{Edge, MultipoleOrder, ThinMultipole};
use super::{check_finite, snap_angle, Element, ElementCore};

/// `strength` is the dipole field in tesla.
#[derive(Debug, Clone)]
pub struct CombinedFunctionBend {
    pub(crate) core: ElementCore,
    angle: f64,
    entry_angle: f64,
    exit_angle: f64,
    tan_entry: f64,
    tan_exit: f64,
    kick_count: usize,
    pub(crate) chain: ElementChain,
}

impl CombinedFunctionBend {
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
        if length == 0.0 {
            return Err(BeamlineError::InvalidParameter(format!(
                "{}: a combined-function bend needs a positive length",
                core.name
            )));
        }
        check_finite(&core.name, "bend angle", angle)?;
        check_finite(&core.name, "entry edge angle", entry_angle)?;
        check_finite(&core.name, "exit edge angle", exit_angle)?;
        let angle = snap_angle(&core.name, "bend", angle, diagnostics);
        let entry_angle = snap_angle(&core.name, "entry edge", entry_angle, diagnostics);
        let exit_angle = snap_angle(&core.name, "exit edge", exit_angle, diagnostics);
        let mut bend = Self {
            core,
            angle,
            entry_angle,
            exit_angle,
            tan_entry: entry_angle.tan(),
            tan_exit: exit_angle.tan(),
            kick_count: crate::DEFAULT_KICK_COUNT,
            chain: ElementChain::default(),
        };
        bend.rebuild_chain()?;
        Ok(bend)
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

    pub fn kick_count(&self) -> usize {
        self.kick_count
    }

    pub fn chain(&self) -> &ElementChain {
        &self.chain
    }

    pub fn set_field(&mut self, field: f64) -> Result<()> {
        check_finite(&self.core.name, "field", field)?;
        self.core.strength = field;
        self.rebuild_chain()
    }

    pub fn set_angle(&mut self, angle: f64) -> Result<()> {
        self.set_angle_with(angle, Diagnostics::global())
    }

    pub fn set_angle_with(&mut self, angle: f64, diagnostics: &Diagnostics) -> Result<()> {
        check_finite(&self.core.name, "bend angle", angle)?;
        self.angle = snap_angle(&self.core.name, "bend", angle, diagnostics);
        self.rebuild_chain()
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
        self.rebuild_chain()
    }

    pub fn set_kick_count(&mut self, kick_count: usize) -> Result<()> {
        check_kick_count(&self.core.name, kick_count)?;
        self.kick_count = kick_count;
        self.rebuild_chain()
    }

    /// Integrated strength of one multipole family, summed over its kicks.
    pub fn multipole(&self, order: MultipoleOrder) -> f64 {
        self.chain
            .iter()
            .filter_map(|child| match child {
                Element::ThinMultipole(kick) if kick.order() == order => Some(kick.core.strength),
                _ => None,
            })
            .sum()
    }

    /// Divides `total` equally among the kicks of one multipole family.
    pub fn set_multipole(&mut self, order: MultipoleOrder, total: f64) -> Result<()> {
        check_finite(&self.core.name, order.family(), total)?;
        let count = self
            .chain
            .iter()
            .filter(|child| matches!(child, Element::ThinMultipole(kick) if kick.order() == order))
            .count();
        if count == 0 {
            return Err(BeamlineError::NoSuchMultipole {
                element: self.core.name.clone(),
                family: order.family().to_string(),
            });
        }
        let share = total / count as f64;
        for child in self.chain.elements_mut() {
            if let Element::ThinMultipole(kick) = child {
                if kick.order() == order {
                    kick.core.strength = share;
                }
            }
        }
        Ok(())
    }

    pub fn quadrupole(&self) -> f64 {
        self.multipole(MultipoleOrder::Quadrupole)
    }

    pub fn sextupole(&self) -> f64 {
        self.multipole(MultipoleOrder::Sextupole)
    }

    pub fn octupole(&self) -> f64 {
        self.multipole(MultipoleOrder::Octupole)
    }

    pub fn set_quadrupole(&mut self, total: f64) -> Result<()> {
        self.set_multipole(MultipoleOrder::Quadrupole, total)
    }

    pub fn set_sextupole(&mut self, total: f64) -> Result<()> {
        self.set_multipole(MultipoleOrder::Sextupole, total)
    }

    pub fn set_octupole(&mut self, total: f64) -> Result<()> {
        self.set_multipole(MultipoleOrder::Octupole, total)
    }

    /// Drops every child. The bend cannot propagate until [`Self::rebuild_chain`].
    pub fn teardown(&mut self) {
        self.chain.teardown();
    }

    /// Rebuilds the chain from the bend's parameters. Multipole totals held
    /// by the current chain carry over; a torn-down chain restarts at zero.
    pub fn rebuild_chain(&mut self) -> Result<()> {
        let totals: Vec<(MultipoleOrder, f64)> = MultipoleOrder::ALL
            .into_iter()
            .map(|order| (order, self.multipole(order)))
            .collect();
        self.chain = ElementChain::new(&self.core.name, self.build_children()?)?;
        for (order, total) in totals {
            if total != 0.0 {
                self.set_multipole(order, total)?;
            }
        }
        log::debug!(
            "{}: rebuilt chain with {} children ({} kick stations)",
            self.core.name,
            self.chain.len(),
            self.kick_count
        );
        Ok(())
    }

    fn build_children(&self) -> Result<Vec<Element>> {
        let name = &self.core.name;
        let field = self.core.strength;
        let length = self.core.length;
        let spacing = teapot_spacing(length, self.kick_count);

        let mut children = Vec::with_capacity(4 * self.kick_count + 3);
        children.push(
            Edge::from_parts(
                ElementCore::new(format!("{name}.entry"), 0.0, field)?,
                self.entry_angle,
            )
            .into(),
        );
        for (i, segment) in spacing.iter().enumerate() {
            let body = SectorBend::from_parts(
                ElementCore::new(format!("{name}.body{i}"), *segment, field)?,
                self.angle * (segment / length),
                0.0,
                0.0,
                BendPropagator::NoEdge,
            );
            children.push(body.into());
            if i < self.kick_count {
                for order in MultipoleOrder::ALL {
                    let kick_name = format!("{name}.{}{i}", order.family());
                    let kick = ThinMultipole::new(kick_name, order, 0.0)?;
                    children.push(kick.into());
                }
            }
        }
        children.push(
            Edge::from_parts(
                ElementCore::new(format!("{name}.exit"), 0.0, field)?,
                self.exit_angle,
            )
            .into(),
        );
        Ok(children)
    }

    pub(crate) fn split(&self, fraction: f64) -> Result<(Self, Self)> {
        self.split_with(fraction, Diagnostics::global())
    }

    pub(crate) fn split_with(
        &self,
        fraction: f64,
        diagnostics: &Diagnostics,
    ) -> Result<(Self, Self)> {
        let piece = |f: f64, entry_angle: f64, exit_angle: f64| -> Result<Self> {
            let mut bend = Self {
                core: self.core.piece(self.core.length * f, self.core.strength),
                angle: snap_angle(&self.core.name, "bend", self.angle * f, diagnostics),
                entry_angle,
                exit_angle,
                tan_entry: entry_angle.tan(),
                tan_exit: exit_angle.tan(),
                kick_count: self.kick_count,
                chain: ElementChain::default(),
            };
            bend.rebuild_chain()?;
            for order in MultipoleOrder::ALL {
                bend.set_multipole(order, self.multipole(order) * f)?;
            }
            Ok(bend)
        };
        Ok((
            piece(fraction, self.entry_angle, 0.0)?,
            piece(1.0 - fraction, 0.0, self.exit_angle)?,
        ))
    }
}
