use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::error::Result;
use crate::kinematics::ReferenceKinematics;
use crate::state::PhaseVector;

/// A number type the element physics can be evaluated over.
///
/// Implemented by `f64` (plain tracking) and [`crate::differential::Jet`]
/// (map extraction). Every propagator is written once against this trait,
/// which is what keeps the two evaluations numerically identical: a jet's
/// standard part follows exactly the same sequence of `f64` operations.
pub trait Scalar:
    Clone
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
    /// Value at the expansion point (the number itself for `f64`).
    fn standard_part(&self) -> f64;

    /// A constant living in the same context as `self`.
    fn lift(&self, value: f64) -> Self;

    fn sqrt(&self) -> Self;
    fn sin(&self) -> Self;
    fn cos(&self) -> Self;
    fn tan(&self) -> Self;
    fn asin(&self) -> Self;
    fn atan(&self) -> Self;
    fn atan2(&self, x: &Self) -> Self;
    fn exp(&self) -> Self;
    fn ln(&self) -> Self;
    fn powi(&self, n: i32) -> Self;

    fn sin_cos(&self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn square(&self) -> Self {
        self.clone() * self.clone()
    }

    fn is_finite(&self) -> bool;
}

impl Scalar for f64 {
    fn standard_part(&self) -> f64 {
        *self
    }
    fn lift(&self, value: f64) -> Self {
        value
    }
    fn sqrt(&self) -> Self {
        f64::sqrt(*self)
    }
    fn sin(&self) -> Self {
        f64::sin(*self)
    }
    fn cos(&self) -> Self {
        f64::cos(*self)
    }
    fn tan(&self) -> Self {
        f64::tan(*self)
    }
    fn asin(&self) -> Self {
        f64::asin(*self)
    }
    fn atan(&self) -> Self {
        f64::atan(*self)
    }
    fn atan2(&self, x: &Self) -> Self {
        f64::atan2(*self, *x)
    }
    fn exp(&self) -> Self {
        f64::exp(*self)
    }
    fn ln(&self) -> Self {
        f64::ln(*self)
    }
    fn powi(&self, n: i32) -> Self {
        f64::powi(*self, n)
    }
    fn sin_cos(&self) -> (Self, Self) {
        f64::sin_cos(*self)
    }
    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }
}

/// Read/write interface shared by [`crate::Particle`] and
/// [`crate::DifferentialParticle`].
pub trait ParticleLike: Clone {
    type Coord: Scalar;

    fn kinematics(&self) -> &ReferenceKinematics;

    fn state(&self) -> &PhaseVector<Self::Coord>;

    /// Mutable access for propagators. Values written here must come from
    /// arithmetic on the existing components (or [`Scalar::lift`]) so that a
    /// differential state keeps a single environment.
    fn state_mut(&mut self) -> &mut PhaseVector<Self::Coord>;

    /// Changes the reference energy without touching the state.
    fn set_reference_energy(&mut self, energy: f64) -> Result<()>;
}
