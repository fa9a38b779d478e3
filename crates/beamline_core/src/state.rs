//! Phase-space state vectors.
//!
//! Component order is `(x, y, cdt, npx, npy, ndp)`: transverse positions in
//! metres, `c·Δt` in metres, transverse momenta normalised to the reference
//! momentum, and the relative momentum deviation `Δp/p0`.

use std::ops::{Index, IndexMut};
use std::rc::Rc;

use nalgebra::{Matrix4, Matrix6};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::differential::{Jet, JetEnvironment};
use crate::error::{BeamlineError, Result};
use crate::traits::Scalar;

pub const PHASE_DIMENSION: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coordinate {
    X = 0,
    Y = 1,
    Cdt = 2,
    Npx = 3,
    Npy = 4,
    Ndp = 5,
}

impl Coordinate {
    pub const ALL: [Coordinate; PHASE_DIMENSION] = [
        Coordinate::X,
        Coordinate::Y,
        Coordinate::Cdt,
        Coordinate::Npx,
        Coordinate::Npy,
        Coordinate::Ndp,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Coordinate::X => "x",
            Coordinate::Y => "y",
            Coordinate::Cdt => "cdt",
            Coordinate::Npx => "npx",
            Coordinate::Npy => "npy",
            Coordinate::Ndp => "ndp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseVector<S> {
    components: [S; PHASE_DIMENSION],
}

/// Concrete numeric phase-space state.
pub type PhaseSpaceState = PhaseVector<f64>;

impl<S> PhaseVector<S> {
    pub fn new(components: [S; PHASE_DIMENSION]) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[S; PHASE_DIMENSION] {
        &self.components
    }

    pub fn iter(&self) -> std::slice::Iter<'_, S> {
        self.components.iter()
    }

    pub fn into_components(self) -> [S; PHASE_DIMENSION] {
        self.components
    }
}

impl<S: Scalar> PhaseVector<S> {
    pub fn x(&self) -> &S {
        &self.components[0]
    }
    pub fn y(&self) -> &S {
        &self.components[1]
    }
    pub fn cdt(&self) -> &S {
        &self.components[2]
    }
    pub fn npx(&self) -> &S {
        &self.components[3]
    }
    pub fn npy(&self) -> &S {
        &self.components[4]
    }
    pub fn ndp(&self) -> &S {
        &self.components[5]
    }

    pub fn standard_part(&self) -> PhaseSpaceState {
        PhaseVector::new(std::array::from_fn(|i| self.components[i].standard_part()))
    }

    pub fn is_finite(&self) -> bool {
        self.components.iter().all(|c| c.is_finite())
    }
}

impl PhaseSpaceState {
    pub fn zeros() -> Self {
        Self::new([0.0; PHASE_DIMENSION])
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let components: [f64; PHASE_DIMENSION] =
            values
                .try_into()
                .map_err(|_| BeamlineError::DimensionMismatch {
                    expected: PHASE_DIMENSION,
                    got: values.len(),
                })?;
        Ok(Self::new(components))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.components
    }

    pub fn max_abs_difference(&self, other: &PhaseSpaceState) -> f64 {
        self.components
            .iter()
            .zip(other.components.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Default for PhaseSpaceState {
    fn default() -> Self {
        Self::zeros()
    }
}

impl<S> Index<usize> for PhaseVector<S> {
    type Output = S;
    fn index(&self, index: usize) -> &S {
        &self.components[index]
    }
}

impl<S> IndexMut<usize> for PhaseVector<S> {
    fn index_mut(&mut self, index: usize) -> &mut S {
        &mut self.components[index]
    }
}

impl<S> Index<Coordinate> for PhaseVector<S> {
    type Output = S;
    fn index(&self, coord: Coordinate) -> &S {
        &self.components[coord.index()]
    }
}

impl<S> IndexMut<Coordinate> for PhaseVector<S> {
    fn index_mut(&mut self, coord: Coordinate) -> &mut S {
        &mut self.components[coord.index()]
    }
}

/// Six jets over one shared environment.
#[derive(Debug, Clone)]
pub struct DifferentialState {
    env: Rc<JetEnvironment>,
    vector: PhaseVector<Jet>,
}

impl DifferentialState {
    /// Builds a state, checking that every component shares one environment.
    pub fn new(components: [Jet; PHASE_DIMENSION]) -> Result<Self> {
        let env = Rc::clone(components[0].environment());
        if components
            .iter()
            .any(|jet| !Rc::ptr_eq(jet.environment(), &env))
        {
            return Err(BeamlineError::EnvironmentMismatch);
        }
        Ok(Self {
            env,
            vector: PhaseVector::new(components),
        })
    }

    /// Identity map expanded about `center`: component `i` is variable `i`.
    pub fn identity(env: &Rc<JetEnvironment>, center: &PhaseSpaceState) -> Result<Self> {
        if !env.has_phase_space() {
            return Err(BeamlineError::DimensionMismatch {
                expected: PHASE_DIMENSION,
                got: env.num_vars(),
            });
        }
        let mut components = Vec::with_capacity(PHASE_DIMENSION);
        for i in 0..PHASE_DIMENSION {
            components.push(Jet::variable(env, i, center[i])?);
        }
        let components: [Jet; PHASE_DIMENSION] =
            components
                .try_into()
                .map_err(|_| BeamlineError::DimensionMismatch {
                    expected: PHASE_DIMENSION,
                    got: 0,
                })?;
        Self::new(components)
    }

    pub fn environment(&self) -> &Rc<JetEnvironment> {
        &self.env
    }

    pub fn vector(&self) -> &PhaseVector<Jet> {
        &self.vector
    }

    pub(crate) fn vector_mut(&mut self) -> &mut PhaseVector<Jet> {
        &mut self.vector
    }

    pub fn component(&self, coord: Coordinate) -> &Jet {
        &self.vector[coord]
    }

    pub fn set_component(&mut self, coord: Coordinate, jet: Jet) -> Result<()> {
        if !Rc::ptr_eq(jet.environment(), &self.env) {
            return Err(BeamlineError::EnvironmentMismatch);
        }
        self.vector[coord] = jet;
        Ok(())
    }

    pub fn standard_part(&self) -> PhaseSpaceState {
        self.vector.standard_part()
    }

    /// Linear transfer matrix `M[i][j] = ∂ out_i / ∂ in_j`.
    pub fn jacobian(&self) -> Result<Matrix6<f64>> {
        if !self.env.has_phase_space() {
            return Err(BeamlineError::DimensionMismatch {
                expected: PHASE_DIMENSION,
                got: self.env.num_vars(),
            });
        }
        Ok(Matrix6::from_fn(|i, j| self.vector[i].partial(j)))
    }

    /// Map coefficient `∂^α out_coord` at the expansion point.
    pub fn derivative(&self, coord: Coordinate, exponents: &[u8]) -> f64 {
        self.vector[coord].derivative(exponents)
    }

    /// `max |MᵀJM − J|` over the transverse (x, npx, y, npy) block.
    ///
    /// The transverse map at fixed momentum is canonical, so this is zero up
    /// to rounding for every static magnetic element.
    pub fn transverse_symplectic_error(&self) -> Result<f64> {
        let m = transverse_block(&self.jacobian()?);
        let j = symplectic_form();
        let residual = m.transpose() * j * m - j;
        Ok(residual.iter().fold(0.0, |acc: f64, v| acc.max(v.abs())))
    }

    pub fn linear_inverse(&self) -> Result<Matrix6<f64>> {
        self.jacobian()?
            .try_inverse()
            .ok_or_else(|| BeamlineError::InvalidParameter("transfer matrix is singular".into()))
    }

    /// Eigenvalues of the transverse 4×4 block.
    pub fn transverse_eigenvalues(&self) -> Result<Vec<Complex<f64>>> {
        let m = transverse_block(&self.jacobian()?);
        Ok(m.complex_eigenvalues().iter().copied().collect())
    }
}

/// Reorders `(x, y, cdt, npx, npy, ndp)` into the `(x, npx, y, npy)` block.
fn transverse_block(m: &Matrix6<f64>) -> Matrix4<f64> {
    const ORDER: [usize; 4] = [0, 3, 1, 4];
    Matrix4::from_fn(|i, j| m[(ORDER[i], ORDER[j])])
}

fn symplectic_form() -> Matrix4<f64> {
    let mut j = Matrix4::zeros();
    j[(0, 1)] = 1.0;
    j[(1, 0)] = -1.0;
    j[(2, 3)] = 1.0;
    j[(3, 2)] = -1.0;
    j
}
