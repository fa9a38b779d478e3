//! Truncated multivariate power series ("jets").
//!
//! A `Jet` stores one Taylor coefficient per monomial of its environment,
//! `c_α = ∂^α f / α!` evaluated at the expansion point. Arithmetic is
//! truncated at the environment's maximum order, so evaluating a formula on
//! jets yields the exact Taylor expansion of the formula to that order.
//!
//! Operators (`+ - * /`) panic when the operands come from different
//! environments, the same way nalgebra panics on mismatched dimensions; the
//! `try_*` methods return [`BeamlineError::EnvironmentMismatch`] instead.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};
use std::rc::Rc;

use super::environment::JetEnvironment;
use super::series;
use crate::error::{BeamlineError, Result};
use crate::traits::Scalar;

#[derive(Clone)]
pub struct Jet {
    env: Rc<JetEnvironment>,
    coeffs: Vec<f64>,
}

impl Jet {
    pub fn constant(env: &Rc<JetEnvironment>, value: f64) -> Self {
        let mut coeffs = vec![0.0; env.num_terms()];
        coeffs[0] = value;
        Self {
            env: Rc::clone(env),
            coeffs,
        }
    }

    pub fn zero(env: &Rc<JetEnvironment>) -> Self {
        Self::constant(env, 0.0)
    }

    /// The independent variable `index`, expanded about `value`.
    pub fn variable(env: &Rc<JetEnvironment>, index: usize, value: f64) -> Result<Self> {
        let slot = env
            .first_order_index(index)
            .ok_or(BeamlineError::DimensionMismatch {
                expected: env.num_vars(),
                got: index + 1,
            })?;
        let mut jet = Self::constant(env, value);
        jet.coeffs[slot] = 1.0;
        Ok(jet)
    }

    pub fn from_coefficients(env: &Rc<JetEnvironment>, coeffs: Vec<f64>) -> Result<Self> {
        if coeffs.len() != env.num_terms() {
            return Err(BeamlineError::DimensionMismatch {
                expected: env.num_terms(),
                got: coeffs.len(),
            });
        }
        Ok(Self {
            env: Rc::clone(env),
            coeffs,
        })
    }

    pub fn environment(&self) -> &Rc<JetEnvironment> {
        &self.env
    }

    pub fn same_environment(&self, other: &Jet) -> bool {
        Rc::ptr_eq(&self.env, &other.env)
    }

    pub fn standard_part(&self) -> f64 {
        self.coeffs[0]
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    /// Taylor coefficient of the monomial with the given exponents
    /// (zero for monomials beyond the truncation order).
    pub fn coefficient(&self, exponents: &[u8]) -> f64 {
        self.env
            .index_of(exponents)
            .map(|i| self.coeffs[i])
            .unwrap_or(0.0)
    }

    /// Mixed partial derivative `∂^α f` at the expansion point.
    pub fn derivative(&self, exponents: &[u8]) -> f64 {
        let factorial: f64 = exponents
            .iter()
            .map(|&e| (1..=e as u32).map(f64::from).product::<f64>())
            .product();
        self.coefficient(exponents) * factorial
    }

    /// First partial derivative with respect to `variable`.
    pub fn partial(&self, variable: usize) -> f64 {
        self.env
            .first_order_index(variable)
            .map(|i| self.coeffs[i])
            .unwrap_or(0.0)
    }

    pub fn gradient(&self) -> Vec<f64> {
        (0..self.env.num_vars()).map(|v| self.partial(v)).collect()
    }

    /// Evaluates the polynomial at `deviation` from the expansion point.
    pub fn evaluate(&self, deviation: &[f64]) -> Result<f64> {
        if deviation.len() != self.env.num_vars() {
            return Err(BeamlineError::DimensionMismatch {
                expected: self.env.num_vars(),
                got: deviation.len(),
            });
        }
        let mut total = 0.0;
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c == 0.0 {
                continue;
            }
            let term: f64 = self
                .env
                .monomial(i)
                .iter()
                .zip(deviation)
                .map(|(&e, &d)| d.powi(e as i32))
                .product();
            total += c * term;
        }
        Ok(total)
    }

    /// Keeps only terms whose degree lies in `lo..=hi`.
    pub fn filter(&self, lo: usize, hi: usize) -> Jet {
        let mut out = self.clone();
        for (i, c) in out.coeffs.iter_mut().enumerate() {
            let d = self.env.degree(i);
            if d < lo || d > hi {
                *c = 0.0;
            }
        }
        out
    }

    pub fn is_finite(&self) -> bool {
        self.coeffs.iter().all(|c| c.is_finite())
    }

    pub fn try_add(&self, other: &Jet) -> Result<Jet> {
        self.check_env(other)?;
        Ok(self.zip_with(other, |a, b| a + b))
    }

    pub fn try_sub(&self, other: &Jet) -> Result<Jet> {
        self.check_env(other)?;
        Ok(self.zip_with(other, |a, b| a - b))
    }

    pub fn try_mul(&self, other: &Jet) -> Result<Jet> {
        self.check_env(other)?;
        Ok(self.mul_unchecked(other))
    }

    pub fn try_div(&self, other: &Jet) -> Result<Jet> {
        self.check_env(other)?;
        Ok(self.div_unchecked(other))
    }

    fn check_env(&self, other: &Jet) -> Result<()> {
        if self.same_environment(other) {
            Ok(())
        } else {
            Err(BeamlineError::EnvironmentMismatch)
        }
    }

    fn expect_same_env(&self, other: &Jet) {
        if let Err(err) = self.check_env(other) {
            panic!("{err}");
        }
    }

    fn zip_with(&self, other: &Jet, f: impl Fn(f64, f64) -> f64) -> Jet {
        let coeffs = self
            .coeffs
            .iter()
            .zip(&other.coeffs)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Jet {
            env: Rc::clone(&self.env),
            coeffs,
        }
    }

    fn map_coeffs(&self, f: impl Fn(f64) -> f64) -> Jet {
        Jet {
            env: Rc::clone(&self.env),
            coeffs: self.coeffs.iter().map(|&c| f(c)).collect(),
        }
    }

    fn mul_unchecked(&self, other: &Jet) -> Jet {
        let mut coeffs = vec![0.0; self.coeffs.len()];
        for (i, &a) in self.coeffs.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            for &(j, k) in self.env.products(i) {
                coeffs[k] += a * other.coeffs[j];
            }
        }
        Jet {
            env: Rc::clone(&self.env),
            coeffs,
        }
    }

    fn div_unchecked(&self, other: &Jet) -> Jet {
        let mut out = self.mul_unchecked(&other.recip());
        out.coeffs[0] = self.coeffs[0] / other.coeffs[0];
        out
    }

    /// `Σ series[k] h^k` with `h` the nilpotent part of `self`.
    fn compose_series(&self, series: &[f64]) -> Jet {
        let mut h = self.clone();
        h.coeffs[0] = 0.0;
        let top = series.len() - 1;
        let mut result = Jet::constant(&self.env, series[top]);
        for k in (0..top).rev() {
            result = result.mul_unchecked(&h);
            result.coeffs[0] += series[k];
        }
        result
    }

    fn univariate(&self, apply: impl Fn(&[f64], &mut [f64])) -> Jet {
        let len = self.env.max_order() + 1;
        let a = series::linear(self.standard_part(), len);
        let mut c = vec![0.0; len];
        apply(&a, &mut c);
        self.compose_series(&c)
    }

    pub fn recip(&self) -> Jet {
        self.univariate(series::recip)
    }

    pub fn sqrt(&self) -> Jet {
        self.univariate(series::sqrt)
    }

    pub fn exp(&self) -> Jet {
        self.univariate(series::exp)
    }

    pub fn ln(&self) -> Jet {
        self.univariate(series::ln)
    }

    pub fn sin_cos(&self) -> (Jet, Jet) {
        let len = self.env.max_order() + 1;
        let a = series::linear(self.standard_part(), len);
        let mut s = vec![0.0; len];
        let mut c = vec![0.0; len];
        series::sin_cos(&a, &mut s, &mut c);
        (self.compose_series(&s), self.compose_series(&c))
    }

    pub fn sin(&self) -> Jet {
        self.univariate(|a, c| {
            let mut other = vec![0.0; c.len()];
            series::sin_cos(a, c, &mut other);
        })
    }

    pub fn cos(&self) -> Jet {
        self.univariate(|a, c| {
            let mut other = vec![0.0; c.len()];
            series::sin_cos(a, &mut other, c);
        })
    }

    pub fn sinh(&self) -> Jet {
        self.univariate(|a, c| {
            let mut other = vec![0.0; c.len()];
            series::sinh_cosh(a, c, &mut other);
        })
    }

    pub fn cosh(&self) -> Jet {
        self.univariate(|a, c| {
            let mut other = vec![0.0; c.len()];
            series::sinh_cosh(a, &mut other, c);
        })
    }

    pub fn tan(&self) -> Jet {
        self.univariate(series::tan)
    }

    pub fn asin(&self) -> Jet {
        self.univariate(series::asin)
    }

    pub fn acos(&self) -> Jet {
        self.univariate(series::acos)
    }

    pub fn atan(&self) -> Jet {
        self.univariate(series::atan)
    }

    /// Four-quadrant arctangent of `self / x`.
    ///
    /// Uses `atan2(y, x) - atan2(y0, x0) = atan((x0 y - y0 x) / (x0 x + y0 y))`,
    /// valid in a neighbourhood of the expansion point.
    pub fn atan2(&self, x: &Jet) -> Jet {
        self.expect_same_env(x);
        let y0 = self.standard_part();
        let x0 = x.standard_part();
        let num = self.clone() * x0 - x.clone() * y0;
        let den = x.clone() * x0 + self.clone() * y0;
        let mut out = num.div_unchecked(&den).atan();
        out.coeffs[0] = y0.atan2(x0);
        out
    }

    pub fn powf(&self, p: f64) -> Jet {
        let len = self.env.max_order() + 1;
        let mut c = vec![0.0; len];
        series::powf_linear(self.standard_part(), p, &mut c);
        self.compose_series(&c)
    }

    pub fn powi(&self, n: i32) -> Jet {
        let a0 = self.standard_part();
        let mut out = if n == 0 {
            Jet::constant(&self.env, 1.0)
        } else {
            let mut base = self.clone();
            let mut acc = Jet::constant(&self.env, 1.0);
            let mut e = n.unsigned_abs();
            while e > 0 {
                if e & 1 == 1 {
                    acc = acc.mul_unchecked(&base);
                }
                e >>= 1;
                if e > 0 {
                    base = base.mul_unchecked(&base);
                }
            }
            if n < 0 {
                acc.recip()
            } else {
                acc
            }
        };
        out.coeffs[0] = a0.powi(n);
        out
    }
}

impl fmt::Debug for Jet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jet")
            .field("standard_part", &self.coeffs[0])
            .field("order", &self.env.max_order())
            .field("num_vars", &self.env.num_vars())
            .finish()
    }
}

impl fmt::Display for Jet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.env.names();
        let mut first = true;
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c == 0.0 && i != 0 {
                continue;
            }
            if !first {
                f.write_str(" + ")?;
            }
            first = false;
            write!(f, "{c:e}")?;
            for (v, &e) in self.env.monomial(i).iter().enumerate() {
                match e {
                    0 => {}
                    1 => write!(f, "*{}", names[v])?,
                    _ => write!(f, "*{}^{}", names[v], e)?,
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for Jet {
    fn eq(&self, other: &Self) -> bool {
        self.same_environment(other) && self.coeffs == other.coeffs
    }
}

// --- Operators ---

macro_rules! jet_binary_op {
    ($trait:ident, $method:ident, $body:expr) => {
        impl $trait<Jet> for Jet {
            type Output = Jet;
            fn $method(self, rhs: Jet) -> Jet {
                self.expect_same_env(&rhs);
                $body(&self, &rhs)
            }
        }
        impl<'a> $trait<&'a Jet> for Jet {
            type Output = Jet;
            fn $method(self, rhs: &'a Jet) -> Jet {
                self.expect_same_env(rhs);
                $body(&self, rhs)
            }
        }
        impl<'a> $trait<Jet> for &'a Jet {
            type Output = Jet;
            fn $method(self, rhs: Jet) -> Jet {
                self.expect_same_env(&rhs);
                $body(self, &rhs)
            }
        }
        impl<'a, 'b> $trait<&'b Jet> for &'a Jet {
            type Output = Jet;
            fn $method(self, rhs: &'b Jet) -> Jet {
                self.expect_same_env(rhs);
                $body(self, rhs)
            }
        }
    };
}

jet_binary_op!(Add, add, |a: &Jet, b: &Jet| a.zip_with(b, |x, y| x + y));
jet_binary_op!(Sub, sub, |a: &Jet, b: &Jet| a.zip_with(b, |x, y| x - y));
jet_binary_op!(Mul, mul, |a: &Jet, b: &Jet| a.mul_unchecked(b));
jet_binary_op!(Div, div, |a: &Jet, b: &Jet| a.div_unchecked(b));

impl Add<f64> for Jet {
    type Output = Jet;
    fn add(mut self, rhs: f64) -> Jet {
        self.coeffs[0] += rhs;
        self
    }
}

impl Sub<f64> for Jet {
    type Output = Jet;
    fn sub(mut self, rhs: f64) -> Jet {
        self.coeffs[0] -= rhs;
        self
    }
}

impl Mul<f64> for Jet {
    type Output = Jet;
    fn mul(self, rhs: f64) -> Jet {
        self.map_coeffs(|c| c * rhs)
    }
}

impl Div<f64> for Jet {
    type Output = Jet;
    fn div(self, rhs: f64) -> Jet {
        self.map_coeffs(|c| c / rhs)
    }
}

impl Add<Jet> for f64 {
    type Output = Jet;
    fn add(self, rhs: Jet) -> Jet {
        rhs + self
    }
}

impl Sub<Jet> for f64 {
    type Output = Jet;
    fn sub(self, rhs: Jet) -> Jet {
        -rhs + self
    }
}

impl Mul<Jet> for f64 {
    type Output = Jet;
    fn mul(self, rhs: Jet) -> Jet {
        rhs * self
    }
}

impl Div<Jet> for f64 {
    type Output = Jet;
    fn div(self, rhs: Jet) -> Jet {
        let mut out = rhs.recip() * self;
        out.coeffs[0] = self / rhs.coeffs[0];
        out
    }
}

impl Neg for Jet {
    type Output = Jet;
    fn neg(self) -> Jet {
        self.map_coeffs(|c| -c)
    }
}

impl<'a> Neg for &'a Jet {
    type Output = Jet;
    fn neg(self) -> Jet {
        self.map_coeffs(|c| -c)
    }
}

impl AddAssign<&Jet> for Jet {
    fn add_assign(&mut self, rhs: &Jet) {
        self.expect_same_env(rhs);
        for (a, b) in self.coeffs.iter_mut().zip(&rhs.coeffs) {
            *a += b;
        }
    }
}

impl SubAssign<&Jet> for Jet {
    fn sub_assign(&mut self, rhs: &Jet) {
        self.expect_same_env(rhs);
        for (a, b) in self.coeffs.iter_mut().zip(&rhs.coeffs) {
            *a -= b;
        }
    }
}

impl MulAssign<f64> for Jet {
    fn mul_assign(&mut self, rhs: f64) {
        for c in self.coeffs.iter_mut() {
            *c *= rhs;
        }
    }
}

impl Scalar for Jet {
    fn standard_part(&self) -> f64 {
        self.coeffs[0]
    }
    fn lift(&self, value: f64) -> Self {
        Jet::constant(&self.env, value)
    }
    fn sqrt(&self) -> Self {
        Jet::sqrt(self)
    }
    fn sin(&self) -> Self {
        Jet::sin(self)
    }
    fn cos(&self) -> Self {
        Jet::cos(self)
    }
    fn tan(&self) -> Self {
        Jet::tan(self)
    }
    fn asin(&self) -> Self {
        Jet::asin(self)
    }
    fn atan(&self) -> Self {
        Jet::atan(self)
    }
    fn atan2(&self, x: &Self) -> Self {
        Jet::atan2(self, x)
    }
    fn exp(&self) -> Self {
        Jet::exp(self)
    }
    fn ln(&self) -> Self {
        Jet::ln(self)
    }
    fn powi(&self, n: i32) -> Self {
        Jet::powi(self, n)
    }
    fn sin_cos(&self) -> (Self, Self) {
        Jet::sin_cos(self)
    }
    fn square(&self) -> Self {
        self.mul_unchecked(self)
    }
    fn is_finite(&self) -> bool {
        Jet::is_finite(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn env2(order: usize) -> Rc<JetEnvironment> {
        JetEnvironment::new(2, order).unwrap()
    }

    #[test]
    fn variable_has_unit_gradient() {
        let env = env2(3);
        let x = Jet::variable(&env, 0, 1.5).unwrap();
        assert_eq!(x.standard_part(), 1.5);
        assert_eq!(x.gradient(), vec![1.0, 0.0]);
        assert!(Jet::variable(&env, 2, 0.0).is_err());
    }

    #[test]
    fn product_rule_and_truncation() {
        let env = env2(2);
        let x = Jet::variable(&env, 0, 2.0).unwrap();
        let y = Jet::variable(&env, 1, 3.0).unwrap();
        let f = &x * &y * &x; // x² y, cubic term truncated
        assert_relative_eq!(f.standard_part(), 12.0);
        assert_relative_eq!(f.partial(0), 12.0); // 2xy
        assert_relative_eq!(f.partial(1), 4.0); // x²
        assert_relative_eq!(f.derivative(&[1, 1]), 4.0); // 2x
        assert_relative_eq!(f.derivative(&[2, 0]), 6.0); // 2y
        assert_eq!(f.coefficient(&[2, 1]), 0.0);
    }

    #[test]
    fn division_standard_part_matches_f64() {
        let env = env2(3);
        let x = Jet::variable(&env, 0, 0.1).unwrap();
        let y = Jet::variable(&env, 1, 0.3).unwrap();
        let q = &x / &y;
        assert_eq!(q.standard_part(), 0.1 / 0.3);
        assert_relative_eq!(q.partial(0), 1.0 / 0.3, max_relative = 1e-14);
        assert_relative_eq!(q.partial(1), -0.1 / 0.09, max_relative = 1e-13);
        // d²/dy² (x / y) = 2x / y³
        assert_relative_eq!(q.derivative(&[0, 2]), 2.0 * 0.1 / 0.027, max_relative = 1e-12);
    }

    #[test]
    fn composed_transcendentals_match_analytic_derivatives() {
        let env = env2(3);
        let x = Jet::variable(&env, 0, 0.4).unwrap();
        let f = x.sin() * x.exp();
        let x0: f64 = 0.4;
        assert_relative_eq!(f.standard_part(), x0.sin() * x0.exp(), max_relative = 1e-15);
        // (sin x e^x)' = e^x (sin x + cos x)
        assert_relative_eq!(f.partial(0), x0.exp() * (x0.sin() + x0.cos()), max_relative = 1e-14);
        // (sin x e^x)'' = 2 e^x cos x
        assert_relative_eq!(f.derivative(&[2, 0]), 2.0 * x0.exp() * x0.cos(), max_relative = 1e-13);
        // ''' = 2 e^x (cos x - sin x)
        assert_relative_eq!(
            f.derivative(&[3, 0]),
            2.0 * x0.exp() * (x0.cos() - x0.sin()),
            max_relative = 1e-12
        );
    }

    #[test]
    fn atan2_gradient_in_every_quadrant() {
        let env = env2(2);
        for &(y0, x0) in &[(0.3, 0.5), (0.3, -0.5), (-0.3, -0.5), (-0.3, 0.5), (1.0, 0.0)] {
            let y = Jet::variable(&env, 0, y0).unwrap();
            let x = Jet::variable(&env, 1, x0).unwrap();
            let a = y.atan2(&x);
            let r2 = x0 * x0 + y0 * y0;
            assert_eq!(a.standard_part(), f64::atan2(y0, x0));
            assert_relative_eq!(a.partial(0), x0 / r2, epsilon = 1e-14);
            assert_relative_eq!(a.partial(1), -y0 / r2, epsilon = 1e-14);
        }
    }

    #[test]
    fn sqrt_and_powf_agree() {
        let env = env2(4);
        let x = Jet::variable(&env, 0, 2.5).unwrap();
        let a = x.sqrt();
        let b = x.powf(0.5);
        for (ca, cb) in a.coefficients().iter().zip(b.coefficients()) {
            assert_relative_eq!(*ca, *cb, epsilon = 1e-14);
        }
    }

    #[test]
    fn powi_matches_repeated_product() {
        let env = env2(3);
        let x = Jet::variable(&env, 0, 1.3).unwrap();
        let y = Jet::variable(&env, 1, -0.7).unwrap();
        let s = &x + &y;
        let cube = s.powi(3);
        let manual = &s * &s * &s;
        for (a, b) in cube.coefficients().iter().zip(manual.coefficients()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-13);
        }
        let inv = s.powi(-2);
        let back = inv * (&s * &s);
        assert_relative_eq!(back.standard_part(), 1.0, epsilon = 1e-14);
        assert!(back.gradient().iter().all(|g| g.abs() < 1e-12));
    }

    #[test]
    fn inverse_functions_round_trip() {
        let env = env2(4);
        let x = Jet::variable(&env, 0, 0.3).unwrap();
        let round = x.sin().asin();
        let lnexp = x.exp().ln();
        let tanatan = x.tan().atan();
        for jet in [&round, &lnexp, &tanatan] {
            assert_relative_eq!(jet.standard_part(), 0.3, epsilon = 1e-15);
            assert_relative_eq!(jet.partial(0), 1.0, epsilon = 1e-13);
            for (i, &c) in jet.coefficients().iter().enumerate() {
                if env.degree(i) >= 2 {
                    assert!(c.abs() < 1e-12, "coefficient {i} = {c}");
                }
            }
        }
    }

    #[test]
    fn mixing_environments_is_rejected() {
        let a = Jet::variable(&env2(2), 0, 1.0).unwrap();
        let b = Jet::variable(&env2(2), 0, 1.0).unwrap();
        assert_eq!(a.try_add(&b), Err(BeamlineError::EnvironmentMismatch));
        assert_eq!(a.try_mul(&b), Err(BeamlineError::EnvironmentMismatch));
        assert!(a.try_sub(&a).is_ok());
    }

    #[test]
    #[should_panic(expected = "different environments")]
    fn operator_panics_on_mixed_environments() {
        let a = Jet::variable(&env2(2), 0, 1.0).unwrap();
        let b = Jet::variable(&env2(2), 0, 1.0).unwrap();
        let _ = a + b;
    }

    #[test]
    fn evaluate_reproduces_polynomial() {
        let env = env2(2);
        let x = Jet::variable(&env, 0, 1.0).unwrap();
        let y = Jet::variable(&env, 1, 2.0).unwrap();
        let f = &x * &y + x.clone() * 3.0;
        // f(1 + dx, 2 + dy) = (1+dx)(2+dy) + 3(1+dx)
        let value = f.evaluate(&[0.1, -0.2]).unwrap();
        assert_relative_eq!(value, 1.1 * 1.8 + 3.3, epsilon = 1e-14);
        assert!(f.evaluate(&[0.1]).is_err());
    }

    #[test]
    fn filter_keeps_requested_orders() {
        let env = env2(3);
        let x = Jet::variable(&env, 0, 0.5).unwrap();
        let f = x.exp();
        let linear = f.filter(1, 1);
        assert_eq!(linear.standard_part(), 0.0);
        assert_relative_eq!(linear.partial(0), 0.5_f64.exp());
        assert_eq!(linear.coefficient(&[2, 0]), 0.0);
    }

    #[test]
    fn display_lists_nonzero_terms() {
        let env = JetEnvironment::with_names(vec!["x".into()], 2).unwrap();
        let x = Jet::variable(&env, 0, 1.0).unwrap();
        let text = format!("{}", &x * &x);
        assert!(text.contains("*x^2"));
    }
}
