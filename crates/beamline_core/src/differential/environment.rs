//! Shared configuration for truncated power series.
//!
//! A [`JetEnvironment`] fixes the ordered set of independent variables and
//! the maximum total order. It owns the monomial indexing (graded order:
//! all monomials of degree 0, then degree 1, ...) and the truncated product
//! table every multiplication walks. Environments are immutable and shared
//! through `Rc`; two jets may only be combined if they point at the same
//! instance.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{BeamlineError, Result};
use crate::state::PHASE_DIMENSION;

/// Largest supported truncation order.
pub const MAX_SUPPORTED_ORDER: usize = 12;

/// Largest number of coefficients per jet. Six phase-space variables at
/// order 12 need 18564.
pub const MAX_TERMS: usize = 20_000;

const PHASE_SPACE_NAMES: [&str; PHASE_DIMENSION] = ["x", "y", "cdt", "npx", "npy", "ndp"];

#[derive(Debug)]
pub struct JetEnvironment {
    names: Vec<String>,
    max_order: usize,
    monomials: Vec<Vec<u8>>,
    degrees: Vec<usize>,
    lookup: HashMap<Vec<u8>, usize>,
    /// `products[i]` lists `(j, k)` such that monomial i times monomial j is
    /// monomial k and the degree of k does not exceed `max_order`.
    products: Vec<Vec<(usize, usize)>>,
    first_order: Vec<usize>,
}

impl JetEnvironment {
    pub fn new(num_vars: usize, max_order: usize) -> Result<Rc<Self>> {
        let names = (0..num_vars).map(|i| format!("v{i}")).collect();
        Self::with_names(names, max_order)
    }

    /// Six phase-space variables `x, y, cdt, npx, npy, ndp`, in state order.
    pub fn phase_space(max_order: usize) -> Result<Rc<Self>> {
        Self::with_names(
            PHASE_SPACE_NAMES.iter().map(|s| s.to_string()).collect(),
            max_order,
        )
    }

    /// Phase-space variables followed by named parameters.
    pub fn phase_space_with_parameters(max_order: usize, parameters: &[&str]) -> Result<Rc<Self>> {
        let mut names: Vec<String> = PHASE_SPACE_NAMES.iter().map(|s| s.to_string()).collect();
        names.extend(parameters.iter().map(|s| s.to_string()));
        Self::with_names(names, max_order)
    }

    pub fn with_names(names: Vec<String>, max_order: usize) -> Result<Rc<Self>> {
        if names.is_empty() {
            return Err(BeamlineError::InvalidParameter(
                "a jet environment needs at least one variable".into(),
            ));
        }
        if names.len() > u8::MAX as usize {
            return Err(BeamlineError::InvalidParameter(format!(
                "too many variables ({})",
                names.len()
            )));
        }
        if max_order == 0 || max_order > MAX_SUPPORTED_ORDER {
            return Err(BeamlineError::InvalidParameter(format!(
                "jet order must be between 1 and {MAX_SUPPORTED_ORDER}, got {max_order}"
            )));
        }
        let terms = monomial_count(names.len(), max_order);
        if terms > MAX_TERMS {
            return Err(BeamlineError::InvalidParameter(format!(
                "{} variables at order {max_order} need {terms} terms, more than {MAX_TERMS}",
                names.len()
            )));
        }

        let num_vars = names.len();
        let mut monomials = Vec::new();
        for degree in 0..=max_order {
            let mut current = vec![0u8; num_vars];
            push_monomials_of_degree(&mut monomials, &mut current, 0, degree);
        }
        let degrees: Vec<usize> = monomials
            .iter()
            .map(|m| m.iter().map(|&e| e as usize).sum())
            .collect();
        let lookup: HashMap<Vec<u8>, usize> = monomials
            .iter()
            .enumerate()
            .map(|(i, m)| (m.clone(), i))
            .collect();

        // Monomials are graded, so each row stops at the first partner whose
        // degree would push the product past `max_order`.
        let mut products = Vec::with_capacity(monomials.len());
        for (i, mi) in monomials.iter().enumerate() {
            let mut row = Vec::new();
            let room = max_order - degrees[i];
            for (j, mj) in monomials.iter().enumerate() {
                if degrees[j] > room {
                    break;
                }
                let product: Vec<u8> = mi.iter().zip(mj).map(|(a, b)| a + b).collect();
                if let Some(&k) = lookup.get(&product) {
                    row.push((j, k));
                }
            }
            products.push(row);
        }

        let first_order = (0..num_vars)
            .map(|v| {
                let mut e = vec![0u8; num_vars];
                e[v] = 1;
                lookup[&e]
            })
            .collect();

        Ok(Rc::new(Self {
            names,
            max_order,
            monomials,
            degrees,
            lookup,
            products,
            first_order,
        }))
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Number of coefficients stored per jet.
    pub fn num_terms(&self) -> usize {
        self.monomials.len()
    }

    pub fn monomial(&self, index: usize) -> &[u8] {
        &self.monomials[index]
    }

    pub fn degree(&self, index: usize) -> usize {
        self.degrees[index]
    }

    pub fn index_of(&self, exponents: &[u8]) -> Option<usize> {
        if exponents.len() != self.num_vars() {
            return None;
        }
        self.lookup.get(exponents).copied()
    }

    pub fn first_order_index(&self, variable: usize) -> Option<usize> {
        self.first_order.get(variable).copied()
    }

    pub(crate) fn products(&self, index: usize) -> &[(usize, usize)] {
        &self.products[index]
    }

    pub fn has_phase_space(&self) -> bool {
        self.num_vars() >= PHASE_DIMENSION
    }
}

fn push_monomials_of_degree(
    out: &mut Vec<Vec<u8>>,
    current: &mut [u8],
    var: usize,
    remaining: usize,
) {
    if var + 1 == current.len() {
        current[var] = remaining as u8;
        out.push(current.to_vec());
        current[var] = 0;
        return;
    }
    for e in (0..=remaining).rev() {
        current[var] = e as u8;
        push_monomials_of_degree(out, current, var + 1, remaining - e);
    }
    current[var] = 0;
}

/// `C(n + k, k)`: number of monomials of degree at most `k` in `n` variables.
/// Saturates at `usize::MAX`.
pub fn monomial_count(num_vars: usize, max_order: usize) -> usize {
    let mut count = 1usize;
    for i in 1..=max_order {
        let Some(next) = num_vars
            .checked_add(i)
            .and_then(|factor| count.checked_mul(factor))
        else {
            return usize::MAX;
        };
        count = next / i;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monomials_are_graded() {
        let env = JetEnvironment::new(3, 3).unwrap();
        assert_eq!(env.num_terms(), monomial_count(3, 3));
        assert_eq!(env.monomial(0), &[0, 0, 0]);
        for i in 1..env.num_terms() {
            assert!(env.degree(i - 1) <= env.degree(i));
        }
    }

    #[test]
    fn phase_space_environment_sizes() {
        let env = JetEnvironment::phase_space(2).unwrap();
        assert_eq!(env.num_vars(), 6);
        assert_eq!(env.num_terms(), 28);
        assert_eq!(env.variable_index("npx"), Some(3));
        let idx = env.first_order_index(5).unwrap();
        assert_eq!(env.monomial(idx), &[0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn product_table_respects_truncation() {
        let env = JetEnvironment::new(2, 2).unwrap();
        let x = env.index_of(&[1, 0]).unwrap();
        let xx = env.index_of(&[2, 0]).unwrap();
        assert!(env.products(x).contains(&(x, xx)));
        assert!(env.products(xx).iter().all(|&(j, _)| env.degree(j) == 0));
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(JetEnvironment::new(0, 2).is_err());
        assert!(JetEnvironment::new(2, 0).is_err());
        assert!(JetEnvironment::new(2, MAX_SUPPORTED_ORDER + 1).is_err());
    }

    #[test]
    fn term_count_is_bounded() {
        assert_eq!(monomial_count(6, MAX_SUPPORTED_ORDER), 18_564);
        assert_eq!(monomial_count(usize::MAX, 2), usize::MAX);
        assert!(monomial_count(7, MAX_SUPPORTED_ORDER) > MAX_TERMS);

        let err = JetEnvironment::phase_space_with_parameters(MAX_SUPPORTED_ORDER, &["k1"])
            .unwrap_err();
        assert!(err.to_string().contains("terms"), "{err}");
        assert_eq!(monomial_count(198, 2), 19_900);
        assert!(JetEnvironment::new(198, 2).is_ok());
        assert!(JetEnvironment::new(199, 2).is_err());
    }

    #[test]
    fn product_rows_hold_every_admissible_pair() {
        let env = JetEnvironment::new(3, 4).unwrap();
        for i in 0..env.num_terms() {
            let expected = (0..env.num_terms())
                .filter(|&j| env.degree(i) + env.degree(j) <= env.max_order())
                .count();
            assert_eq!(env.products(i).len(), expected);
        }
    }

    #[test]
    fn parameters_follow_phase_space() {
        let env = JetEnvironment::phase_space_with_parameters(1, &["k1"]).unwrap();
        assert_eq!(env.num_vars(), 7);
        assert_eq!(env.variable_index("k1"), Some(6));
        assert!(env.has_phase_space());
    }
}
