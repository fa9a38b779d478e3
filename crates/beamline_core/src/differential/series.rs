//! Univariate Taylor coefficient recurrences.
//!
//! Convention: `c[k] = f^(k)(t0) / k!`. Inputs are coefficient slices of the
//! argument `a(t)`; outputs are written into `c`, whose length sets the
//! number of coefficients. `Jet` evaluates a transcendental by running these
//! on `a(t) = a0 + t` and composing the result with the nilpotent part of
//! its argument.

use num_traits::Float;

fn of<F: Float>(k: usize) -> F {
    F::from(k).unwrap_or_else(F::nan)
}

/// Coefficients of `a0 + t`.
pub fn linear<F: Float>(a0: F, len: usize) -> Vec<F> {
    let mut a = vec![F::zero(); len];
    if len > 0 {
        a[0] = a0;
    }
    if len > 1 {
        a[1] = F::one();
    }
    a
}

/// `c = a * b` (Cauchy product).
pub fn mul<F: Float>(a: &[F], b: &[F], c: &mut [F]) {
    for k in 0..c.len() {
        let mut sum = F::zero();
        for j in 0..=k {
            sum = sum + a[j] * b[k - j];
        }
        c[k] = sum;
    }
}

/// `c = 1 / a`.
pub fn recip<F: Float>(a: &[F], c: &mut [F]) {
    let inv_a0 = F::one() / a[0];
    c[0] = inv_a0;
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + a[j] * c[k - j];
        }
        c[k] = -sum * inv_a0;
    }
}

/// `c = exp(a)`; `c[k] = (1/k) Σ j a[j] c[k-j]`.
pub fn exp<F: Float>(a: &[F], c: &mut [F]) {
    c[0] = a[0].exp();
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + of::<F>(j) * a[j] * c[k - j];
        }
        c[k] = sum / of(k);
    }
}

/// `c = ln(a)`.
pub fn ln<F: Float>(a: &[F], c: &mut [F]) {
    let inv_a0 = F::one() / a[0];
    c[0] = a[0].ln();
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..k {
            sum = sum + of::<F>(j) * c[j] * a[k - j];
        }
        c[k] = (a[k] - sum / of(k)) * inv_a0;
    }
}

/// `c = sqrt(a)`.
pub fn sqrt<F: Float>(a: &[F], c: &mut [F]) {
    c[0] = a[0].sqrt();
    let two_c0 = c[0] + c[0];
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..k {
            sum = sum + c[j] * c[k - j];
        }
        c[k] = (a[k] - sum) / two_c0;
    }
}

/// `(s, co) = (sin a, cos a)`, coupled recurrence.
pub fn sin_cos<F: Float>(a: &[F], s: &mut [F], co: &mut [F]) {
    let (s0, c0) = a[0].sin_cos();
    s[0] = s0;
    co[0] = c0;
    for k in 1..s.len() {
        let mut sum_s = F::zero();
        let mut sum_c = F::zero();
        for j in 1..=k {
            let ja = of::<F>(j) * a[j];
            sum_s = sum_s + ja * co[k - j];
            sum_c = sum_c + ja * s[k - j];
        }
        s[k] = sum_s / of(k);
        co[k] = -sum_c / of(k);
    }
}

/// `(sh, ch) = (sinh a, cosh a)`.
pub fn sinh_cosh<F: Float>(a: &[F], sh: &mut [F], ch: &mut [F]) {
    sh[0] = a[0].sinh();
    ch[0] = a[0].cosh();
    for k in 1..sh.len() {
        let mut sum_sh = F::zero();
        let mut sum_ch = F::zero();
        for j in 1..=k {
            let ja = of::<F>(j) * a[j];
            sum_sh = sum_sh + ja * ch[k - j];
            sum_ch = sum_ch + ja * sh[k - j];
        }
        sh[k] = sum_sh / of(k);
        ch[k] = sum_ch / of(k);
    }
}

/// `c = tan(a)` via `c' = a' (1 + c²)`.
pub fn tan<F: Float>(a: &[F], c: &mut [F]) {
    let n = c.len();
    let mut s = vec![F::zero(); n];
    c[0] = a[0].tan();
    s[0] = F::one() + c[0] * c[0];
    for k in 1..n {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + of::<F>(j) * a[j] * s[k - j];
        }
        c[k] = sum / of(k);
        let mut s_k = F::zero();
        for j in 0..=k {
            s_k = s_k + c[j] * c[k - j];
        }
        s[k] = s_k;
    }
}

/// Integrates `c' = a' g` given `g`, leaving `c[0]` untouched.
fn integrate_product<F: Float>(a: &[F], g: &[F], c: &mut [F]) {
    for k in 1..c.len() {
        let mut sum = F::zero();
        for j in 1..=k {
            sum = sum + of::<F>(j) * a[j] * g[k - j];
        }
        c[k] = sum / of(k);
    }
}

/// `c = atan(a)` via `c' = a' / (1 + a²)`.
pub fn atan<F: Float>(a: &[F], c: &mut [F]) {
    let n = c.len();
    let mut sq = vec![F::zero(); n];
    let mut g = vec![F::zero(); n];
    mul(a, a, &mut sq);
    sq[0] = F::one() + sq[0];
    recip(&sq, &mut g);
    c[0] = a[0].atan();
    integrate_product(a, &g, c);
}

/// `c = asin(a)` via `c' = a' / sqrt(1 - a²)`.
pub fn asin<F: Float>(a: &[F], c: &mut [F]) {
    let n = c.len();
    let mut sq = vec![F::zero(); n];
    let mut root = vec![F::zero(); n];
    let mut g = vec![F::zero(); n];
    mul(a, a, &mut sq);
    for v in sq.iter_mut() {
        *v = -*v;
    }
    sq[0] = F::one() + sq[0];
    sqrt(&sq, &mut root);
    recip(&root, &mut g);
    c[0] = a[0].asin();
    integrate_product(a, &g, c);
}

/// `c = acos(a) = π/2 - asin(a)`.
pub fn acos<F: Float>(a: &[F], c: &mut [F]) {
    asin(a, c);
    c[0] = a[0].acos();
    for ck in c[1..].iter_mut() {
        *ck = -*ck;
    }
}

/// `c = (a0 + t)^p` by the binomial series, `c[k] = C(p, k) a0^(p-k)`.
pub fn powf_linear<F: Float>(a0: F, p: F, c: &mut [F]) {
    if c.is_empty() {
        return;
    }
    c[0] = a0.powf(p);
    let inv_a0 = F::one() / a0;
    let mut binom_over_power = F::one();
    for k in 1..c.len() {
        binom_over_power = binom_over_power * (p - of::<F>(k - 1)) / of::<F>(k) * inv_a0;
        c[k] = c[0] * binom_over_power;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const N: usize = 6;

    fn factorial(k: usize) -> f64 {
        (1..=k).map(|v| v as f64).product()
    }

    #[test]
    fn exp_of_linear_matches_closed_form() {
        let a = linear(0.3_f64, N);
        let mut c = vec![0.0; N];
        exp(&a, &mut c);
        for k in 0..N {
            assert_relative_eq!(c[k], 0.3_f64.exp() / factorial(k), max_relative = 1e-14);
        }
    }

    #[test]
    fn sin_cos_of_linear_cycles_derivatives() {
        let x0 = 0.7_f64;
        let a = linear(x0, N);
        let mut s = vec![0.0; N];
        let mut co = vec![0.0; N];
        sin_cos(&a, &mut s, &mut co);
        let derivs = [x0.sin(), x0.cos(), -x0.sin(), -x0.cos()];
        for k in 0..N {
            assert_relative_eq!(s[k], derivs[k % 4] / factorial(k), max_relative = 1e-13);
        }
    }

    #[test]
    fn sqrt_matches_binomial_series() {
        let a = linear(2.0_f64, N);
        let mut c = vec![0.0; N];
        let mut expected = vec![0.0; N];
        sqrt(&a, &mut c);
        powf_linear(2.0, 0.5, &mut expected);
        for k in 0..N {
            assert_relative_eq!(c[k], expected[k], max_relative = 1e-13);
        }
    }

    #[test]
    fn ln_of_linear_has_alternating_coefficients() {
        let a = linear(1.5_f64, N);
        let mut c = vec![0.0; N];
        ln(&a, &mut c);
        assert_relative_eq!(c[0], 1.5_f64.ln());
        for k in 1..N {
            let sign = if k % 2 == 1 { 1.0 } else { -1.0 };
            let expected = sign / (k as f64 * 1.5_f64.powi(k as i32));
            assert_relative_eq!(c[k], expected, max_relative = 1e-13);
        }
    }

    #[test]
    fn asin_first_derivative() {
        let x0 = 0.2_f64;
        let a = linear(x0, 3);
        let mut c = vec![0.0; 3];
        asin(&a, &mut c);
        assert_relative_eq!(c[1], 1.0 / (1.0 - x0 * x0).sqrt(), max_relative = 1e-14);
        // d²/dx² asin = x / (1 - x²)^{3/2}
        assert_relative_eq!(
            c[2],
            x0 / (1.0 - x0 * x0).powf(1.5) / 2.0,
            max_relative = 1e-13
        );
    }

    #[test]
    fn atan_and_tan_derivatives() {
        let x0 = 0.4_f64;
        let a = linear(x0, 3);
        let mut c = vec![0.0; 3];
        atan(&a, &mut c);
        assert_relative_eq!(c[1], 1.0 / (1.0 + x0 * x0), max_relative = 1e-14);

        tan(&a, &mut c);
        let t = x0.tan();
        assert_relative_eq!(c[1], 1.0 + t * t, max_relative = 1e-14);
        assert_relative_eq!(c[2], t * (1.0 + t * t), max_relative = 1e-13);
    }
}
