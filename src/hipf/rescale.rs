//! Household-size correction of aggregated weights.
//!
//! Averaging person weights back to household level breaks both grand
//! totals. The correction multiplies every size-p household's weight by
//! `c * d^p`, where `d` is the unique positive real root of the polynomial
//! `poly[p] = (G_hh/G_ind * p - 1) * Fp[p]` (Fp = summed weights per
//! household size) and `c` renormalizes to the household grand total.
//! Zero or multiple qualifying roots mean the controls are incompatible
//! with the sample's size distribution and abort the fit.

use super::HipfError;

const BISECTION_STEPS: usize = 200;
const SCAN_POINTS: usize = 4096;

pub(crate) fn correct_for_household_size(
    weights: &mut [f64],
    sizes: &[usize],
    grand_households: f64,
    grand_individuals: f64,
) -> Result<(), HipfError> {
    if grand_individuals <= 0.0 {
        return Err(HipfError::InvalidControls(
            "individual grand total must be positive".to_string(),
        ));
    }
    let max_size = sizes.iter().copied().max().unwrap_or(0);

    // Summed weights per household size.
    let mut fp = vec![0.0f64; max_size + 1];
    for (&w, &p) in weights.iter().zip(sizes) {
        fp[p] += w;
    }

    let ratio = grand_households / grand_individuals;
    let coefficients: Vec<f64> = fp
        .iter()
        .enumerate()
        .map(|(p, &f)| (ratio * p as f64 - 1.0) * f)
        .collect();

    let d = unique_positive_root(&coefficients)?;

    let denominator: f64 = fp
        .iter()
        .enumerate()
        .skip(1)
        .map(|(p, &f)| f * d.powi(p as i32))
        .sum();
    if denominator <= 0.0 || !denominator.is_finite() {
        return Err(HipfError::NumericalDivergence(
            "household-size correction denominator vanished".to_string(),
        ));
    }
    let c = grand_households / denominator;

    for (w, &p) in weights.iter_mut().zip(sizes) {
        *w *= c * d.powi(p as i32);
    }
    Ok(())
}

/// The unique positive real root of a polynomial given by its coefficients
/// (index = power). Errors when no positive root exists or more than one
/// does.
///
/// Roots are isolated by scanning a Cauchy bound for sign changes of the
/// polynomial value and bisecting each bracketing interval; a Descartes
/// sign-change count of zero short-circuits the no-root case exactly.
pub(crate) fn unique_positive_root(coefficients: &[f64]) -> Result<f64, HipfError> {
    // Strip high-order zeros; low-order zeros only contribute roots at 0,
    // which never qualify.
    let degree = match coefficients.iter().rposition(|&a| a != 0.0) {
        Some(d) => d,
        None => {
            return Err(HipfError::NumericalDivergence(
                "size-correction polynomial is identically zero".to_string(),
            ))
        }
    };
    let lowest = coefficients
        .iter()
        .position(|&a| a != 0.0)
        .unwrap_or(degree);
    let reduced = &coefficients[lowest..=degree];

    let sign_changes = reduced
        .iter()
        .filter(|&&a| a != 0.0)
        .map(|&a| a > 0.0)
        .collect::<Vec<_>>()
        .windows(2)
        .filter(|pair| pair[0] != pair[1])
        .count();
    if sign_changes == 0 {
        return Err(HipfError::NumericalDivergence(
            "size-correction polynomial has no positive real root".to_string(),
        ));
    }

    // Cauchy bound: all roots lie below 1 + max |a_i| / |a_n|.
    let leading = reduced[reduced.len() - 1];
    let bound = 1.0
        + reduced[..reduced.len() - 1]
            .iter()
            .fold(0.0f64, |acc, &a| acc.max(a.abs()))
            / leading.abs();

    let mut roots: Vec<f64> = Vec::new();
    let step = bound / SCAN_POINTS as f64;
    let mut previous_x = step * 1e-9;
    let mut previous_value = evaluate(reduced, previous_x);
    for i in 1..=SCAN_POINTS {
        let x = step * i as f64;
        let value = evaluate(reduced, x);
        if value == 0.0 {
            roots.push(x);
        } else if previous_value.signum() != value.signum() && previous_value != 0.0 {
            roots.push(bisect(reduced, previous_x, x));
        }
        previous_x = x;
        previous_value = value;
    }

    match roots.len() {
        1 => Ok(roots[0]),
        0 => Err(HipfError::NumericalDivergence(
            "size-correction polynomial has no positive real root".to_string(),
        )),
        n => Err(HipfError::NumericalDivergence(format!(
            "size-correction polynomial has {} positive real roots",
            n
        ))),
    }
}

fn evaluate(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &a| acc * x + a)
}

fn bisect(coefficients: &[f64], mut low: f64, mut high: f64) -> f64 {
    let mut low_value = evaluate(coefficients, low);
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (low + high);
        let mid_value = evaluate(coefficients, mid);
        if mid_value == 0.0 {
            return mid;
        }
        if low_value.signum() == mid_value.signum() {
            low = mid;
            low_value = mid_value;
        } else {
            high = mid;
        }
        if (high - low) <= f64::EPSILON * high.abs() {
            break;
        }
    }
    0.5 * (low + high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_root_quadratic() {
        // (x - 2)(x + 3) = x^2 + x - 6: one positive root at 2.
        let root = unique_positive_root(&[-6.0, 1.0, 1.0]).unwrap();
        assert!((root - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_root_with_zero_low_order_coefficients() {
        // x * (x - 2)(x + 3): root at 0 does not qualify.
        let root = unique_positive_root(&[0.0, -6.0, 1.0, 1.0]).unwrap();
        assert!((root - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_positive_root() {
        // x^2 + x + 1 has no real roots at all.
        assert!(matches!(
            unique_positive_root(&[1.0, 1.0, 1.0]),
            Err(HipfError::NumericalDivergence(_))
        ));
    }

    #[test]
    fn test_two_positive_roots() {
        // (x - 1)(x - 2) = x^2 - 3x + 2.
        assert!(matches!(
            unique_positive_root(&[2.0, -3.0, 1.0]),
            Err(HipfError::NumericalDivergence(_))
        ));
    }

    #[test]
    fn test_zero_polynomial() {
        assert!(matches!(
            unique_positive_root(&[0.0, 0.0]),
            Err(HipfError::NumericalDivergence(_))
        ));
    }

    #[test]
    fn test_correction_restores_both_totals() {
        // Two size-1 and one size-2 households; targets: 3 households,
        // 4 persons.
        let mut weights = vec![1.0, 1.0, 1.0];
        let sizes = vec![1, 1, 2];
        correct_for_household_size(&mut weights, &sizes, 3.0, 4.0).unwrap();
        let households: f64 = weights.iter().sum();
        let persons: f64 = weights.iter().zip(&sizes).map(|(w, &p)| w * p as f64).sum();
        assert!((households - 3.0).abs() < 1e-9);
        assert!((persons - 4.0).abs() < 1e-9);
    }
}
