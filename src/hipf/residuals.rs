//! Convergence monitoring for the fitting loop.
//!
//! Residuals are signed relative deviations of every control category's
//! weighted total from its target, plus the deviation of both grand
//! totals. Weight deltas measure how much one iteration moved the weights.

use std::collections::BTreeMap;

use crate::controls::Controls;
use crate::sample::ReferenceSample;
use crate::types::Category;

use super::HouseholdWeights;

/// Residuals of fitted weights against both control levels.
///
/// Person-level totals are computed by broadcasting each household's weight
/// to all of its members. Where a target is 0 the raw weighted total is
/// reported instead of a relative deviation.
pub fn all_residuals(
    sample: &ReferenceSample,
    weights: &HouseholdWeights,
    controls_households: &Controls,
    controls_individuals: &Controls,
) -> Vec<f64> {
    let spans = sample.households();
    let sizes: Vec<usize> = spans.iter().map(|s| s.len).collect();
    let mut person_household = vec![0usize; sample.n_persons()];
    for (h, span) in spans.iter().enumerate() {
        for row in span.rows() {
            person_household[row] = h;
        }
    }

    let mut household_columns: Vec<(&str, Vec<Category>)> = Vec::new();
    for (name, _) in controls_households.iter() {
        if let Some(collapsed) = sample.collapse_column(name) {
            household_columns.push((name, collapsed));
        }
    }
    let mut person_columns: Vec<(&str, &[Category])> = Vec::new();
    for (name, _) in controls_individuals.iter() {
        if let Some(column) = sample.column(name) {
            person_columns.push((name, column));
        }
    }

    compute_residuals(
        weights.values(),
        &sizes,
        &household_columns,
        &person_columns,
        &person_household,
        controls_households,
        controls_individuals,
    )
}

pub(crate) fn max_abs_residual(
    weights: &[f64],
    sizes: &[usize],
    household_columns: &[(&str, Vec<Category>)],
    person_columns: &[(&str, &[Category])],
    person_household: &[usize],
    controls_households: &Controls,
    controls_individuals: &Controls,
) -> f64 {
    compute_residuals(
        weights,
        sizes,
        household_columns,
        person_columns,
        person_household,
        controls_households,
        controls_individuals,
    )
    .into_iter()
    .fold(0.0f64, |acc, r| acc.max(r.abs()))
}

fn compute_residuals(
    weights: &[f64],
    sizes: &[usize],
    household_columns: &[(&str, Vec<Category>)],
    person_columns: &[(&str, &[Category])],
    person_household: &[usize],
    controls_households: &Controls,
    controls_individuals: &Controls,
) -> Vec<f64> {
    let mut residuals = Vec::new();

    for (name, collapsed) in household_columns {
        if let Some(targets) = controls_households.category(name) {
            category_residuals(weights, collapsed, targets, &mut residuals);
        }
    }
    let household_total: f64 = weights.iter().sum();
    residuals.push(relative_deviation(household_total, controls_households.grand_total()));

    let person_weights: Vec<f64> = person_household.iter().map(|&h| weights[h]).collect();
    for (name, column) in person_columns {
        if let Some(targets) = controls_individuals.category(name) {
            category_residuals(&person_weights, column, targets, &mut residuals);
        }
    }
    let person_total: f64 = weights.iter().zip(sizes).map(|(w, &p)| w * p as f64).sum();
    residuals.push(relative_deviation(person_total, controls_individuals.grand_total()));

    residuals
}

fn category_residuals(
    weights: &[f64],
    column: &[Category],
    targets: &BTreeMap<Category, f64>,
    out: &mut Vec<f64>,
) {
    for (&value, &target) in targets {
        let actual: f64 = weights
            .iter()
            .zip(column)
            .filter(|(_, &v)| v == value)
            .map(|(w, _)| *w)
            .sum();
        out.push(relative_deviation(actual, target));
    }
}

fn relative_deviation(actual: f64, target: f64) -> f64 {
    if target != 0.0 {
        (actual - target) / target
    } else {
        actual
    }
}

/// Maximum relative change between two weight vectors of one iteration.
pub(crate) fn max_relative_delta(previous: &[f64], current: &[f64]) -> f64 {
    previous
        .iter()
        .zip(current)
        .map(|(&p, &c)| {
            if p != 0.0 {
                ((c - p) / p).abs()
            } else if c == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        })
        .fold(0.0f64, f64::max)
}
