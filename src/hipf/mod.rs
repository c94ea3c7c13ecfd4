//! Hierarchical iterative proportional fitting.
//!
//! Reweights a household/person reference sample so that its household-level
//! and person-level marginal distributions simultaneously match independent
//! census control totals. The algorithm follows Müller and Axhausen 2011,
//! "Hierarchical IPF: Generating a synthetic population for Switzerland":
//! sequential raking on the collapsed household sample, raking on the
//! expanded person sample, aggregation back to household level by averaging,
//! and a household-size correction that restores both grand totals.

pub mod rescale;
pub mod residuals;

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::controls::Controls;
use crate::sample::ReferenceSample;
use crate::types::Category;

/// Fitting parameters.
///
/// Either tolerance can be disabled with `None`; fitting then runs for
/// exactly `max_iterations` iterations.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FitConfig {
    pub max_iterations: u32,
    /// Early stop when the maximum relative weight change of one iteration
    /// falls below this.
    pub weights_tolerance: Option<f64>,
    /// Early stop when the maximum absolute residual versus the controls
    /// falls below this.
    pub residuals_tolerance: Option<f64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            weights_tolerance: Some(1e-4),
            residuals_tolerance: Some(1e-4),
        }
    }
}

impl FitConfig {
    /// Run exactly `iterations` iterations with no early stop.
    pub fn exact(iterations: u32) -> Self {
        Self {
            max_iterations: iterations,
            weights_tolerance: None,
            residuals_tolerance: None,
        }
    }
}

/// Fatal fitting failures. None of these are retried; the caller must fix
/// the input data or accept that the controls are incompatible.
#[derive(Debug)]
pub enum HipfError {
    /// The reference sample violates the fitting schema.
    InvalidSample(String),
    /// The control totals are malformed or do not match the sample.
    InvalidControls(String),
    /// The household-size correction polynomial has no unique positive
    /// real root; the controls are numerically incompatible with the
    /// sample's size distribution.
    NumericalDivergence(String),
}

impl fmt::Display for HipfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HipfError::InvalidSample(msg) => write!(f, "invalid reference sample: {}", msg),
            HipfError::InvalidControls(msg) => write!(f, "invalid controls: {}", msg),
            HipfError::NumericalDivergence(msg) => write!(f, "numerical divergence: {}", msg),
        }
    }
}

impl std::error::Error for HipfError {}

/// Fitted weights, one per sample household, in sample row order.
///
/// Never mutated after fitting completes.
#[derive(Clone, Debug)]
pub struct HouseholdWeights {
    ids: Vec<u64>,
    weights: Vec<f64>,
    lookup: HashMap<u64, usize>,
}

impl HouseholdWeights {
    pub(crate) fn new(ids: Vec<u64>, weights: Vec<f64>) -> Self {
        let lookup = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        Self { ids, weights, lookup }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, household_id: u64) -> Option<f64> {
        self.lookup.get(&household_id).map(|&i| self.weights[i])
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn all_finite(&self) -> bool {
        self.weights.iter().all(|w| w.is_finite())
    }

    /// (household id, weight) pairs in sample order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.ids.iter().copied().zip(self.weights.iter().copied())
    }

    pub fn values(&self) -> &[f64] {
        &self.weights
    }
}

/// Fit household weights against household- and person-level controls.
///
/// On success the returned weights sum to the household grand total within
/// 0.1 absolute tolerance and contain no non-finite values; this is a
/// documented postcondition the caller may assert, not re-checked here.
pub fn fit_hipf(
    sample: &ReferenceSample,
    controls_households: &Controls,
    controls_individuals: &Controls,
    config: &FitConfig,
) -> Result<HouseholdWeights, HipfError> {
    validate(sample, controls_households, controls_individuals)?;

    let spans = sample.households();
    let n_households = spans.len();
    let n_persons = sample.n_persons();
    let sizes: Vec<usize> = spans.iter().map(|s| s.len).collect();

    // Collapsed household values per household control category. The
    // columns exist; `validate` checked every control category.
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

    // Person row -> household ordinal, for broadcast and aggregation.
    let mut person_household = vec![0usize; n_persons];
    for (h, span) in spans.iter().enumerate() {
        for row in span.rows() {
            person_household[row] = h;
        }
    }

    let grand_households = controls_households.grand_total();
    let grand_individuals = controls_individuals.grand_total();

    let mut weights = vec![1.0f64; n_households];
    let mut person_weights = vec![1.0f64; n_persons];
    let mut previous = vec![1.0f64; n_households];

    for _ in 0..config.max_iterations {
        previous.copy_from_slice(&weights);

        // Rake the collapsed household sample against household controls,
        // one category after the other.
        for (name, collapsed) in &household_columns {
            if let Some(targets) = controls_households.category(name) {
                rake(&mut weights, collapsed, targets);
            }
        }

        // Broadcast down to person rows and rake against individual controls.
        for (row, &h) in person_household.iter().enumerate() {
            person_weights[row] = weights[h];
        }
        for (name, column) in &person_columns {
            if let Some(targets) = controls_individuals.category(name) {
                rake(&mut person_weights, column, targets);
            }
        }

        // Aggregate back to household level by averaging over members.
        for (h, span) in spans.iter().enumerate() {
            let total: f64 = span.rows().map(|row| person_weights[row]).sum();
            weights[h] = total / span.len as f64;
        }

        // Household-size correction restores both grand totals.
        rescale::correct_for_household_size(
            &mut weights,
            &sizes,
            grand_households,
            grand_individuals,
        )?;

        if let Some(tolerance) = config.residuals_tolerance {
            let max_residual = residuals::max_abs_residual(
                &weights,
                &sizes,
                &household_columns,
                &person_columns,
                &person_household,
                controls_households,
                controls_individuals,
            );
            if max_residual < tolerance {
                break;
            }
        }
        if let Some(tolerance) = config.weights_tolerance {
            if residuals::max_relative_delta(&previous, &weights) < tolerance {
                break;
            }
        }
    }

    let ids = spans.iter().map(|s| s.id).collect();
    Ok(HouseholdWeights::new(ids, weights))
}

/// One multiplicative raking step: rescale each weight so the weighted
/// total of every category value meets its target.
fn rake(weights: &mut [f64], column: &[Category], targets: &std::collections::BTreeMap<Category, f64>) {
    for (&value, &target) in targets {
        let current: f64 = weights
            .iter()
            .zip(column)
            .filter(|(_, &v)| v == value)
            .map(|(w, _)| *w)
            .sum();
        if current > 0.0 {
            let factor = target / current;
            for (w, &v) in weights.iter_mut().zip(column) {
                if v == value {
                    *w *= factor;
                }
            }
        }
    }
}

fn validate(
    sample: &ReferenceSample,
    controls_households: &Controls,
    controls_individuals: &Controls,
) -> Result<(), HipfError> {
    if controls_households.is_empty() {
        return Err(HipfError::InvalidControls("household controls are empty".to_string()));
    }
    if controls_individuals.is_empty() {
        return Err(HipfError::InvalidControls("individual controls are empty".to_string()));
    }
    if !controls_households.is_consistent() {
        return Err(HipfError::InvalidControls(
            "household control categories disagree on the grand total".to_string(),
        ));
    }
    if !controls_individuals.is_consistent() {
        return Err(HipfError::InvalidControls(
            "individual control categories disagree on the grand total".to_string(),
        ));
    }

    for (controls, household_level) in [(controls_households, true), (controls_individuals, false)] {
        for (name, targets) in controls.iter() {
            let column = sample.column(name).ok_or_else(|| {
                HipfError::InvalidControls(format!("control category '{}' is not a sample column", name))
            })?;
            for value in targets.keys() {
                if !column.contains(value) {
                    return Err(HipfError::InvalidControls(format!(
                        "control value {} of category '{}' does not occur in the sample",
                        value, name
                    )));
                }
            }
            if household_level && !sample.is_household_level(name) {
                return Err(HipfError::InvalidSample(format!(
                    "household control column '{}' varies within a household",
                    name
                )));
            }
        }
    }
    Ok(())
}
