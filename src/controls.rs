//! Census control totals.
//!
//! Controls are the known aggregate counts a synthesized population must
//! match: per control category (a sample column name), a target total for
//! each category value. One set of controls exists per region and level
//! (household or individual).

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::types::Category;

/// Absolute tolerance when comparing category grand totals; census counts
/// are integral, so anything beyond rounding noise is a data error.
const GRAND_TOTAL_TOLERANCE: f64 = 0.5;

/// One-dimensional control totals for a set of categories.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Controls {
    categories: BTreeMap<String, BTreeMap<Category, f64>>,
}

impl Controls {
    pub fn new() -> Self {
        Controls::default()
    }

    /// Build controls from (category name, value, target total) triples.
    pub fn from_totals<N>(totals: impl IntoIterator<Item = (N, Category, f64)>) -> Self
    where
        N: Into<String>,
    {
        let mut controls = Controls::new();
        for (name, value, total) in totals {
            controls.insert(name, value, total);
        }
        controls
    }

    pub fn insert(&mut self, category: impl Into<String>, value: Category, total: f64) {
        self.categories.entry(category.into()).or_default().insert(value, total);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Categories in deterministic (name) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<Category, f64>)> {
        self.categories.iter().map(|(name, values)| (name.as_str(), values))
    }

    pub fn category(&self, name: &str) -> Option<&BTreeMap<Category, f64>> {
        self.categories.get(name)
    }

    /// The grand total of the first category.
    ///
    /// Internally consistent controls carry the same grand total in every
    /// category; `is_consistent` checks that invariant.
    pub fn grand_total(&self) -> f64 {
        self.categories
            .values()
            .next()
            .map(|values| values.values().sum())
            .unwrap_or(0.0)
    }

    /// Whether every category sums to the same grand total and no target
    /// is negative.
    pub fn is_consistent(&self) -> bool {
        let grand = self.grand_total();
        self.categories.values().all(|values| {
            let total: f64 = values.values().sum();
            (total - grand).abs() <= GRAND_TOTAL_TOLERANCE
                && values.values().all(|&t| t >= 0.0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grand_total() {
        let controls = Controls::from_totals(vec![
            ("a", Category(1), 145.0),
            ("a", Category(0), 45.0),
        ]);
        assert_eq!(controls.grand_total(), 190.0);
        assert!(controls.is_consistent());
    }

    #[test]
    fn test_inconsistent_totals() {
        let controls = Controls::from_totals(vec![
            ("work", Category(0), 10.0),
            ("work", Category(1), 20.0),
            ("gender", Category(0), 434.0),
            ("gender", Category(1), 420.0),
        ]);
        assert!(!controls.is_consistent());
    }

    #[test]
    fn test_negative_total_is_inconsistent() {
        let controls = Controls::from_totals(vec![
            ("a", Category(0), -1.0),
            ("a", Category(1), 191.0),
        ]);
        assert!(!controls.is_consistent());
    }

    #[test]
    fn test_iteration_order_is_name_order() {
        let controls = Controls::from_totals(vec![
            ("b", Category(0), 1.0),
            ("a", Category(0), 1.0),
        ]);
        let names: Vec<&str> = controls.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
