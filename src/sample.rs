//! Reference sample table.
//!
//! A small real survey sample used as the prior for population synthesis.
//! Rows are persons keyed by (household id, person id); columns are
//! categorical attributes, some household-level (constant within a
//! household), some person-level.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::types::Category;

/// Contiguous block of person rows belonging to one sample household.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HouseholdSpan {
    /// Household id as given in the survey.
    pub id: u64,
    /// First person row of the household.
    pub start: usize,
    /// Number of members.
    pub len: usize,
}

impl HouseholdSpan {
    pub fn rows(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Schema violations detected while assembling a reference sample.
#[derive(Debug)]
pub enum SampleError {
    Empty,
    DuplicateKey { household: u64, person: u64 },
    SplitHousehold(u64),
    ColumnLength { column: String, expected: usize, actual: usize },
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Empty => write!(f, "reference sample has no rows"),
            SampleError::DuplicateKey { household, person } => {
                write!(f, "duplicate (household, person) key ({}, {})", household, person)
            }
            SampleError::SplitHousehold(id) => {
                write!(f, "household {} appears in non-contiguous row blocks", id)
            }
            SampleError::ColumnLength { column, expected, actual } => {
                write!(f, "column '{}' has {} values, expected {}", column, actual, expected)
            }
        }
    }
}

impl std::error::Error for SampleError {}

/// The reference sample, stored column-wise.
///
/// Person rows of one household must be contiguous; column iteration order
/// is the sorted column name order so that sequential operations over
/// categories are reproducible.
#[derive(Clone, Debug)]
pub struct ReferenceSample {
    index: Vec<(u64, u64)>,
    columns: BTreeMap<String, Vec<Category>>,
    households: Vec<HouseholdSpan>,
    household_lookup: HashMap<u64, usize>,
}

impl ReferenceSample {
    /// Assemble a sample from a (household, person) index and its columns.
    pub fn new(
        index: Vec<(u64, u64)>,
        columns: BTreeMap<String, Vec<Category>>,
    ) -> Result<Self, SampleError> {
        if index.is_empty() {
            return Err(SampleError::Empty);
        }
        for (name, values) in &columns {
            if values.len() != index.len() {
                return Err(SampleError::ColumnLength {
                    column: name.clone(),
                    expected: index.len(),
                    actual: values.len(),
                });
            }
        }

        let mut keys = HashMap::new();
        for &(household, person) in &index {
            if keys.insert((household, person), ()).is_some() {
                return Err(SampleError::DuplicateKey { household, person });
            }
        }

        let mut households: Vec<HouseholdSpan> = Vec::new();
        let mut household_lookup = HashMap::new();
        for (row, &(household, _)) in index.iter().enumerate() {
            match households.last_mut() {
                Some(span) if span.id == household => span.len += 1,
                _ => {
                    if household_lookup.insert(household, households.len()).is_some() {
                        return Err(SampleError::SplitHousehold(household));
                    }
                    households.push(HouseholdSpan { id: household, start: row, len: 1 });
                }
            }
        }

        Ok(ReferenceSample { index, columns, households, household_lookup })
    }

    pub fn n_persons(&self) -> usize {
        self.index.len()
    }

    pub fn n_households(&self) -> usize {
        self.households.len()
    }

    /// Households in row order.
    pub fn households(&self) -> &[HouseholdSpan] {
        &self.households
    }

    pub fn household_span(&self, sample_id: u64) -> Option<&HouseholdSpan> {
        self.household_lookup.get(&sample_id).map(|&i| &self.households[i])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Per-person values of a column, in row order.
    pub fn column(&self, name: &str) -> Option<&[Category]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    /// The (household id, person id) key of a row.
    pub fn key(&self, row: usize) -> (u64, u64) {
        self.index[row]
    }

    /// Whether a column is constant within every household.
    pub fn is_household_level(&self, name: &str) -> bool {
        match self.column(name) {
            Some(values) => self.households.iter().all(|span| {
                let first = values[span.start];
                values[span.rows()].iter().all(|&v| v == first)
            }),
            None => false,
        }
    }

    /// One representative value per household, taken from the first member.
    /// Meaningful for household-level columns only.
    pub fn collapse_column(&self, name: &str) -> Option<Vec<Category>> {
        let values = self.column(name)?;
        Some(self.households.iter().map(|span| values[span.start]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sample() -> ReferenceSample {
        let index = vec![(1, 1), (1, 2), (2, 1), (3, 1), (3, 2), (3, 3)];
        let mut columns = BTreeMap::new();
        columns.insert(
            "hhtype".to_string(),
            vec![Category(0), Category(0), Category(1), Category(2), Category(2), Category(2)],
        );
        columns.insert(
            "econ".to_string(),
            vec![Category(1), Category(2), Category(1), Category(3), Category(1), Category(2)],
        );
        ReferenceSample::new(index, columns).unwrap()
    }

    #[test]
    fn test_spans() {
        let sample = make_sample();
        assert_eq!(sample.n_persons(), 6);
        assert_eq!(sample.n_households(), 3);
        let spans = sample.households();
        assert_eq!(spans[0], HouseholdSpan { id: 1, start: 0, len: 2 });
        assert_eq!(spans[2], HouseholdSpan { id: 3, start: 3, len: 3 });
        assert_eq!(sample.household_span(2).unwrap().len, 1);
        assert!(sample.household_span(99).is_none());
    }

    #[test]
    fn test_household_level_detection() {
        let sample = make_sample();
        assert!(sample.is_household_level("hhtype"));
        assert!(!sample.is_household_level("econ"));
        assert_eq!(
            sample.collapse_column("hhtype").unwrap(),
            vec![Category(0), Category(1), Category(2)]
        );
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let index = vec![(1, 1), (1, 1)];
        let columns = BTreeMap::new();
        match ReferenceSample::new(index, columns) {
            Err(SampleError::DuplicateKey { household: 1, person: 1 }) => {}
            other => panic!("expected duplicate key error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_rejects_split_household() {
        let index = vec![(1, 1), (2, 1), (1, 2)];
        let columns = BTreeMap::new();
        assert!(matches!(
            ReferenceSample::new(index, columns),
            Err(SampleError::SplitHousehold(1))
        ));
    }

    #[test]
    fn test_rejects_ragged_column() {
        let index = vec![(1, 1), (1, 2)];
        let mut columns = BTreeMap::new();
        columns.insert("a".to_string(), vec![Category(0)]);
        assert!(matches!(
            ReferenceSample::new(index, columns),
            Err(SampleError::ColumnLength { .. })
        ));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            ReferenceSample::new(Vec::new(), BTreeMap::new()),
            Err(SampleError::Empty)
        ));
    }
}
