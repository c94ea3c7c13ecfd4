//! Synthetic population sampling.
//!
//! Consumes fitted household weights to draw a census-consistent number of
//! households per region, expands each sampled household into its members,
//! and derives the per-person fields the occupancy simulation needs.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};

use crate::hipf::HouseholdWeights;
use crate::markov::WeekMarkovChain;
use crate::sample::ReferenceSample;
use crate::types::{feature_id, Activity, AgeGroup, Category, ClusterId, HouseholdId, Region};

/// Base of every citizen's derived random seed.
pub const BASE_SEED: u64 = 123_456_789;
/// Upper bound on household size used to spread citizen seeds; chosen far
/// above any real household so seeds never collide.
pub const MAX_HOUSEHOLD_SIZE: u64 = 70;

/// The cumulative sampling distribution must reach 1 within this tolerance.
const CUMULATIVE_TOLERANCE: f64 = 0.001;

/// A synthesized household. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    /// Synthetic id from the caller-supplied sequence.
    pub id: HouseholdId,
    /// Household id in the reference sample this one was drawn from; a
    /// back-reference, not ownership.
    pub sample_id: u64,
    pub region: Region,
}

/// A synthesized individual. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citizen {
    pub household: HouseholdId,
    pub cluster: ClusterId,
    pub initial_activity: Activity,
    pub active_metabolic_rate: f64,
    pub passive_metabolic_rate: f64,
    /// Seed of the citizen's private random stream; reproducible given
    /// the household id and member order.
    pub random_seed: u64,
}

/// Per-person fields precomputed on the reference sample, copied into
/// every citizen sampled from that row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonTraits {
    pub cluster: ClusterId,
    pub initial_activity: Activity,
    pub active_metabolic_rate: f64,
    pub passive_metabolic_rate: f64,
}

/// Metabolic heat gain parameters; children get a reduced share.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MetabolicRates {
    pub active: f64,
    pub passive: f64,
    pub child_ratio: f64,
}

impl Default for MetabolicRates {
    fn default() -> Self {
        // Watts of sensible heat gain, ISO 7730 style magnitudes.
        Self { active: 140.0, passive: 70.0, child_ratio: 0.75 }
    }
}

/// Sampler precondition violations; all fatal.
#[derive(Debug)]
pub enum SamplingError {
    LengthMismatch { draws: usize, ids: usize },
    InvalidWeights(String),
    UnknownSampleHousehold(u64),
    UnknownColumn(String),
    MissingChain(ClusterId),
}

impl fmt::Display for SamplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingError::LengthMismatch { draws, ids } => {
                write!(f, "{} random draws for {} household ids", draws, ids)
            }
            SamplingError::InvalidWeights(msg) => write!(f, "invalid weights: {}", msg),
            SamplingError::UnknownSampleHousehold(id) => {
                write!(f, "sample household {} not present in the reference sample", id)
            }
            SamplingError::UnknownColumn(name) => {
                write!(f, "column '{}' not present in the reference sample", name)
            }
            SamplingError::MissingChain(cluster) => {
                write!(f, "no markov chain built for cluster {}", cluster)
            }
        }
    }
}

impl std::error::Error for SamplingError {}

/// Draw households from the reference sample with probability proportional
/// to their fitted weights (inverse-CDF sampling).
///
/// Pure in its inputs: the same weights, draws, and ids always produce the
/// same households. One uniform draw in [0, 1) is consumed per output
/// household.
pub fn sample_households(
    region: &Region,
    sample: &ReferenceSample,
    weights: &HouseholdWeights,
    random_draws: &[f64],
    household_ids: &[HouseholdId],
) -> Result<Vec<Household>, SamplingError> {
    if random_draws.len() != household_ids.len() {
        return Err(SamplingError::LengthMismatch {
            draws: random_draws.len(),
            ids: household_ids.len(),
        });
    }

    let total = weights.sum();
    let mut cumulative = Vec::with_capacity(weights.len());
    let mut ids = Vec::with_capacity(weights.len());
    let mut running = 0.0;
    for (id, weight) in weights.iter() {
        running += weight / total;
        cumulative.push(running);
        ids.push(id);
    }
    match cumulative.last() {
        Some(&last) if (last - 1.0).abs() <= CUMULATIVE_TOLERANCE => {}
        _ => {
            return Err(SamplingError::InvalidWeights(
                "cumulative weight distribution does not reach 1".to_string(),
            ))
        }
    }

    let mut households = Vec::with_capacity(household_ids.len());
    for (&id, &draw) in household_ids.iter().zip(random_draws) {
        // First sample household whose cumulative normalized weight
        // reaches the draw.
        let position = cumulative.partition_point(|&c| c < draw);
        let position = position.min(ids.len() - 1);
        let sample_id = ids[position];
        if sample.household_span(sample_id).is_none() {
            return Err(SamplingError::UnknownSampleHousehold(sample_id));
        }
        households.push(Household { id, sample_id, region: region.clone() });
    }
    Ok(households)
}

/// Expand sampled households into citizens, one per member row of the
/// sampled reference household.
pub fn sample_citizens(
    households: &[Household],
    sample: &ReferenceSample,
    traits: &[PersonTraits],
) -> Result<Vec<Citizen>, SamplingError> {
    if traits.len() != sample.n_persons() {
        return Err(SamplingError::LengthMismatch {
            draws: traits.len(),
            ids: sample.n_persons(),
        });
    }
    let mut citizens = Vec::new();
    for household in households {
        let span = sample
            .household_span(household.sample_id)
            .ok_or(SamplingError::UnknownSampleHousehold(household.sample_id))?;
        for (occupant, row) in span.rows().enumerate() {
            let person = &traits[row];
            citizens.push(Citizen {
                household: household.id,
                cluster: person.cluster,
                initial_activity: person.initial_activity,
                active_metabolic_rate: person.active_metabolic_rate,
                passive_metabolic_rate: person.passive_metabolic_rate,
                random_seed: citizen_random_seed(household.id, occupant as u64),
            });
        }
    }
    Ok(citizens)
}

/// Deterministic per-citizen seed: reproducible given fixed household ids
/// and household composition order.
pub fn citizen_random_seed(household: HouseholdId, occupant_index: u64) -> u64 {
    BASE_SEED + household.0 * MAX_HOUSEHOLD_SIZE + occupant_index
}

/// Derive the per-person traits the sampler copies into citizens.
///
/// Every person row is assigned its demographic cluster (pairing-function
/// fold of the feature columns), the first valid state of that cluster's
/// chain at simulation start as initial activity, and metabolic rates
/// scaled down for children.
pub fn derive_person_traits(
    sample: &ReferenceSample,
    feature_columns: &[&str],
    chains: &HashMap<ClusterId, WeekMarkovChain>,
    start_time: NaiveDateTime,
    age_column: &str,
    rates: &MetabolicRates,
) -> Result<Vec<PersonTraits>, SamplingError> {
    let clusters = cluster_assignments(sample, feature_columns)?;
    let ages = sample
        .column(age_column)
        .ok_or_else(|| SamplingError::UnknownColumn(age_column.to_string()))?;
    let adult_threshold = Category::from(AgeGroup::Age18To19);

    let mut traits = Vec::with_capacity(sample.n_persons());
    for (row, &cluster) in clusters.iter().enumerate() {
        let chain = chains.get(&cluster).ok_or(SamplingError::MissingChain(cluster))?;
        let initial_activity = chain
            .valid_states(start_time)
            .first()
            .copied()
            .ok_or(SamplingError::MissingChain(cluster))?;
        let child = ages[row] < adult_threshold;
        let ratio = if child { rates.child_ratio } else { 1.0 };
        traits.push(PersonTraits {
            cluster,
            initial_activity,
            active_metabolic_rate: rates.active * ratio,
            passive_metabolic_rate: rates.passive * ratio,
        });
    }
    Ok(traits)
}

/// The demographic cluster of every person row: the feature columns'
/// category codes folded into one id.
pub fn cluster_assignments(
    sample: &ReferenceSample,
    feature_columns: &[&str],
) -> Result<Vec<ClusterId>, SamplingError> {
    let columns: Vec<&[Category]> = feature_columns
        .iter()
        .map(|&name| {
            sample
                .column(name)
                .ok_or_else(|| SamplingError::UnknownColumn(name.to_string()))
        })
        .collect::<Result<_, _>>()?;
    Ok((0..sample.n_persons())
        .map(|row| {
            let codes: Vec<Category> = columns.iter().map(|column| column[row]).collect();
            feature_id(&codes)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::hipf::{fit_hipf, FitConfig};
    use crate::controls::Controls;

    fn make_sample() -> ReferenceSample {
        let index = vec![(10, 1), (10, 2), (20, 1), (30, 1), (30, 2)];
        let mut columns = BTreeMap::new();
        columns.insert(
            "kind".to_string(),
            vec![Category(0), Category(0), Category(1), Category(1), Category(1)],
        );
        ReferenceSample::new(index, columns).unwrap()
    }

    fn make_weights(values: &[(u64, f64)]) -> HouseholdWeights {
        // Integration flows get these from the fitting entry point; the
        // raw constructor keeps fixtures small.
        HouseholdWeights::new(
            values.iter().map(|&(id, _)| id).collect(),
            values.iter().map(|&(_, w)| w).collect(),
        )
    }

    fn make_traits(n: usize) -> Vec<PersonTraits> {
        (0..n)
            .map(|i| PersonTraits {
                cluster: ClusterId(i as u64),
                initial_activity: Activity::Home,
                active_metabolic_rate: 140.0,
                passive_metabolic_rate: 70.0,
            })
            .collect()
    }

    #[test]
    fn test_inverse_cdf_selection() {
        let region = Region::new("E001");
        let sample = make_sample();
        let weights = make_weights(&[(10, 1.0), (20, 3.0), (30, 0.0)]);
        // Normalized cumulative distribution: 0.25, 1.0, 1.0.
        let draws = [0.2, 0.25, 0.26, 0.99];
        let ids: Vec<HouseholdId> = (1..=4).map(HouseholdId).collect();
        let households = sample_households(&region, &sample, &weights, &draws, &ids).unwrap();
        let sampled: Vec<u64> = households.iter().map(|h| h.sample_id).collect();
        assert_eq!(sampled, vec![10, 10, 20, 20]);
        assert_eq!(households[0].id, HouseholdId(1));
        assert_eq!(households[0].region, region);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let region = Region::new("E001");
        let sample = make_sample();
        let weights = make_weights(&[(10, 0.5), (20, 1.5), (30, 1.0)]);
        let draws = [0.1, 0.6, 0.95, 0.3];
        let ids: Vec<HouseholdId> = (1..=4).map(HouseholdId).collect();
        let first = sample_households(&region, &sample, &weights, &draws, &ids).unwrap();
        let second = sample_households(&region, &sample, &weights, &draws, &ids).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_length_mismatch_fails() {
        let region = Region::new("E001");
        let sample = make_sample();
        let weights = make_weights(&[(10, 1.0), (20, 1.0), (30, 1.0)]);
        let result =
            sample_households(&region, &sample, &weights, &[0.5], &[HouseholdId(1), HouseholdId(2)]);
        assert!(matches!(result, Err(SamplingError::LengthMismatch { draws: 1, ids: 2 })));
    }

    #[test]
    fn test_zero_weights_fail() {
        let region = Region::new("E001");
        let sample = make_sample();
        let weights = make_weights(&[(10, 0.0), (20, 0.0), (30, 0.0)]);
        let result = sample_households(&region, &sample, &weights, &[0.5], &[HouseholdId(1)]);
        assert!(matches!(result, Err(SamplingError::InvalidWeights(_))));
    }

    #[test]
    fn test_citizen_expansion_and_seeds() {
        let sample = make_sample();
        let households = vec![
            Household { id: HouseholdId(5), sample_id: 10, region: Region::new("E001") },
            Household { id: HouseholdId(6), sample_id: 20, region: Region::new("E001") },
        ];
        let traits = make_traits(sample.n_persons());
        let citizens = sample_citizens(&households, &sample, &traits).unwrap();
        assert_eq!(citizens.len(), 3);

        // Household 5 expands to the two members of sample household 10.
        assert_eq!(citizens[0].household, HouseholdId(5));
        assert_eq!(citizens[0].cluster, ClusterId(0));
        assert_eq!(citizens[0].random_seed, BASE_SEED + 5 * MAX_HOUSEHOLD_SIZE);
        assert_eq!(citizens[1].random_seed, BASE_SEED + 5 * MAX_HOUSEHOLD_SIZE + 1);
        assert_eq!(citizens[2].household, HouseholdId(6));
        assert_eq!(citizens[2].cluster, ClusterId(2));
        assert_eq!(citizens[2].random_seed, BASE_SEED + 6 * MAX_HOUSEHOLD_SIZE);
    }

    #[test]
    fn test_citizen_traits_length_checked() {
        let sample = make_sample();
        let households =
            vec![Household { id: HouseholdId(1), sample_id: 10, region: Region::new("E001") }];
        let result = sample_citizens(&households, &sample, &make_traits(2));
        assert!(matches!(result, Err(SamplingError::LengthMismatch { .. })));
    }

    #[test]
    fn test_cluster_assignments() {
        let sample = make_sample();
        let clusters = cluster_assignments(&sample, &["kind"]).unwrap();
        assert_eq!(
            clusters,
            vec![ClusterId(0), ClusterId(0), ClusterId(1), ClusterId(1), ClusterId(1)]
        );
        assert!(matches!(
            cluster_assignments(&sample, &["nope"]),
            Err(SamplingError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_fitted_weights_drive_sampling() {
        // End to end: fit a small sample, then sample households from the
        // fitted weights.
        let sample = make_sample();
        let controls_households = Controls::from_totals(vec![
            ("kind", Category(0), 6.0),
            ("kind", Category(1), 4.0),
        ]);
        let controls_individuals = Controls::from_totals(vec![
            ("kind", Category(0), 8.0),
            ("kind", Category(1), 7.0),
        ]);
        let weights = fit_hipf(
            &sample,
            &controls_households,
            &controls_individuals,
            &FitConfig::default(),
        )
        .unwrap();
        assert!((weights.sum() - 10.0).abs() < 0.1);

        let draws: Vec<f64> = (0..10).map(|i| i as f64 / 10.0).collect();
        let ids: Vec<HouseholdId> = (0..10).map(HouseholdId).collect();
        let households =
            sample_households(&Region::new("E001"), &sample, &weights, &draws, &ids).unwrap();
        assert_eq!(households.len(), 10);
    }
}
