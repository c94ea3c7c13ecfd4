//! Parallel orchestration across regions and clusters.
//!
//! Regions are independent: each fitting and sampling task gets the shared
//! read-only reference sample plus its own controls, and results are keyed
//! by region. Cluster chain building fans out the same way. Any task error
//! aborts the whole batch; there are no partial results.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::controls::Controls;
use crate::hipf::{fit_hipf, FitConfig, HipfError, HouseholdWeights};
use crate::markov::{ChainError, DiaryPanel, WeekMarkovChain};
use crate::sample::ReferenceSample;
use crate::synthpop::{
    sample_citizens, sample_households, Citizen, Household, PersonTraits, SamplingError,
};
use crate::types::{ClusterId, HouseholdId, Region};

/// Weight sums may drift this far from the household grand total before
/// the batch is aborted.
const WEIGHT_SUM_TOLERANCE: f64 = 0.1;

/// Control totals of one region, both levels.
#[derive(Clone, Debug)]
pub struct RegionControls {
    pub region: Region,
    pub households: Controls,
    pub individuals: Controls,
}

/// Diary panels of one demographic cluster.
#[derive(Clone, Debug)]
pub struct ClusterDiaries {
    pub cluster: ClusterId,
    pub weekday: DiaryPanel,
    pub weekend: DiaryPanel,
}

/// A failed task; carries the region or cluster it belongs to.
#[derive(Debug)]
pub enum PipelineError {
    Fit { region: Region, source: HipfError },
    WeightSum { region: Region, expected: f64, actual: f64 },
    MissingWeights(Region),
    Sampling { region: Region, source: SamplingError },
    Chain { cluster: ClusterId, source: ChainError },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Fit { region, source } => {
                write!(f, "fitting region {}: {}", region, source)
            }
            PipelineError::WeightSum { region, expected, actual } => write!(
                f,
                "region {}: fitted weights sum to {:.3}, controls require {:.3}",
                region, actual, expected
            ),
            PipelineError::MissingWeights(region) => {
                write!(f, "no fitted weights for region {}", region)
            }
            PipelineError::Sampling { region, source } => {
                write!(f, "sampling region {}: {}", region, source)
            }
            PipelineError::Chain { cluster, source } => {
                write!(f, "building chain for cluster {}: {}", cluster, source)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Fit household weights for every region in parallel.
///
/// Each region's returned weights are checked against the documented
/// postcondition (sum matches the household grand total, all finite)
/// before the batch is accepted.
pub fn fit_regions(
    sample: &ReferenceSample,
    regions: &[RegionControls],
    config: &FitConfig,
) -> Result<HashMap<Region, HouseholdWeights>, PipelineError> {
    eprintln!("  Fitting {} regions...", regions.len());
    regions
        .par_iter()
        .map(|controls| {
            let weights = fit_hipf(sample, &controls.households, &controls.individuals, config)
                .map_err(|source| PipelineError::Fit { region: controls.region.clone(), source })?;
            let expected = controls.households.grand_total();
            let actual = weights.sum();
            if (actual - expected).abs() >= WEIGHT_SUM_TOLERANCE || !weights.all_finite() {
                return Err(PipelineError::WeightSum {
                    region: controls.region.clone(),
                    expected,
                    actual,
                });
            }
            Ok((controls.region.clone(), weights))
        })
        .collect()
}

/// Build the week chain of every demographic cluster in parallel.
pub fn build_cluster_chains(
    clusters: &[ClusterDiaries],
    time_step_minutes: u32,
) -> Result<HashMap<ClusterId, WeekMarkovChain>, PipelineError> {
    eprintln!("  Building markov chains for {} clusters...", clusters.len());
    clusters
        .par_iter()
        .map(|diaries| {
            WeekMarkovChain::build(&diaries.weekday, &diaries.weekend, time_step_minutes)
                .map(|chain| (diaries.cluster, chain))
                .map_err(|source| PipelineError::Chain { cluster: diaries.cluster, source })
        })
        .collect()
}

/// Sample every region's households and citizens in parallel.
///
/// Household ids and uniform draws are allocated deterministically from
/// the master seed before fanning out, so results do not depend on
/// scheduling. Ids are one contiguous sequence across regions, in the
/// order the regions were given; each region draws its census-required
/// number of households (the household grand total).
pub fn synthesize_regions(
    sample: &ReferenceSample,
    regions: &[RegionControls],
    weights: &HashMap<Region, HouseholdWeights>,
    traits: &[PersonTraits],
    master_seed: u64,
) -> Result<(Vec<Household>, Vec<Citizen>), PipelineError> {
    struct Task<'a> {
        controls: &'a RegionControls,
        household_ids: Vec<HouseholdId>,
        draws: Vec<f64>,
    }

    let mut tasks = Vec::with_capacity(regions.len());
    let mut next_id: u64 = 1;
    for (index, controls) in regions.iter().enumerate() {
        let count = controls.households.grand_total().round() as u64;
        let household_ids = (next_id..next_id + count).map(HouseholdId).collect();
        next_id += count;
        let mut rng = ChaCha8Rng::seed_from_u64(master_seed.wrapping_add(index as u64));
        let draws = (0..count).map(|_| rng.gen::<f64>()).collect();
        tasks.push(Task { controls, household_ids, draws });
    }

    eprintln!("  Sampling {} households across {} regions...", next_id - 1, regions.len());
    let per_region: Vec<(Vec<Household>, Vec<Citizen>)> = tasks
        .par_iter()
        .map(|task| {
            let region = &task.controls.region;
            let region_weights = weights
                .get(region)
                .ok_or_else(|| PipelineError::MissingWeights(region.clone()))?;
            let households = sample_households(
                region,
                sample,
                region_weights,
                &task.draws,
                &task.household_ids,
            )
            .map_err(|source| PipelineError::Sampling { region: region.clone(), source })?;
            let citizens = sample_citizens(&households, sample, traits)
                .map_err(|source| PipelineError::Sampling { region: region.clone(), source })?;
            Ok((households, citizens))
        })
        .collect::<Result<_, PipelineError>>()?;

    let mut households = Vec::new();
    let mut citizens = Vec::new();
    for (mut region_households, mut region_citizens) in per_region {
        households.append(&mut region_households);
        citizens.append(&mut region_citizens);
    }
    Ok((households, citizens))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{Activity, Category};

    fn make_sample() -> ReferenceSample {
        let index = vec![(1, 1), (1, 2), (2, 1), (3, 1), (3, 2), (3, 3)];
        let mut columns = BTreeMap::new();
        columns.insert(
            "hhkind".to_string(),
            vec![Category(0), Category(0), Category(1), Category(0), Category(0), Category(0)],
        );
        columns.insert(
            "work".to_string(),
            vec![Category(1), Category(0), Category(0), Category(1), Category(0), Category(0)],
        );
        ReferenceSample::new(index, columns).unwrap()
    }

    fn make_region(code: &str, households: f64) -> RegionControls {
        let persons = households * 2.0;
        RegionControls {
            region: Region::new(code),
            households: Controls::from_totals(vec![
                ("hhkind", Category(0), households * 0.7),
                ("hhkind", Category(1), households * 0.3),
            ]),
            individuals: Controls::from_totals(vec![
                ("work", Category(0), persons * 0.6),
                ("work", Category(1), persons * 0.4),
            ]),
        }
    }

    fn make_traits(n: usize) -> Vec<PersonTraits> {
        (0..n)
            .map(|_| PersonTraits {
                cluster: ClusterId(0),
                initial_activity: Activity::Home,
                active_metabolic_rate: 140.0,
                passive_metabolic_rate: 70.0,
            })
            .collect()
    }

    #[test]
    fn test_fit_regions_keyed_by_region() {
        let sample = make_sample();
        let regions = vec![make_region("E001", 100.0), make_region("E002", 50.0)];
        let weights = fit_regions(&sample, &regions, &FitConfig::default()).unwrap();
        assert_eq!(weights.len(), 2);
        assert!((weights[&Region::new("E001")].sum() - 100.0).abs() < 0.1);
        assert!((weights[&Region::new("E002")].sum() - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_fit_regions_fails_fast() {
        let sample = make_sample();
        let mut bad = make_region("E002", 50.0);
        bad.individuals = Controls::new();
        let regions = vec![make_region("E001", 100.0), bad];
        let result = fit_regions(&sample, &regions, &FitConfig::default());
        match result {
            Err(PipelineError::Fit { region, source: HipfError::InvalidControls(_) }) => {
                assert_eq!(region, Region::new("E002"));
            }
            other => panic!("expected fit error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_synthesize_regions_is_deterministic() {
        let sample = make_sample();
        let regions = vec![make_region("E001", 40.0), make_region("E002", 30.0)];
        let weights = fit_regions(&sample, &regions, &FitConfig::default()).unwrap();
        let traits = make_traits(sample.n_persons());

        let (households_a, citizens_a) =
            synthesize_regions(&sample, &regions, &weights, &traits, 99).unwrap();
        let (households_b, citizens_b) =
            synthesize_regions(&sample, &regions, &weights, &traits, 99).unwrap();
        assert_eq!(households_a, households_b);
        assert_eq!(citizens_a, citizens_b);

        assert_eq!(households_a.len(), 70);
        // Ids form one sequence across regions, in input order.
        assert_eq!(households_a[0].id, HouseholdId(1));
        assert_eq!(households_a[39].id, HouseholdId(40));
        assert_eq!(households_a[40].id, HouseholdId(41));
        assert_eq!(households_a[40].region, Region::new("E002"));
        assert!(!citizens_a.is_empty());
    }

    #[test]
    fn test_synthesize_regions_requires_weights() {
        let sample = make_sample();
        let regions = vec![make_region("E001", 40.0)];
        let weights = HashMap::new();
        let traits = make_traits(sample.n_persons());
        let result = synthesize_regions(&sample, &regions, &weights, &traits, 1);
        assert!(matches!(result, Err(PipelineError::MissingWeights(_))));
    }

    #[test]
    fn test_build_cluster_chains() {
        use crate::types::Activity::{Home, NotAtHome, SleepAtHome};
        let weekday = DiaryPanel::from_columns(vec![
            vec![SleepAtHome, NotAtHome],
            vec![SleepAtHome, Home],
        ])
        .unwrap();
        let weekend = DiaryPanel::from_columns(vec![
            vec![SleepAtHome, Home],
            vec![Home, Home],
        ])
        .unwrap();
        let clusters = vec![
            ClusterDiaries { cluster: ClusterId(0), weekday: weekday.clone(), weekend: weekend.clone() },
            ClusterDiaries { cluster: ClusterId(1), weekday, weekend },
        ];
        let chains = build_cluster_chains(&clusters, 720).unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[&ClusterId(0)].time_step_minutes(), 720);
    }

    #[test]
    fn test_build_cluster_chains_fails_fast() {
        use crate::types::Activity::Home;
        let complete = DiaryPanel::from_columns(vec![vec![Home, Home]]).unwrap();
        let gappy = DiaryPanel::from_sparse_columns(vec![vec![Some(Home), None]]).unwrap();
        let clusters = vec![
            ClusterDiaries { cluster: ClusterId(0), weekday: complete.clone(), weekend: complete.clone() },
            ClusterDiaries { cluster: ClusterId(1), weekday: gappy, weekend: complete },
        ];
        let result = build_cluster_chains(&clusters, 720);
        match result {
            Err(PipelineError::Chain { cluster, source: ChainError::MissingData(_) }) => {
                assert_eq!(cluster, ClusterId(1));
            }
            other => panic!("expected chain error, got {:?}", other.map(|_| ())),
        }
    }
}
