//! Demo binary: synthesize a small fictional study area end to end.
//!
//! Builds an in-memory reference sample and per-region census controls,
//! builds occupancy chains from generated diaries, fits household weights,
//! samples the population, and previews one citizen's simulated day.
//! Real studies feed the library from external ingestion stages instead.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use micropop::config::SynthesisConfig;
use micropop::controls::Controls;
use micropop::markov::{ChainRow, DayType, DiaryPanel, MINUTES_PER_DAY};
use micropop::person::Person;
use micropop::pipeline::{
    build_cluster_chains, fit_regions, synthesize_regions, ClusterDiaries, RegionControls,
};
use micropop::sample::ReferenceSample;
use micropop::synthpop::derive_person_traits;
use micropop::types::{
    Activity, AgeGroup, Category, ClusterId, EconomicActivity, HouseholdType, Region,
};

#[derive(Parser, Debug)]
#[command(name = "micropop")]
#[command(about = "Synthesize a census-consistent micro-population with occupancy chains")]
struct Args {
    /// Master random seed
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of regions in the fictional study area
    #[arg(short, long, default_value = "4")]
    regions: usize,

    /// Households per region
    #[arg(long, default_value = "250")]
    households: u64,

    /// Markov chain time step in minutes (must evenly divide 24h)
    #[arg(long, default_value = "60")]
    step_minutes: u32,

    /// Occupancy preview steps for the first citizen (0 to skip)
    #[arg(long, default_value = "24")]
    preview_steps: u32,

    /// Write all cluster chain tables to a JSON file
    #[arg(long)]
    chains_out: Option<String>,
}

// Economic activity doubles as the clustering feature.
const ECON_WORKING: EconomicActivity = EconomicActivity::EmployeeFullTime;
const ECON_INACTIVE: EconomicActivity = EconomicActivity::Retired;
const ECON_CHILD: EconomicActivity = EconomicActivity::Below16;

const DIARISTS_PER_CLUSTER: usize = 16;

fn econ_cluster(activity: EconomicActivity) -> ClusterId {
    ClusterId(activity as u64)
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = SynthesisConfig {
        time_step_minutes: args.step_minutes,
        master_seed: args.seed,
        ..Default::default()
    };
    // A Monday, so the preview starts at a weekday boundary.
    let start_time = NaiveDate::from_ymd_opt(2017, 1, 2)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or("invalid start date")?;

    let sample = make_reference_sample()?;
    eprintln!(
        "Reference sample: {} households, {} persons",
        sample.n_households(),
        sample.n_persons()
    );

    let clusters = cluster_ids(&sample)?;
    let diaries: Vec<ClusterDiaries> = clusters
        .iter()
        .map(|&cluster| make_cluster_diaries(cluster, args.step_minutes, args.seed))
        .collect::<Result<_, _>>()?;
    let chains = build_cluster_chains(&diaries, config.time_step_minutes)?;

    let traits = derive_person_traits(
        &sample,
        &["econ"],
        &chains,
        start_time,
        "age",
        &config.metabolic_rates,
    )?;

    let regions = make_regions(args.regions, args.households as f64);
    let weights = fit_regions(&sample, &regions, &config.fit())?;
    let (households, citizens) =
        synthesize_regions(&sample, &regions, &weights, &traits, config.master_seed)?;

    println!(
        "Synthesized {} households and {} citizens across {} regions.",
        households.len(),
        citizens.len(),
        regions.len()
    );
    println!(
        "Average household size: {:.2}",
        citizens.len() as f64 / households.len() as f64
    );
    for controls in &regions {
        let in_region = households.iter().filter(|h| h.region == controls.region).count();
        println!("  {}: {} households", controls.region, in_region);
    }

    if args.preview_steps > 0 {
        if let Some(citizen) = citizens.first() {
            let chain = chains
                .get(&citizen.cluster)
                .ok_or("first citizen has no chain")?;
            let mut person = Person::seeded(
                Arc::new(chain.clone()),
                citizen.initial_activity,
                start_time,
                config.time_step_minutes,
                citizen.random_seed,
            )?;
            println!(
                "Occupancy preview, citizen of household {} (cluster {}):",
                citizen.household, citizen.cluster
            );
            preview(&mut person, args.preview_steps);
        }
    }

    if let Some(path) = args.chains_out {
        let tables: BTreeMap<String, Vec<ChainRow>> = chains
            .iter()
            .map(|(cluster, chain)| (format!("markov{}", cluster.0), chain.to_table()))
            .collect();
        serde_json::to_writer_pretty(File::create(&path)?, &tables)?;
        println!("Wrote {} chain tables to {}", tables.len(), path);
    }
    Ok(())
}

fn preview(person: &mut Person<ChaCha8Rng>, steps: u32) {
    for _ in 0..steps {
        let time = person.current_time();
        person.step();
        println!(
            "  {} {} -> {}",
            time.format("%a %H:%M"),
            DayType::of(time),
            person.activity()
        );
    }
}

/// A fixed survey-like reference sample: singles, couples, and families
/// with children, with household type, economic position, and age band
/// columns.
fn make_reference_sample() -> Result<ReferenceSample, Box<dyn std::error::Error>> {
    let mut index = Vec::new();
    let mut hhtype = Vec::new();
    let mut econ = Vec::new();
    let mut age = Vec::new();
    let mut household_id = 0u64;

    let mut push_person =
        |household: u64, person: u64, t: HouseholdType, e: EconomicActivity, a: AgeGroup| {
            index.push((household, person));
            hhtype.push(Category::from(t));
            econ.push(Category::from(e));
            age.push(Category::from(a));
        };

    // Twelve singles, alternating working and inactive.
    for i in 0..12 {
        household_id += 1;
        let e = if i % 2 == 0 { ECON_WORKING } else { ECON_INACTIVE };
        let a = if i % 3 == 0 { AgeGroup::Age65To74 } else { AgeGroup::Age30To44 };
        push_person(household_id, 1, HouseholdType::OnePersonHousehold, e, a);
    }
    // Sixteen couples; one partner always works.
    for i in 0..16 {
        household_id += 1;
        let couple = HouseholdType::CoupleWithoutDependentChildren;
        push_person(household_id, 1, couple, ECON_WORKING, AgeGroup::Age30To44);
        let e = if i % 2 == 0 { ECON_WORKING } else { ECON_INACTIVE };
        push_person(household_id, 2, couple, e, AgeGroup::Age30To44);
    }
    // Twelve families with one or two children.
    for i in 0..12 {
        household_id += 1;
        let family = HouseholdType::CoupleWithDependentChildren;
        push_person(household_id, 1, family, ECON_WORKING, AgeGroup::Age30To44);
        let e = if i % 3 == 0 { ECON_WORKING } else { ECON_INACTIVE };
        push_person(household_id, 2, family, e, AgeGroup::Age30To44);
        push_person(household_id, 3, family, ECON_CHILD, AgeGroup::Age10To14);
        if i % 2 == 0 {
            push_person(household_id, 4, family, ECON_CHILD, AgeGroup::Age5To7);
        }
    }

    let mut columns = BTreeMap::new();
    columns.insert("hhtype".to_string(), hhtype);
    columns.insert("econ".to_string(), econ);
    columns.insert("age".to_string(), age);
    Ok(ReferenceSample::new(index, columns)?)
}

fn cluster_ids(sample: &ReferenceSample) -> Result<BTreeSet<ClusterId>, Box<dyn std::error::Error>> {
    let assignments = micropop::synthpop::cluster_assignments(sample, &["econ"])?;
    Ok(assignments.into_iter().collect())
}

/// Census controls for a fictional region; shares shift slightly per
/// region so the fitted weights differ between them.
fn make_regions(count: usize, households: f64) -> Vec<RegionControls> {
    (0..count)
        .map(|i| {
            let shift = (i % 3) as f64 * 0.04;
            let singles = (households * (0.28 + shift)).round();
            let couples = (households * (0.40 - shift)).round();
            let families = households - singles - couples;
            let persons = singles + couples * 2.0 + families * 3.5;
            let working = (persons * (0.42 + shift)).round();
            let children = (persons * 0.24).round();
            let inactive = persons - working - children;

            let household_controls = Controls::from_totals(vec![
                ("hhtype", Category::from(HouseholdType::OnePersonHousehold), singles),
                ("hhtype", Category::from(HouseholdType::CoupleWithoutDependentChildren), couples),
                ("hhtype", Category::from(HouseholdType::CoupleWithDependentChildren), families),
            ]);
            let individual_controls = Controls::from_totals(vec![
                ("econ", Category::from(ECON_WORKING), working),
                ("econ", Category::from(ECON_INACTIVE), inactive),
                ("econ", Category::from(ECON_CHILD), children),
            ]);
            RegionControls {
                region: Region::new(format!("E{:05}", i + 1)),
                households: household_controls,
                individuals: individual_controls,
            }
        })
        .collect()
}

/// Typical occupancy of a cluster member at the given hour.
fn base_state(cluster: ClusterId, day: DayType, hour: u32) -> Activity {
    let working = cluster == econ_cluster(ECON_WORKING);
    let child = cluster == econ_cluster(ECON_CHILD);
    match day {
        DayType::Weekday if working => match hour {
            0..=6 | 23 => Activity::SleepAtHome,
            8..=17 => Activity::NotAtHome,
            _ => Activity::Home,
        },
        DayType::Weekday if child => match hour {
            0..=6 | 21..=23 => Activity::SleepAtHome,
            9..=14 => Activity::NotAtHome,
            _ => Activity::Home,
        },
        DayType::Weekday => match hour {
            0..=7 | 22..=23 => Activity::SleepAtHome,
            _ => Activity::Home,
        },
        DayType::Weekend => match hour {
            0..=7 | 22..=23 => Activity::SleepAtHome,
            _ => Activity::Home,
        },
    }
}

/// Generated diaries for one cluster: the base pattern with daytime noise.
fn make_cluster_diaries(
    cluster: ClusterId,
    step_minutes: u32,
    seed: u64,
) -> Result<ClusterDiaries, Box<dyn std::error::Error>> {
    let slots = (MINUTES_PER_DAY / step_minutes) as usize;
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ (cluster.0.wrapping_mul(0x9E37_79B9)));

    let mut make_panel = |day: DayType| -> Result<DiaryPanel, Box<dyn std::error::Error>> {
        let columns = (0..DIARISTS_PER_CLUSTER)
            .map(|_| {
                (0..slots)
                    .map(|slot| {
                        let hour = slot as u32 * step_minutes / 60;
                        let state = base_state(cluster, day, hour);
                        if (9..=20).contains(&hour) && rng.gen_bool(0.15) {
                            match state {
                                Activity::Home => Activity::NotAtHome,
                                Activity::NotAtHome => Activity::Home,
                                other => other,
                            }
                        } else {
                            state
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(DiaryPanel::from_columns(columns)?)
    };

    Ok(ClusterDiaries {
        cluster,
        weekday: make_panel(DayType::Weekday)?,
        weekend: make_panel(DayType::Weekend)?,
    })
}
