//! Time-heterogeneous Markov chains of occupancy states.
//!
//! A week chain holds one transition matrix per day type (weekday or
//! weekend) and time-of-day slot. Matrices are estimated from time-use
//! survey diaries, then a repair pass guarantees the chain can always be
//! navigated forward in time: any state reachable at the end of a slot
//! gains a self-loop in the following slot if no outgoing row exists.

use std::fmt;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Serialize, Deserialize};

use crate::types::{Activity, ACTIVITY_COUNT};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Row sums of a repaired chain must hit 1 within this tolerance.
const ROW_SUM_TOLERANCE: f64 = 0.001;

/// Weekday/weekend bucket of a calendar day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }

    pub fn of(time: NaiveDateTime) -> Self {
        DayType::from_weekday(time.weekday())
    }
}

impl fmt::Display for DayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayType::Weekday => write!(f, "weekday"),
            DayType::Weekend => write!(f, "weekend"),
        }
    }
}

/// Errors while building or validating a week chain.
#[derive(Debug)]
pub enum ChainError {
    /// A diary panel contains unfilled gaps; diaries must be pre-cleaned
    /// upstream.
    MissingData(String),
    /// The chain is structurally invalid (bad step size, panel shape, or
    /// failed post-repair validation).
    InvalidChain(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::MissingData(msg) => write!(f, "missing diary data: {}", msg),
            ChainError::InvalidChain(msg) => write!(f, "invalid markov chain: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

// =============================================================================
// DIARY PANEL
// =============================================================================

/// Per-slot activity snapshots of a panel of diarists covering one day.
///
/// Rows are time-of-day slots, columns are individuals. Entries are
/// optional so upstream gaps remain detectable; the builder refuses panels
/// that still contain gaps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiaryPanel {
    slots: usize,
    individuals: usize,
    states: Vec<Option<Activity>>,
}

impl DiaryPanel {
    /// Build a panel from per-individual diaries (one column per diarist).
    pub fn from_columns(columns: Vec<Vec<Activity>>) -> Result<Self, ChainError> {
        Self::from_sparse_columns(
            columns
                .into_iter()
                .map(|c| c.into_iter().map(Some).collect())
                .collect(),
        )
    }

    /// Build a panel from diaries that may contain gaps.
    pub fn from_sparse_columns(columns: Vec<Vec<Option<Activity>>>) -> Result<Self, ChainError> {
        let individuals = columns.len();
        let slots = columns.first().map(|c| c.len()).unwrap_or(0);
        if columns.iter().any(|c| c.len() != slots) {
            return Err(ChainError::InvalidChain(
                "diary columns differ in length".to_string(),
            ));
        }
        let mut states = vec![None; slots * individuals];
        for (column, diary) in columns.iter().enumerate() {
            for (slot, &state) in diary.iter().enumerate() {
                states[slot * individuals + column] = state;
            }
        }
        Ok(DiaryPanel { slots, individuals, states })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn individuals(&self) -> usize {
        self.individuals
    }

    pub fn get(&self, slot: usize, individual: usize) -> Option<Activity> {
        self.states[slot * self.individuals + individual]
    }

    fn has_gaps(&self) -> bool {
        self.states.iter().any(|s| s.is_none())
    }
}

// =============================================================================
// SLOT CHAIN
// =============================================================================

/// Transition matrix of a single (day type, time-of-day slot) pair.
///
/// Rows and columns index `Activity::ALL`. A state with no observed
/// outgoing transition has an all-zero row and is not a start state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotChain {
    probabilities: [[f64; ACTIVITY_COUNT]; ACTIVITY_COUNT],
    observed: [bool; ACTIVITY_COUNT],
}

impl SlotChain {
    fn empty() -> Self {
        SlotChain {
            probabilities: [[0.0; ACTIVITY_COUNT]; ACTIVITY_COUNT],
            observed: [false; ACTIVITY_COUNT],
        }
    }

    /// Estimate empirical probabilities from paired state snapshots.
    fn from_transitions(panel: &DiaryPanel, from_slot: usize, to_slot: usize) -> Self {
        let mut counts = [[0u32; ACTIVITY_COUNT]; ACTIVITY_COUNT];
        for individual in 0..panel.individuals() {
            if let (Some(from), Some(to)) =
                (panel.get(from_slot, individual), panel.get(to_slot, individual))
            {
                counts[from.index()][to.index()] += 1;
            }
        }
        let mut chain = SlotChain::empty();
        for from in 0..ACTIVITY_COUNT {
            let total: u32 = counts[from].iter().sum();
            if total > 0 {
                chain.observed[from] = true;
                for to in 0..ACTIVITY_COUNT {
                    chain.probabilities[from][to] = counts[from][to] as f64 / total as f64;
                }
            }
        }
        chain
    }

    pub fn probability(&self, from: Activity, to: Activity) -> f64 {
        self.probabilities[from.index()][to.index()]
    }

    /// States with at least one outgoing transition.
    pub fn start_states(&self) -> Vec<Activity> {
        Activity::ALL
            .iter()
            .copied()
            .filter(|s| self.observed[s.index()])
            .collect()
    }

    /// States reachable from any start state of this slot.
    pub fn end_states(&self) -> Vec<Activity> {
        Activity::ALL
            .iter()
            .copied()
            .filter(|to| {
                Activity::ALL
                    .iter()
                    .any(|from| self.probabilities[from.index()][to.index()] > 0.0)
            })
            .collect()
    }

    fn insert_self_loop(&mut self, state: Activity) {
        let i = state.index();
        self.probabilities[i] = [0.0; ACTIVITY_COUNT];
        self.probabilities[i][i] = 1.0;
        self.observed[i] = true;
    }

    /// Inverse-CDF draw of the successor of `from` given a uniform `r`.
    ///
    /// A state without an outgoing row holds (degenerate self-loop); the
    /// repair pass installs exactly that behavior for stranded states.
    pub fn draw(&self, from: Activity, r: f64) -> Activity {
        if !self.observed[from.index()] {
            return from;
        }
        let row = &self.probabilities[from.index()];
        let mut cumulative = 0.0;
        for to in Activity::ALL {
            cumulative += row[to.index()];
            if cumulative >= r {
                return to;
            }
        }
        // Guard against r == 1.0 slipping past rounding error.
        Activity::ALL[ACTIVITY_COUNT - 1]
    }

    fn rows_sum_to_one(&self) -> bool {
        (0..ACTIVITY_COUNT).all(|from| {
            if !self.observed[from] {
                return true;
            }
            let sum: f64 = self.probabilities[from].iter().sum();
            (sum - 1.0).abs() <= ROW_SUM_TOLERANCE
        })
    }
}

// =============================================================================
// WEEK CHAIN
// =============================================================================

/// One serializable transition entry; the tabular form persisted downstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    pub day: DayType,
    pub time_of_day: NaiveTime,
    pub from_activity: Activity,
    pub to_activity: Activity,
    pub probability: f64,
}

/// Markov chains for a full week: weekday and weekend day cycles at a
/// fixed time-of-day resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeekMarkovChain {
    time_step_minutes: u32,
    weekday: Vec<SlotChain>,
    weekend: Vec<SlotChain>,
}

impl WeekMarkovChain {
    /// Build a week chain from weekday and weekend diary panels.
    ///
    /// The step size must evenly divide 24 hours and both panels must
    /// carry exactly one day of slots at that resolution, with no gaps.
    pub fn build(
        weekday_panel: &DiaryPanel,
        weekend_panel: &DiaryPanel,
        time_step_minutes: u32,
    ) -> Result<Self, ChainError> {
        if time_step_minutes == 0 || MINUTES_PER_DAY % time_step_minutes != 0 {
            return Err(ChainError::InvalidChain(format!(
                "time step of {} minutes does not evenly divide 24h",
                time_step_minutes
            )));
        }
        let slots = (MINUTES_PER_DAY / time_step_minutes) as usize;
        for (name, panel) in [("weekday", weekday_panel), ("weekend", weekend_panel)] {
            if panel.slots() != slots {
                return Err(ChainError::InvalidChain(format!(
                    "{} panel has {} slots, expected {}",
                    name,
                    panel.slots(),
                    slots
                )));
            }
            if panel.has_gaps() {
                return Err(ChainError::MissingData(format!(
                    "{} panel contains unfilled diary gaps",
                    name
                )));
            }
        }

        let build_day = |panel: &DiaryPanel| -> Vec<SlotChain> {
            (0..slots)
                .map(|t| SlotChain::from_transitions(panel, t, (t + 1) % slots))
                .collect()
        };
        let mut chain = WeekMarkovChain {
            time_step_minutes,
            weekday: build_day(weekday_panel),
            weekend: build_day(weekend_panel),
        };
        chain.repair();
        chain.validate()?;
        Ok(chain)
    }

    pub fn time_step_minutes(&self) -> u32 {
        self.time_step_minutes
    }

    pub fn slots_per_day(&self) -> usize {
        self.weekday.len()
    }

    fn slot_index(&self, time: NaiveTime) -> usize {
        (time.num_seconds_from_midnight() / 60 / self.time_step_minutes) as usize
    }

    fn day(&self, day: DayType) -> &[SlotChain] {
        match day {
            DayType::Weekday => &self.weekday,
            DayType::Weekend => &self.weekend,
        }
    }

    /// The slot chain governing transitions out of the given wall-clock
    /// time.
    pub fn chain_at(&self, time: NaiveDateTime) -> &SlotChain {
        &self.day(DayType::of(time))[self.slot_index(time.time())]
    }

    /// Successor state for a person in `current` at `time`, drawn by
    /// inverse CDF from a uniform `r` in [0, 1).
    pub fn next_activity(&self, current: Activity, time: NaiveDateTime, r: f64) -> Activity {
        self.chain_at(time).draw(current, r)
    }

    /// States with an outgoing row at the given time; usable as initial
    /// activities for a simulation starting there.
    pub fn valid_states(&self, time: NaiveDateTime) -> Vec<Activity> {
        self.chain_at(time).start_states()
    }

    /// The slot sequence of a full week cycle, Monday through Sunday plus
    /// the wrap back to Monday. Covers every day-type boundary.
    fn week_cycle(&self) -> Vec<(DayType, usize)> {
        let week = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ];
        let slots = self.slots_per_day();
        week.iter()
            .flat_map(|&day| (0..slots).map(move |t| (DayType::from_weekday(day), t)))
            .collect()
    }

    /// Walk the week cycle and add a self-loop in slot t+1 for every
    /// end-state of slot t that has no outgoing row there.
    fn repair(&mut self) {
        let cycle = self.week_cycle();
        for i in 0..cycle.len() {
            let (day, slot) = cycle[i];
            let (next_day, next_slot) = cycle[(i + 1) % cycle.len()];
            let stranded: Vec<Activity> = {
                let current = &self.day(day)[slot];
                let next = &self.day(next_day)[next_slot];
                current
                    .end_states()
                    .into_iter()
                    .filter(|s| !next.observed[s.index()])
                    .collect()
            };
            let next_chains = match next_day {
                DayType::Weekday => &mut self.weekday,
                DayType::Weekend => &mut self.weekend,
            };
            for state in stranded {
                next_chains[next_slot].insert_self_loop(state);
            }
        }
    }

    /// Post-repair validation: row sums hit 1 and no end-state is stranded
    /// anywhere along the week cycle.
    fn validate(&self) -> Result<(), ChainError> {
        for (day, chains) in [(DayType::Weekday, &self.weekday), (DayType::Weekend, &self.weekend)] {
            for (slot, chain) in chains.iter().enumerate() {
                if !chain.rows_sum_to_one() {
                    return Err(ChainError::InvalidChain(format!(
                        "{} slot {}: outgoing probabilities do not sum to 1",
                        day, slot
                    )));
                }
            }
        }
        let cycle = self.week_cycle();
        for i in 0..cycle.len() {
            let (day, slot) = cycle[i];
            let (next_day, next_slot) = cycle[(i + 1) % cycle.len()];
            let next = &self.day(next_day)[next_slot];
            for state in self.day(day)[slot].end_states() {
                if !next.observed[state.index()] {
                    return Err(ChainError::InvalidChain(format!(
                        "state {} stranded between {} slot {} and {} slot {}",
                        state, day, slot, next_day, next_slot
                    )));
                }
            }
        }
        Ok(())
    }

    /// Tabular form: one row per non-zero transition, weekday slots first.
    pub fn to_table(&self) -> Vec<ChainRow> {
        let mut rows = Vec::new();
        for (day, chains) in [(DayType::Weekday, &self.weekday), (DayType::Weekend, &self.weekend)] {
            for (slot, chain) in chains.iter().enumerate() {
                let seconds = slot as u32 * self.time_step_minutes * 60;
                let time_of_day = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
                    .unwrap_or(NaiveTime::MIN);
                for from in Activity::ALL {
                    for to in Activity::ALL {
                        let probability = chain.probability(from, to);
                        if probability > 0.0 {
                            rows.push(ChainRow {
                                day,
                                time_of_day,
                                from_activity: from,
                                to_activity: to,
                                probability,
                            });
                        }
                    }
                }
            }
        }
        rows
    }
}
