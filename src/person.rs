//! Discrete-time occupancy simulation of a single synthetic individual.
//!
//! A person holds a read-only week chain, the current activity, and the
//! current wall-clock time. `step` is the only mutation: it draws the next
//! activity from the chain and advances time by exactly one step.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::markov::WeekMarkovChain;
use crate::types::Activity;

/// The simulation step does not match the chain's native granularity.
#[derive(Debug, PartialEq, Eq)]
pub struct IncompatibleTimeStep {
    pub requested_minutes: u32,
    pub chain_minutes: u32,
}

impl fmt::Display for IncompatibleTimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested time step of {} min does not match the chain's {} min",
            self.requested_minutes, self.chain_minutes
        )
    }
}

impl std::error::Error for IncompatibleTimeStep {}

/// A simulated individual advancing through occupancy states.
///
/// Generic over the random source so tests and reproducible runs can
/// inject a specific generator; production code uses a per-citizen seeded
/// `ChaCha8Rng` (see [`Person::seeded`]).
pub struct Person<R: Rng> {
    chain: Arc<WeekMarkovChain>,
    activity: Activity,
    current_time: NaiveDateTime,
    time_step: chrono::Duration,
    rng: R,
}

impl Person<ChaCha8Rng> {
    /// A person with a deterministic per-citizen random stream.
    pub fn seeded(
        chain: Arc<WeekMarkovChain>,
        initial_activity: Activity,
        initial_time: NaiveDateTime,
        time_step_minutes: u32,
        seed: u64,
    ) -> Result<Self, IncompatibleTimeStep> {
        Person::new(
            chain,
            initial_activity,
            initial_time,
            time_step_minutes,
            ChaCha8Rng::seed_from_u64(seed),
        )
    }
}

impl<R: Rng> Person<R> {
    pub fn new(
        chain: Arc<WeekMarkovChain>,
        initial_activity: Activity,
        initial_time: NaiveDateTime,
        time_step_minutes: u32,
        rng: R,
    ) -> Result<Self, IncompatibleTimeStep> {
        if time_step_minutes != chain.time_step_minutes() {
            return Err(IncompatibleTimeStep {
                requested_minutes: time_step_minutes,
                chain_minutes: chain.time_step_minutes(),
            });
        }
        Ok(Person {
            chain,
            activity: initial_activity,
            current_time: initial_time,
            time_step: chrono::Duration::minutes(time_step_minutes as i64),
            rng,
        })
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn current_time(&self) -> NaiveDateTime {
        self.current_time
    }

    /// Advance one time step: draw the next activity from the chain slot
    /// governing the current wall-clock time, then move the clock.
    pub fn step(&mut self) {
        let r = self.rng.gen::<f64>();
        self.activity = self.chain.next_activity(self.activity, self.current_time, r);
        self.current_time += self.time_step;
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rand::rngs::mock::StepRng;

    use super::*;
    use crate::markov::DiaryPanel;
    use crate::types::Activity::{Home, NotAtHome};

    const STEP_MINUTES: u32 = 720;

    /// An rng whose `gen::<f64>()` returns (approximately) a constant.
    fn fixed_rng(r: f64) -> StepRng {
        StepRng::new(((r * (1u64 << 53) as f64) as u64) << 11, 0)
    }

    fn make_chain() -> Arc<WeekMarkovChain> {
        // Weekday midnight row: HOME -> HOME 1/3, HOME -> NOT_AT_HOME 2/3.
        let weekday = DiaryPanel::from_columns(vec![
            vec![Home, NotAtHome],
            vec![Home, Home],
            vec![Home, NotAtHome],
        ])
        .unwrap();
        let weekend = DiaryPanel::from_columns(vec![
            vec![Home, Home],
            vec![Home, Home],
            vec![Home, NotAtHome],
        ])
        .unwrap();
        Arc::new(WeekMarkovChain::build(&weekday, &weekend, STEP_MINUTES).unwrap())
    }

    fn wednesday_midnight() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 3, 8).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_incompatible_time_step_fails() {
        for minutes in [30, 120] {
            let result = Person::new(
                make_chain(),
                Home,
                wednesday_midnight(),
                minutes,
                fixed_rng(0.5),
            );
            assert_eq!(
                result.err().map(|e| e.requested_minutes),
                Some(minutes),
            );
        }
    }

    #[test]
    fn test_low_draw_stays_home() {
        // Inverse CDF on {HOME: 0.333, NOT_AT_HOME: 0.667}: r = 0.1 < 0.333.
        let mut person =
            Person::new(make_chain(), Home, wednesday_midnight(), STEP_MINUTES, fixed_rng(0.1))
                .unwrap();
        person.step();
        assert_eq!(person.activity(), Home);
    }

    #[test]
    fn test_high_draw_leaves_home() {
        // r = 0.4 falls past the HOME band of the cumulative distribution.
        let mut person =
            Person::new(make_chain(), Home, wednesday_midnight(), STEP_MINUTES, fixed_rng(0.4))
                .unwrap();
        person.step();
        assert_eq!(person.activity(), NotAtHome);
    }

    #[test]
    fn test_step_advances_clock() {
        let mut person =
            Person::new(make_chain(), Home, wednesday_midnight(), STEP_MINUTES, fixed_rng(0.1))
                .unwrap();
        person.step();
        assert_eq!(
            person.current_time(),
            wednesday_midnight() + chrono::Duration::minutes(STEP_MINUTES as i64)
        );
        person.step();
        assert_eq!(
            person.current_time(),
            wednesday_midnight() + chrono::Duration::minutes(2 * STEP_MINUTES as i64)
        );
    }

    #[test]
    fn test_seeded_person_is_reproducible() {
        let run = |seed: u64| {
            let mut person = Person::seeded(
                make_chain(),
                Home,
                wednesday_midnight(),
                STEP_MINUTES,
                seed,
            )
            .unwrap();
            (0..14).map(|_| {
                person.step();
                person.activity()
            })
            .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }
}
