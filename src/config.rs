//! Configuration for population synthesis.

use serde::{Serialize, Deserialize};

use crate::hipf::FitConfig;
use crate::markov::MINUTES_PER_DAY;
use crate::synthpop::MetabolicRates;

/// Parameters of one synthesis run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Maximum fitting iterations per region.
    pub max_iterations: u32,

    /// Stop fitting early when the maximum absolute residual falls below
    /// this.
    pub residuals_tolerance: f64,

    /// Stop fitting early when the maximum relative weight change of one
    /// iteration falls below this.
    pub weights_tolerance: f64,

    /// Markov chain resolution; must evenly divide 24 hours.
    pub time_step_minutes: u32,

    /// Master seed; per-region and per-citizen streams derive from it.
    pub master_seed: u64,

    /// Metabolic heat gains copied onto citizens.
    pub metabolic_rates: MetabolicRates,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            residuals_tolerance: 1e-4,
            weights_tolerance: 1e-4,
            // The UK time-use survey diaries run on ten-minute slots.
            time_step_minutes: 10,
            master_seed: 123_456_789,
            metabolic_rates: MetabolicRates::default(),
        }
    }
}

impl SynthesisConfig {
    pub fn fit(&self) -> FitConfig {
        FitConfig {
            max_iterations: self.max_iterations,
            weights_tolerance: Some(self.weights_tolerance),
            residuals_tolerance: Some(self.residuals_tolerance),
        }
    }

    /// Number of time-of-day slots implied by the step size.
    pub fn slots_per_day(&self) -> u32 {
        MINUTES_PER_DAY / self.time_step_minutes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SynthesisConfig::default();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.time_step_minutes, 10);
        assert_eq!(config.slots_per_day(), 144);
        let fit = config.fit();
        assert_eq!(fit.max_iterations, 100);
        assert_eq!(fit.residuals_tolerance, Some(1e-4));
    }
}
