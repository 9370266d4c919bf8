//! Builder and validation for [`Simulation`](crate::simulation::Simulation).

use thiserror::Error;

use crate::{config::SimulationConfig, simulation::Simulation};

/// Why a configuration could not be turned into a runnable simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationBuildError {
    #[error("need at least 2 nodes, got {0}")]
    TooFewNodes(usize),
    #[error("every node is an adversary; at least one honest node is required")]
    NoHonestNodes,
    #[error("fast ratio must lie in [0, 1]")]
    BadFastRatio,
    #[error("adversary hash power must lie in (0, 1) and leave honest power")]
    BadAdversaryPower,
    #[error("adversary gamma must lie in [0, 1]")]
    BadGamma,
    #[error("end time must exceed the freeze margin, both non-negative")]
    BadTimeline,
    #[error("delays, fee, commission rate, and initial balance must be positive")]
    NonPositiveParameter,
}

/// Chainable configuration for a [`Simulation`]. Unset fields keep the
/// source model's defaults.
#[derive(Debug, Clone, Default)]
pub struct SimulationBuilder {
    config: SimulationConfig,
}

impl SimulationBuilder {
    pub fn new() -> Self {
        SimulationBuilder::default()
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn nodes(mut self, num_nodes: usize) -> Self {
        self.config.num_nodes = num_nodes;
        self
    }

    pub fn fast_ratio(mut self, ratio: f64) -> Self {
        self.config.fast_ratio = ratio;
        self
    }

    pub fn selfish(mut self, enabled: bool) -> Self {
        self.config.selfish = enabled;
        self
    }

    pub fn stubborn(mut self, enabled: bool) -> Self {
        self.config.stubborn = enabled;
        self
    }

    pub fn adversary_hash_power(mut self, power: f64) -> Self {
        self.config.adversary_hash_power = power;
        self
    }

    pub fn adversary_gamma(mut self, gamma: f64) -> Self {
        self.config.adversary_gamma = gamma;
        self
    }

    pub fn random_honest_power(mut self, enabled: bool) -> Self {
        self.config.random_honest_power = enabled;
        self
    }

    pub fn init_balance(mut self, balance: f64) -> Self {
        self.config.init_balance = balance;
        self
    }

    pub fn mining_fee(mut self, fee: f64) -> Self {
        self.config.mining_fee = fee;
        self
    }

    pub fn commission_rate(mut self, rate: f64) -> Self {
        self.config.commission_rate = rate;
        self
    }

    pub fn txn_mean_interval(mut self, interval: f64) -> Self {
        self.config.txn_mean_interval = interval;
        self
    }

    pub fn base_mine_delay(mut self, delay: f64) -> Self {
        self.config.base_mine_delay = delay;
        self
    }

    pub fn txn_window(mut self, window: f64) -> Self {
        self.config.txn_window = window;
        self
    }

    pub fn end_time(mut self, end_time: f64) -> Self {
        self.config.end_time = end_time;
        self
    }

    pub fn freeze_margin(mut self, margin: f64) -> Self {
        self.config.freeze_margin = margin;
        self
    }

    /// Validates the configuration and produces a runnable simulation.
    pub fn build(self) -> Result<Simulation, SimulationBuildError> {
        use SimulationBuildError::*;

        let config = self.config;
        if config.num_nodes < 2 {
            return Err(TooFewNodes(config.num_nodes));
        }
        if config.honest_nodes() == 0 {
            return Err(NoHonestNodes);
        }
        if !(0.0..=1.0).contains(&config.fast_ratio) {
            return Err(BadFastRatio);
        }
        let adversaries = config.adversaries() as f64;
        if adversaries > 0.0
            && (!(0.0..1.0).contains(&config.adversary_hash_power)
                || config.adversary_hash_power * adversaries >= 1.0
                || config.adversary_hash_power <= 0.0)
        {
            return Err(BadAdversaryPower);
        }
        if !(0.0..=1.0).contains(&config.adversary_gamma) {
            return Err(BadGamma);
        }
        if config.freeze_margin < 0.0 || config.end_time <= config.freeze_margin
        {
            return Err(BadTimeline);
        }
        if config.base_mine_delay <= 0.0
            || config.txn_mean_interval <= 0.0
            || config.mining_fee <= 0.0
            || config.commission_rate <= 0.0
            || config.init_balance <= 0.0
        {
            return Err(NonPositiveParameter);
        }

        Ok(Simulation { config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SimulationBuildError::*;

    #[test]
    fn defaults_build() {
        assert!(SimulationBuilder::new().build().is_ok());
    }

    #[test]
    fn rejects_degenerate_configurations() {
        assert_eq!(
            SimulationBuilder::new().nodes(1).build().unwrap_err(),
            TooFewNodes(1)
        );
        assert_eq!(
            SimulationBuilder::new()
                .nodes(2)
                .selfish(true)
                .stubborn(true)
                .build()
                .unwrap_err(),
            NoHonestNodes
        );
        assert_eq!(
            SimulationBuilder::new().fast_ratio(1.5).build().unwrap_err(),
            BadFastRatio
        );
        assert_eq!(
            SimulationBuilder::new()
                .selfish(true)
                .stubborn(true)
                .nodes(10)
                .adversary_hash_power(0.5)
                .build()
                .unwrap_err(),
            BadAdversaryPower
        );
        assert_eq!(
            SimulationBuilder::new().adversary_gamma(2.0).build().unwrap_err(),
            BadGamma
        );
        assert_eq!(
            SimulationBuilder::new()
                .end_time(10.0)
                .freeze_margin(10.0)
                .build()
                .unwrap_err(),
            BadTimeline
        );
        assert_eq!(
            SimulationBuilder::new().mining_fee(0.0).build().unwrap_err(),
            NonPositiveParameter
        );
    }

    #[test]
    fn settings_reach_the_config() {
        let sim = SimulationBuilder::new()
            .nodes(12)
            .seed(99)
            .selfish(true)
            .adversary_hash_power(0.3)
            .end_time(5_000.0)
            .build()
            .unwrap();
        let config = sim.config();
        assert_eq!(config.num_nodes, 12);
        assert_eq!(config.seed, 99);
        assert!(config.selfish);
        assert_eq!(config.adversary_hash_power, 0.3);
    }
}
