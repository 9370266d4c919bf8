//! Simulation parameters.
//!
//! Everything the source model kept as process-wide constants lives in one
//! explicit [`SimulationConfig`] passed to construction, so runs are fully
//! described by a value plus a seed.

/// Parameters of a single simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Master seed; every sampled quantity derives from it.
    pub seed: u64,
    /// Number of peers in the network, adversaries included.
    pub num_nodes: usize,
    /// Fraction of honest peers with fast links.
    pub fast_ratio: f64,
    /// Add a selfish-mining adversary (occupies the last node id).
    pub selfish: bool,
    /// Add a stubborn-mining adversary (occupies the id before selfish).
    pub stubborn: bool,
    /// Hash power fraction given to each adversary.
    pub adversary_hash_power: f64,
    /// Fraction of honest peers each adversary connects to.
    pub adversary_gamma: f64,
    /// Split the honest hash power uniformly at random instead of equally.
    pub random_honest_power: bool,
    /// Balance credited to every account at genesis.
    pub init_balance: f64,
    /// Fixed reward minted by every coinbase on top of the commissions.
    pub mining_fee: f64,
    /// Commission charged per transaction, as a fraction of the gross.
    pub commission_rate: f64,
    /// Mean of the exponential transaction inter-arrival delay.
    pub txn_mean_interval: f64,
    /// Mean mining delay at hash power 1.0; a peer's expected delay is
    /// `base_mine_delay / hash_power`.
    pub base_mine_delay: f64,
    /// Window after an attempt starts during which newly pooled
    /// transactions may interrupt it.
    pub txn_window: f64,
    /// Simulated end of the run.
    pub end_time: f64,
    /// Time before `end_time` at which mining freezes and withheld
    /// branches are force-released.
    pub freeze_margin: f64,
    /// Link rate (bytes per time unit) between two fast peers.
    pub fast_link_rate: f64,
    /// Link rate when either endpoint is slow.
    pub slow_link_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            seed: 2,
            num_nodes: 100,
            fast_ratio: 0.5,
            selfish: false,
            stubborn: false,
            adversary_hash_power: 0.7,
            adversary_gamma: 0.5,
            random_honest_power: false,
            init_balance: 1_000_000.0,
            mining_fee: 5.0,
            commission_rate: 0.01,
            txn_mean_interval: 10.0,
            base_mine_delay: 300.0,
            txn_window: 0.0,
            end_time: 25_000.0,
            freeze_margin: 50.0,
            fast_link_rate: 100_000.0,
            slow_link_rate: 5_000.0,
        }
    }
}

impl SimulationConfig {
    pub fn adversaries(&self) -> usize {
        usize::from(self.selfish) + usize::from(self.stubborn)
    }

    pub fn honest_nodes(&self) -> usize {
        self.num_nodes.saturating_sub(self.adversaries())
    }

    /// Instant past which no new mining attempt is started.
    pub fn freeze_time(&self) -> f64 {
        self.end_time - self.freeze_margin
    }

    /// Mean of the exponential queueing-delay term for a link of the
    /// given rate.
    pub fn queue_delay_mean(rate: f64) -> f64 {
        96.0 / rate
    }

    /// Upper bound on generated transactions, matching the source model's
    /// precomputed workload.
    pub fn max_txns(&self) -> usize {
        (self.end_time / (self.txn_mean_interval / 2.0)) as usize + 1
    }
}
