//! Network collaborators: the latency model and static topology
//! generation. Both are fixed for the duration of a run.

use std::collections::BTreeMap;

use rand::{seq::index::sample, Rng};

use crate::{config::SimulationConfig, transaction::NodeId};

/// Samples message latencies as `rho + size / C + Exp(d_mean)`, with the
/// link constants chosen by whether both endpoints are fast. Monotone in
/// message size.
#[derive(Debug, Clone, Copy)]
pub struct LatencyModel {
    /// Propagation delay, sampled once per simulation.
    rho: f64,
    fast_rate: f64,
    slow_rate: f64,
    fast_queue_mean: f64,
    slow_queue_mean: f64,
}

impl LatencyModel {
    pub fn new<R: Rng>(config: &SimulationConfig, rng: &mut R) -> Self {
        LatencyModel {
            rho: rng.gen_range(0.01..0.5),
            fast_rate: config.fast_link_rate,
            slow_rate: config.slow_link_rate,
            fast_queue_mean: SimulationConfig::queue_delay_mean(
                config.fast_link_rate,
            ),
            slow_queue_mean: SimulationConfig::queue_delay_mean(
                config.slow_link_rate,
            ),
        }
    }

    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        size_bytes: u64,
        both_fast: bool,
    ) -> f64 {
        let (rate, queue_mean) = if both_fast {
            (self.fast_rate, self.fast_queue_mean)
        } else {
            (self.slow_rate, self.slow_queue_mean)
        };
        self.rho + size_bytes as f64 / rate + exp_sample(rng, queue_mean)
    }
}

/// Inverse-transform sample from an exponential distribution with the
/// given mean.
pub(crate) fn exp_sample<R: Rng>(rng: &mut R, mean: f64) -> f64 {
    -mean * (1.0 - rng.gen::<f64>()).ln()
}

/// A static peer graph: per-peer adjacency annotated with whether both
/// endpoints of the edge are fast.
#[derive(Debug, Clone)]
pub struct Topology {
    pub peers: Vec<BTreeMap<NodeId, bool>>,
    pub fast: Vec<bool>,
}

/// Generates a connected topology: a ring over the honest peers plus one
/// random chord per honest peer, with each adversary attached to
/// `max(1, gamma * honest_n)` honest peers. Honest fast flags are sampled
/// by ratio; adversaries are always fast.
pub fn generate_topology<R: Rng>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Topology {
    let n = config.num_nodes;
    let honest_n = config.honest_nodes();

    let mut fast = vec![false; n];
    let fast_count = (honest_n as f64 * config.fast_ratio) as usize;
    for ix in sample(rng, honest_n, fast_count.min(honest_n)) {
        fast[ix] = true;
    }
    for flag in fast.iter_mut().skip(honest_n) {
        *flag = true;
    }

    let mut edges: Vec<(usize, usize)> = vec![];
    if honest_n > 1 {
        for i in 0..honest_n {
            edges.push((i, (i + 1) % honest_n));
        }
        for i in 0..honest_n {
            let j = rng.gen_range(0..honest_n);
            if j != i {
                edges.push((i, j));
            }
        }
    }
    let adversary_degree = ((config.adversary_gamma * honest_n as f64) as usize).max(1);
    for adv in honest_n..n {
        for ix in sample(rng, honest_n, adversary_degree.min(honest_n)) {
            edges.push((adv, ix));
        }
    }

    let mut peers = vec![BTreeMap::new(); n];
    for (a, b) in edges {
        let both_fast = fast[a] && fast[b];
        peers[a].insert(NodeId(b), both_fast);
        peers[b].insert(NodeId(a), both_fast);
    }

    Topology { peers, fast }
}
