//! Discrete-event simulation driver.
//!
//! A single binary heap orders all events by `(time, insertion order)`,
//! so simultaneous events run in the order they were scheduled and runs
//! are reproducible from the seed alone.

pub mod builder;
pub mod results;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    block::Block,
    chain::Chain,
    config::SimulationConfig,
    network::{exp_sample, generate_topology, LatencyModel},
    node::{MinerStats, NodeActor},
    strategy::{SelfishState, Strategy, StubbornState},
    transaction::{NodeId, Transaction, TxnId},
};

pub use builder::{SimulationBuildError, SimulationBuilder};
pub use results::SimulationResults;

/// A message in flight between two peers.
#[derive(Debug, Clone)]
pub enum Payload {
    Transaction(Transaction),
    Block(Block),
}

impl Payload {
    pub fn size_bytes(&self) -> u64 {
        match self {
            Payload::Transaction(txn) => txn.size_bytes(),
            Payload::Block(block) => block.size_bytes(),
        }
    }
}

/// Everything that can happen at a simulated instant.
#[derive(Debug, Clone)]
pub enum Event {
    /// A payload reaches a peer after its link latency.
    Deliver { to: NodeId, from: NodeId, payload: Payload },
    /// The mining timer started at `started_at` expires at `node`.
    MiningDone { node: NodeId, started_at: f64 },
    /// The workload generator emits the next transaction.
    EmitTxn,
    /// Mining stops and withheld branches are force-released.
    Freeze,
}

#[derive(Debug)]
struct Scheduled {
    time: f64,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.total_cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

/// The event queue plus the simulation clock. Same-instant events pop in
/// scheduling order.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: f64,
    seq: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn schedule_after(&mut self, delay: f64, event: Event) {
        self.schedule_at(self.now + delay.max(0.0), event);
    }

    pub fn schedule_at(&mut self, time: f64, event: Event) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(Scheduled {
            time: time.max(self.now),
            seq,
            event,
        }));
    }

    /// Removes the next event and advances the clock to it.
    pub fn pop(&mut self) -> Option<(f64, Event)> {
        let Reverse(scheduled) = self.queue.pop()?;
        self.now = scheduled.time;
        Some((scheduled.time, scheduled.event))
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct SimulationOutput {
    pub stats: Vec<MinerStats>,
    /// Strategy name per node, index-aligned with `stats`.
    pub strategies: Vec<&'static str>,
    /// Final per-peer chains, index-aligned with `stats`.
    pub chains: Vec<Chain>,
    pub config: SimulationConfig,
}

/// A configured, runnable simulation. Construct via [`SimulationBuilder`].
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    #[inline]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Runs the simulation to completion. Deterministic given the
    /// configured seed.
    pub fn run(&self) -> SimulationOutput {
        let config = self.config.clone();
        let mut master = StdRng::seed_from_u64(config.seed);

        let latency = LatencyModel::new(&config, &mut master);
        let topology = generate_topology(&config, &mut master);
        let powers = hash_powers(&config, &mut master);

        let genesis_txns: Vec<Transaction> = (0..config.num_nodes)
            .map(|i| {
                Transaction::new(
                    TxnId(i as u64),
                    NodeId::GENESIS,
                    NodeId(i),
                    0.0,
                    config.init_balance,
                    0.0,
                )
            })
            .collect();

        let selfish_ix = config.num_nodes - 1;
        let stubborn_ix = selfish_ix - usize::from(config.selfish);
        let mut nodes: Vec<NodeActor> = (0..config.num_nodes)
            .map(|i| {
                let strategy = if config.selfish && i == selfish_ix {
                    Strategy::Selfish(SelfishState::default())
                } else if config.stubborn && i == stubborn_ix {
                    Strategy::Stubborn(StubbornState::default())
                } else {
                    Strategy::Honest
                };
                NodeActor::new(
                    NodeId(i),
                    strategy,
                    &config,
                    genesis_txns.clone(),
                    topology.peers[i].clone(),
                    topology.fast[i],
                    powers[i],
                    latency,
                    StdRng::seed_from_u64(master.gen()),
                )
            })
            .collect();

        let mut sched = Scheduler::new();
        sched.schedule_at(config.freeze_time(), Event::Freeze);
        sched.schedule_at(0.0, Event::EmitTxn);

        let max_txns = config.max_txns();
        let mut next_txn_id = config.num_nodes as u64;
        let mut emitted = 0usize;

        while let Some((time, event)) = sched.pop() {
            if time > config.end_time {
                break;
            }
            match event {
                Event::Deliver { to, from, payload } => {
                    nodes[to.0].receive(payload, Some(from), &mut sched);
                }
                Event::MiningDone { node, started_at } => {
                    nodes[node.0].mining_done(started_at, &mut sched);
                }
                Event::Freeze => {
                    info!("mining frozen at {:.2}", time);
                    for node in nodes.iter_mut() {
                        node.freeze(&mut sched);
                    }
                }
                Event::EmitTxn => {
                    if emitted >= max_txns || time >= config.freeze_time() {
                        continue;
                    }
                    let drawee = master.gen_range(0..config.num_nodes);
                    let payee = master.gen_range(0..config.num_nodes);
                    let gross = master.gen_range(1.0..10.0);
                    let txn = Transaction::new(
                        TxnId(next_txn_id),
                        NodeId(drawee),
                        NodeId(payee),
                        time,
                        gross,
                        config.commission_rate * gross,
                    );
                    next_txn_id += 1;
                    emitted += 1;
                    if let Err(err) = nodes[drawee].submit_txn(txn, &mut sched) {
                        warn!("invalid transaction attempted: {err}");
                    }
                    let delay = exp_sample(&mut master, config.txn_mean_interval);
                    sched.schedule_after(delay, Event::EmitTxn);
                }
            }
        }
        info!("simulation complete at {:.2}", sched.now());

        SimulationOutput {
            stats: nodes.iter().map(NodeActor::miner_stats).collect(),
            strategies: nodes.iter().map(|n| n.strategy_name()).collect(),
            chains: nodes.into_iter().map(NodeActor::into_chain).collect(),
            config,
        }
    }
}

/// Honest peers split `1 - adversary share` equally, or uniformly at
/// random when configured; each adversary gets its configured share.
fn hash_powers(config: &SimulationConfig, rng: &mut StdRng) -> Vec<f64> {
    let honest_n = config.honest_nodes();
    let adversaries = config.adversaries();
    let honest_total =
        1.0 - config.adversary_hash_power * adversaries as f64;

    let mut powers = if config.random_honest_power {
        let raw: Vec<f64> = (0..honest_n).map(|_| rng.gen::<f64>()).collect();
        let sum: f64 = raw.iter().sum();
        raw.into_iter().map(|p| p / sum * honest_total).collect()
    } else {
        vec![honest_total / honest_n as f64; honest_n]
    };
    powers.extend(std::iter::repeat(config.adversary_hash_power).take(adversaries));
    powers
}

/// Runs a batch of independent simulations, in parallel when the `rayon`
/// feature is enabled.
#[derive(Debug, Default)]
pub struct SimulationGroup {
    simulations: Vec<Simulation>,
}

impl SimulationGroup {
    pub fn new() -> Self {
        SimulationGroup::default()
    }

    pub fn add(&mut self, simulation: Simulation) {
        self.simulations.push(simulation);
    }

    #[cfg(feature = "rayon")]
    pub fn run_all(self) -> Vec<SimulationOutput> {
        use rayon::prelude::*;
        self.simulations.into_par_iter().map(|sim| sim.run()).collect()
    }

    #[cfg(not(feature = "rayon"))]
    pub fn run_all(self) -> Vec<SimulationOutput> {
        self.simulations.into_iter().map(|sim| sim.run()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_sim(selfish: bool, seed: u64) -> Simulation {
        SimulationBuilder::new()
            .nodes(6)
            .seed(seed)
            .selfish(selfish)
            .adversary_hash_power(0.4)
            .end_time(3_000.0)
            .build()
            .unwrap()
    }

    #[test]
    fn scheduler_orders_by_time_then_insertion() {
        let mut sched = Scheduler::new();
        sched.schedule_at(5.0, Event::EmitTxn);
        sched.schedule_at(1.0, Event::Freeze);
        sched.schedule_at(5.0, Event::Freeze);

        assert!(matches!(sched.pop(), Some((t, Event::Freeze)) if t == 1.0));
        assert_eq!(sched.now(), 1.0);
        // Same instant: first scheduled pops first.
        assert!(matches!(sched.pop(), Some((_, Event::EmitTxn))));
        assert!(matches!(sched.pop(), Some((_, Event::Freeze))));
        assert!(sched.pop().is_none());
    }

    #[test]
    fn scheduler_never_schedules_into_the_past() {
        let mut sched = Scheduler::new();
        sched.schedule_at(10.0, Event::EmitTxn);
        sched.pop();
        sched.schedule_at(3.0, Event::Freeze);
        let (time, _) = sched.pop().unwrap();
        assert_eq!(time, 10.0);
    }

    #[test]
    fn honest_run_produces_blocks_and_preserves_value() {
        let out = small_sim(false, 11).run();

        let total_mined: u64 = out.stats.iter().map(|s| s.blocks_mined).sum();
        assert!(total_mined > 0);

        // Value conservation at node 0's tip: only the fixed fee mints.
        let chain = &out.chains[0];
        let tip = chain.peek_preferred_tip();
        let depth = chain.longest_chain_hashes().len() as f64;
        let total: f64 =
            chain.tree().node(tip).unwrap().balances.values().sum();
        let expected =
            out.config.num_nodes as f64 * out.config.init_balance
                + depth * out.config.mining_fee;
        assert!(
            (total - expected).abs() < 1e-6,
            "total {total}, expected {expected}"
        );
    }

    #[test]
    fn honest_peers_converge_structurally() {
        // A generous freeze margin lets every in-flight block land.
        let out = SimulationBuilder::new()
            .nodes(6)
            .seed(21)
            .end_time(3_000.0)
            .freeze_margin(200.0)
            .build()
            .unwrap()
            .run();

        let sizes: Vec<u64> =
            out.chains.iter().map(|c| c.chain_size()).collect();
        assert!(sizes[0] > 0);
        assert!(sizes.iter().all(|&s| s == sizes[0]));

        // Every accepted block reached every peer.
        let counts: Vec<usize> =
            out.chains.iter().map(|c| c.block_count()).collect();
        assert!(counts.iter().all(|&c| c == counts[0]));
    }

    #[test]
    fn runs_are_deterministic_for_a_seed() {
        let a = small_sim(true, 7).run();
        let b = small_sim(true, 7).run();

        for (sa, sb) in a.stats.iter().zip(&b.stats) {
            assert_eq!(sa.blocks_mined, sb.blocks_mined);
            assert_eq!(sa.logs, sb.logs);
        }
        assert_eq!(a.chains[0].longest_chain_hashes(), b.chains[0].longest_chain_hashes());
    }

    #[test]
    fn adversary_leaves_nothing_withheld_after_freeze() {
        let out = small_sim(true, 5).run();
        for chain in &out.chains {
            assert_eq!(chain.hidden_hash(), None);
        }
        assert_eq!(*out.strategies.last().unwrap(), "selfish");
        assert!(out.strategies[..5].iter().all(|s| *s == "honest"));
    }
}
