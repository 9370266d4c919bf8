//! A simulated peer: one chain, a transaction pool, mining state, and the
//! broadcast/receive protocol.

use std::collections::BTreeMap;

use log::{debug, info};
use rand::rngs::StdRng;

use crate::{
    block::{Block, BlockId, PotentialBlock},
    chain::{Chain, ValidationError},
    config::SimulationConfig,
    network::{exp_sample, LatencyModel},
    simulation::{Event, Payload, Scheduler},
    strategy::{self, Strategy},
    transaction::{BlockTxn, CoinbaseTxn, NodeId, Transaction, TxnId},
};

/// Block capacity including the header unit and the coinbase transaction.
const MAX_BLOCK_TXNS: usize = 1_000;

/// Per-peer analytics snapshot.
#[derive(Debug, Clone)]
pub struct MinerStats {
    pub blocks_mined: u64,
    pub is_fast: bool,
    pub hash_power: f64,
    /// One comma-joined record per accepted block, in acceptance order:
    /// `hash,seq,acceptedAt,prevHash,minerId`.
    pub logs: Vec<String>,
}

/// A peer in the simulated network. Owns its view of the ledger; peers
/// coordinate only through scheduled message deliveries.
#[derive(Debug)]
pub struct NodeActor {
    pub(crate) id: NodeId,
    pub(crate) strategy: Strategy,
    pub(crate) chain: Chain,
    peers: BTreeMap<NodeId, bool>,
    is_fast: bool,
    hash_power: f64,
    latency: LatencyModel,
    rng: StdRng,

    txn_pool: Vec<Transaction>,
    /// Subset of the pool last validated against the public tip.
    legit_pool: Vec<Transaction>,
    potential: Option<PotentialBlock>,
    /// Blocks whose parent is not yet known locally, with their senders.
    outcast: Vec<(Block, Option<NodeId>)>,

    start_mine: f64,
    end_mine: f64,
    pub(crate) interrupt_time: f64,

    blocks_mined: u64,
    blocks_received: u64,
    logs: Vec<String>,

    mining_fee: f64,
    base_mine_delay: f64,
    txn_window: f64,
    freeze_time: f64,
}

impl NodeActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: NodeId,
        strategy: Strategy,
        config: &SimulationConfig,
        genesis_txns: Vec<Transaction>,
        peers: BTreeMap<NodeId, bool>,
        is_fast: bool,
        hash_power: f64,
        latency: LatencyModel,
        rng: StdRng,
    ) -> Self {
        NodeActor {
            id,
            strategy,
            chain: Chain::new(0.0, genesis_txns, config.mining_fee),
            peers,
            is_fast,
            hash_power,
            latency,
            rng,
            txn_pool: vec![],
            legit_pool: vec![],
            potential: None,
            outcast: vec![],
            start_mine: -1.0,
            end_mine: -1.0,
            interrupt_time: -1.0,
            blocks_mined: 0,
            blocks_received: 0,
            logs: vec![],
            mining_fee: config.mining_fee,
            base_mine_delay: config.base_mine_delay,
            txn_window: config.txn_window,
            freeze_time: config.freeze_time(),
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Read-only view of this peer's chain.
    #[inline]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Consumes the node, keeping only its chain.
    pub fn into_chain(self) -> Chain {
        self.chain
    }

    #[inline]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn miner_stats(&self) -> MinerStats {
        MinerStats {
            blocks_mined: self.blocks_mined,
            is_fast: self.is_fast,
            hash_power: self.hash_power,
            logs: self.logs.clone(),
        }
    }

    /// Entry point for scheduled deliveries.
    pub fn receive(
        &mut self,
        payload: Payload,
        sent_by: Option<NodeId>,
        sched: &mut Scheduler,
    ) {
        match payload {
            Payload::Transaction(txn) => self.receive_txn(txn, sent_by, sched),
            Payload::Block(block) => {
                self.receive_block(block, sent_by, sched, true)
            }
        }
    }

    /// Locally originated transaction. Admission failures are reported to
    /// the submitter and the transaction is dropped, never retried.
    pub fn submit_txn(
        &mut self,
        txn: Transaction,
        sched: &mut Scheduler,
    ) -> Result<(), ValidationError> {
        if !self.pool_admits(&txn) {
            return Err(ValidationError::InsufficientBalance(txn.id));
        }
        self.txn_pool.push(txn.clone());
        self.broadcast(Payload::Transaction(txn), None, sched);
        self.start_mining(sched);
        Ok(())
    }

    fn receive_txn(
        &mut self,
        txn: Transaction,
        sent_by: Option<NodeId>,
        sched: &mut Scheduler,
    ) {
        if self.txn_pool.iter().any(|t| t.id == txn.id) {
            return;
        }
        if !self.pool_admits(&txn) {
            return;
        }
        self.txn_pool.push(txn.clone());
        self.broadcast(Payload::Transaction(txn), sent_by, sched);
        self.start_mining(sched);
    }

    /// Replays the pool plus `txn`, in timestamp order, against the
    /// public tip.
    fn pool_admits(&self, txn: &Transaction) -> bool {
        let mut candidate = self.txn_pool.clone();
        candidate.push(txn.clone());
        candidate.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        self.chain.verify_against_tip(&candidate).into_iter().all(|ok| ok)
    }

    /// Runs the validation pipeline on an incoming block, then the
    /// acceptance protocol: strategy arrival hook, pool cleanup, mining
    /// interrupt check, outcast replay, and mining re-evaluation.
    ///
    /// `revalidate` is false only when replaying a buffered outcast block
    /// that was just validated.
    pub fn receive_block(
        &mut self,
        block: Block,
        sent_by: Option<NodeId>,
        sched: &mut Scheduler,
        revalidate: bool,
    ) {
        if revalidate {
            match self.chain.validate_incoming(&block) {
                Ok(()) => {}
                Err(ValidationError::PrevHashUnknown(_)) => {
                    debug!(
                        "node {}: buffering outcast block {}",
                        self.id, block.id
                    );
                    self.outcast.push((block, sent_by));
                    return;
                }
                Err(err) => {
                    debug!(
                        "node {}: dropping block {}: {}",
                        self.id, block.id, err
                    );
                    return;
                }
            }
        }

        self.accept_block(block.clone(), sent_by, sched);
        self.remove_block_txns(&block);

        if self.should_interrupt(&block) {
            debug!(
                "node {}: mining interrupted at {:.2}",
                self.id,
                sched.now()
            );
            self.interrupt_time = sched.now();
        }

        // Retry buffered blocks whose parent may now be known. A successful
        // replay re-enters this method and takes over the remaining sweep.
        let mut ix = 0;
        while ix < self.outcast.len() {
            match self.chain.validate_incoming(&self.outcast[ix].0) {
                Ok(()) => {
                    let (buffered, sender) = self.outcast.remove(ix);
                    self.receive_block(buffered, sender, sched, false);
                    return;
                }
                Err(ValidationError::PrevHashUnknown(_)) => ix += 1,
                Err(_) => {
                    self.outcast.remove(ix);
                }
            }
        }

        self.start_mining(sched);
    }

    /// Records the acceptance log line and hands the block to the
    /// strategy's arrival policy, which decides between public insertion,
    /// private insertion, and releases.
    pub(crate) fn accept_block(
        &mut self,
        block: Block,
        sent_by: Option<NodeId>,
        sched: &mut Scheduler,
    ) {
        self.blocks_received += 1;
        let miner = block.miner().unwrap_or(NodeId::GENESIS);
        self.logs.push(format!(
            "{},{},{:.2},{},{}",
            block.hash(),
            self.blocks_received,
            sched.now(),
            block.previous_hash,
            miner
        ));

        match self.strategy {
            Strategy::Honest => {
                strategy::honest::on_block_arrival(self, block, sent_by, sched)
            }
            Strategy::Selfish(state) => {
                let state = strategy::selfish::on_block_arrival(
                    self, state, block, sent_by, sched,
                );
                self.strategy = Strategy::Selfish(state);
            }
            Strategy::Stubborn(state) => {
                let state = strategy::stubborn::on_block_arrival(
                    self, state, block, sent_by, sched,
                );
                self.strategy = Strategy::Stubborn(state);
            }
        }
    }

    fn remove_block_txns(&mut self, block: &Block) {
        self.txn_pool
            .retain(|t| !block.txns().iter().any(|b| b.id() == t.id));
    }

    /// An in-flight attempt must be abandoned if its base no longer
    /// matches the preferred tip, or if the incoming block targets the
    /// same parent or shares a transaction with it.
    fn should_interrupt(&self, incoming: &Block) -> bool {
        let potential = match &self.potential {
            Some(p) => p,
            None => return false,
        };
        if potential.previous_hash != self.chain.peek_preferred_tip() {
            return true;
        }
        self.mining_in_progress()
            && (potential.previous_hash == incoming.previous_hash
                || potential.shares_txn_with(incoming))
    }

    fn mining_in_progress(&self) -> bool {
        self.potential.is_some()
            && self.interrupt_time <= self.start_mine
            && self.start_mine >= self.end_mine
    }

    /// Revalidates the pool and decides whether to start or restart a
    /// mining attempt.
    pub(crate) fn start_mining(&mut self, sched: &mut Scheduler) {
        self.txn_pool
            .sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        let verdicts = self.chain.verify_against_tip(&self.txn_pool);
        self.legit_pool = self
            .txn_pool
            .iter()
            .zip(&verdicts)
            .filter(|(_, &ok)| ok)
            .map(|(t, _)| t.clone())
            .collect();

        if !self.mining_in_progress() {
            if !self.legit_pool.is_empty() {
                self.begin_attempt(sched);
            }
            return;
        }

        let has_fresh_txns = match &self.potential {
            Some(p) => self
                .legit_pool
                .iter()
                .any(|t| !p.txns.iter().any(|q| q.id == t.id)),
            None => false,
        };
        if has_fresh_txns && self.start_mine + self.txn_window >= sched.now() {
            debug!(
                "node {}: mining interrupted for fresh transactions at {:.2}",
                self.id,
                sched.now()
            );
            self.interrupt_time = sched.now();
            self.begin_attempt(sched);
        }
    }

    fn begin_attempt(&mut self, sched: &mut Scheduler) {
        if sched.now() >= self.freeze_time {
            return;
        }
        let take = self.legit_pool.len().min(MAX_BLOCK_TXNS - 2);
        let txns = self.legit_pool[..take].to_vec();
        let previous_hash = self.chain.preferred_tip_hash();
        let started_at = sched.now();
        self.potential =
            Some(PotentialBlock { previous_hash, txns, started_at });
        self.start_mine = started_at;

        let delay =
            exp_sample(&mut self.rng, self.base_mine_delay / self.hash_power);
        debug!(
            "node {}: mining attempt started at {:.2}, delay {:.2}",
            self.id, started_at, delay
        );
        sched.schedule_after(
            delay,
            Event::MiningDone { node: self.id, started_at },
        );
    }

    /// Timer expiry for the attempt started at `started_at`. Interruption
    /// is a flag checked here, not a preemptive cancellation: a stale or
    /// interrupted attempt is simply never finalized.
    pub fn mining_done(&mut self, started_at: f64, sched: &mut Scheduler) {
        if sched.now() >= self.freeze_time {
            return;
        }
        let live = self
            .potential
            .as_ref()
            .map_or(false, |p| p.started_at == started_at)
            && self.interrupt_time <= started_at;
        if live {
            if let Some(potential) = self.potential.clone() {
                self.finish_attempt(potential, sched);
            }
        }
        self.start_mining(sched);
    }

    fn finish_attempt(
        &mut self,
        potential: PotentialBlock,
        sched: &mut Scheduler,
    ) {
        let now = sched.now();
        self.blocks_mined += 1;
        let seq = self.blocks_mined;

        let commission: f64 = potential.txns.iter().map(|t| t.commission).sum();
        let coinbase = CoinbaseTxn {
            id: TxnId::coinbase(self.id, seq),
            payee: self.id,
            created_at: now,
            amount: commission + self.mining_fee,
        };
        let mut txns = Vec::with_capacity(potential.txns.len() + 1);
        txns.push(BlockTxn::Coinbase(coinbase));
        txns.extend(potential.txns.into_iter().map(BlockTxn::Transfer));

        let block = Block::new(
            BlockId { miner: self.id, seq },
            now,
            txns,
            potential.previous_hash,
            None,
        );
        self.end_mine = now;
        info!("node {}: mined block {} at {:.2}", self.id, block.id, now);

        self.accept_block(block.clone(), None, sched);
        self.remove_block_txns(&block);
    }

    /// Schedules a delivery to every peer except the immediate sender,
    /// after a per-edge latency sample.
    pub(crate) fn broadcast(
        &mut self,
        payload: Payload,
        exclude: Option<NodeId>,
        sched: &mut Scheduler,
    ) {
        let size = payload.size_bytes();
        for (&peer, &both_fast) in &self.peers {
            if peer == self.id || Some(peer) == exclude {
                continue;
            }
            let delay = self.latency.sample(&mut self.rng, size, both_fast);
            sched.schedule_after(
                delay,
                Event::Deliver { to: peer, from: self.id, payload: payload.clone() },
            );
        }
    }

    /// End-of-simulation drain: no new attempts are started, and
    /// adversarial strategies surface whatever they were withholding.
    pub fn freeze(&mut self, sched: &mut Scheduler) {
        self.interrupt_time = sched.now();
        strategy::on_freeze(self, sched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHash;
    use rand::SeedableRng;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            num_nodes: 4,
            end_time: 100_000.0,
            freeze_margin: 50.0,
            ..Default::default()
        }
    }

    fn genesis_txns(n: usize, balance: f64) -> Vec<Transaction> {
        (0..n)
            .map(|i| {
                Transaction::new(
                    TxnId(i as u64),
                    NodeId::GENESIS,
                    NodeId(i),
                    0.0,
                    balance,
                    0.0,
                )
            })
            .collect()
    }

    fn actor(id: usize, config: &SimulationConfig) -> NodeActor {
        NodeActor::new(
            NodeId(id),
            Strategy::Honest,
            config,
            genesis_txns(4, config.init_balance),
            BTreeMap::new(),
            true,
            1.0,
            LatencyModel::new(config, &mut StdRng::seed_from_u64(0)),
            StdRng::seed_from_u64(id as u64),
        )
    }

    fn block_on(
        actor: &NodeActor,
        miner: usize,
        seq: u64,
        parent: BlockHash,
        at: f64,
    ) -> Block {
        let cb = CoinbaseTxn {
            id: TxnId::coinbase(NodeId(miner), seq),
            payee: NodeId(miner),
            created_at: at,
            amount: actor.mining_fee,
        };
        Block::new(
            BlockId { miner: NodeId(miner), seq },
            at,
            vec![BlockTxn::Coinbase(cb)],
            parent,
            None,
        )
    }

    #[test]
    fn mines_a_block_from_a_submitted_txn() {
        let config = test_config();
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let txn = Transaction::new(
            TxnId(100),
            NodeId(0),
            NodeId(1),
            0.0,
            10.0,
            0.1,
        );
        node.submit_txn(txn, &mut sched).unwrap();

        let mut mined = 0;
        while let Some((_, event)) = sched.pop() {
            if let Event::MiningDone { started_at, .. } = event {
                node.mining_done(started_at, &mut sched);
                mined += 1;
            }
            if mined > 3 {
                break;
            }
        }

        assert_eq!(node.blocks_mined, 1);
        assert_eq!(node.chain.chain_size(), 1);
        assert!(node.txn_pool.is_empty());
        assert_eq!(node.logs.len(), 1);

        let tip = node.chain.peek_preferred_tip();
        let balances = &node.chain.tree().node(tip).unwrap().balances;
        assert!(
            (balances[&NodeId(0)] - (config.init_balance - 10.0)).abs() < 1e-9
        );
    }

    #[test]
    fn rejects_overdrawing_submission() {
        let config = test_config();
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let txn = Transaction::new(
            TxnId(100),
            NodeId(0),
            NodeId(1),
            0.0,
            config.init_balance * 2.0,
            1.0,
        );
        assert!(matches!(
            node.submit_txn(txn, &mut sched),
            Err(ValidationError::InsufficientBalance(TxnId(100)))
        ));
        assert!(node.txn_pool.is_empty());
    }

    #[test]
    fn duplicate_txn_is_ignored() {
        let config = test_config();
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let txn = Transaction::new(
            TxnId(100),
            NodeId(1),
            NodeId(2),
            0.0,
            10.0,
            0.1,
        );
        node.receive_txn(txn.clone(), Some(NodeId(1)), &mut sched);
        node.receive_txn(txn, Some(NodeId(2)), &mut sched);
        assert_eq!(node.txn_pool.len(), 1);
    }

    #[test]
    fn outcast_block_is_buffered_then_accepted() {
        let config = test_config();
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let genesis = node.chain.peek_preferred_tip();
        let b1 = block_on(&node, 1, 1, genesis, 1.0);
        let b2 = block_on(&node, 1, 2, b1.hash(), 2.0);

        // The child arrives first and waits in the outcast buffer.
        node.receive_block(b2.clone(), Some(NodeId(1)), &mut sched, true);
        assert_eq!(node.chain.chain_size(), 0);
        assert_eq!(node.outcast.len(), 1);

        node.receive_block(b1, Some(NodeId(1)), &mut sched, true);
        assert_eq!(node.chain.chain_size(), 2);
        assert!(node.outcast.is_empty());
        assert_eq!(node.chain.peek_preferred_tip(), b2.hash());
        assert_eq!(node.logs.len(), 2);
    }

    #[test]
    fn duplicate_block_is_dropped_silently() {
        let config = test_config();
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let genesis = node.chain.peek_preferred_tip();
        let b1 = block_on(&node, 1, 1, genesis, 1.0);
        node.receive_block(b1.clone(), Some(NodeId(1)), &mut sched, true);
        node.receive_block(b1, Some(NodeId(2)), &mut sched, true);

        assert_eq!(node.chain.chain_size(), 1);
        assert_eq!(node.blocks_received, 1);
    }

    #[test]
    fn incoming_block_interrupts_conflicting_attempt() {
        let config = test_config();
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let txn = Transaction::new(
            TxnId(100),
            NodeId(1),
            NodeId(2),
            0.0,
            10.0,
            0.1,
        );
        node.submit_txn(txn, &mut sched).unwrap();
        assert!(node.mining_in_progress());

        // Advance the clock past the attempt start, then deliver a
        // competing block that extends the tip out from under it.
        sched.schedule_at(0.5, Event::EmitTxn);
        sched.pop();
        let genesis = node.chain.peek_preferred_tip();
        let b1 = block_on(&node, 1, 1, genesis, 1.0);
        node.receive_block(b1, Some(NodeId(1)), &mut sched, true);

        // The old attempt was interrupted and a new one started on the
        // new tip.
        let potential = node.potential.as_ref().unwrap();
        assert_eq!(potential.previous_hash, node.chain.peek_preferred_tip());
        assert!(node.mining_in_progress());
    }

    #[test]
    fn no_attempt_starts_past_freeze_time() {
        let mut config = test_config();
        config.end_time = 10.0;
        config.freeze_margin = 10.0; // freeze at t=0
        let mut node = actor(0, &config);
        let mut sched = Scheduler::new();

        let txn = Transaction::new(
            TxnId(100),
            NodeId(0),
            NodeId(1),
            0.0,
            10.0,
            0.1,
        );
        node.submit_txn(txn, &mut sched).unwrap();
        assert!(node.potential.is_none());
        assert!(sched.pop().is_none());
    }
}
