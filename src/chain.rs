//! Chain-level operations over a peer's [`BlockTree`]: incoming-block
//! validation, public/private lead metrics, and the private-branch
//! release and stick-to-private controls used by adversarial miners.

use std::collections::HashSet;

use thiserror::Error;

use crate::{
    block::{Block, BlockHash, BlockId},
    block_tree::BlockTree,
    transaction::{BlockTxn, NodeId, Transaction, TxnId},
};

/// Ancestor window for the median-timestamp check.
const TIMESTAMP_WINDOW: usize = 11;

/// Why an incoming block was not accepted.
///
/// [`PrevHashUnknown`](ValidationError::PrevHashUnknown) is recoverable:
/// the block is buffered and retried once its parent arrives. Every other
/// variant is terminal for that block.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("previous hash {0} not found in the tree")]
    PrevHashUnknown(BlockHash),
    #[error("block {0} already present at its parent")]
    DuplicateBlock(BlockHash),
    #[error("block timestamp predates the median of recent ancestors")]
    StaleTimestamp,
    #[error("first transaction is not a coinbase")]
    MissingCoinbase,
    #[error("insufficient balance for transaction {0}")]
    InsufficientBalance(TxnId),
    #[error("coinbase amount does not equal commissions plus the mining fee")]
    BadCoinbaseAmount,
    #[error("transaction {0} has a non-positive amount")]
    NonPositiveAmount(TxnId),
}

/// Public, private, and convergence chain lengths, root excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLengths {
    /// Depth of the public chain tip.
    pub public: usize,
    /// Path length to the private branch tip (equals `public` when no
    /// private branch is active).
    pub private: usize,
    /// Number of hashes the private path shares with the public path.
    pub convergence: usize,
}

impl ChainLengths {
    /// The adversary's withheld-branch advantage.
    #[inline]
    pub fn lead(&self) -> i64 {
        self.private as i64 - self.public as i64
    }
}

/// One peer's view of the ledger: the block tree plus the withheld-branch
/// state adversarial strategies manipulate.
#[derive(Debug, Clone)]
pub struct Chain {
    tree: BlockTree,
    mining_fee: f64,
    /// Tip of the active private branch, if any.
    hidden_hash: Option<BlockHash>,
    /// Last privately inserted hash; survives release so a one-shot stick
    /// request can still target it.
    stick_target: Option<BlockHash>,
    stick_armed: bool,
    block_count: usize,
}

impl Chain {
    /// Creates a chain whose genesis block carries `genesis_txns` as
    /// balance seeds at time `time`.
    pub fn new(time: f64, genesis_txns: Vec<Transaction>, mining_fee: f64) -> Self {
        let txns = genesis_txns.into_iter().map(BlockTxn::Transfer).collect();
        let genesis =
            Block::new(BlockId::GENESIS, time, txns, BlockHash::GENESIS_PARENT, None);
        Chain {
            tree: BlockTree::new(genesis),
            mining_fee,
            hidden_hash: None,
            stick_target: None,
            stick_armed: false,
            block_count: 1,
        }
    }

    #[inline]
    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    #[inline]
    pub fn hidden_hash(&self) -> Option<BlockHash> {
        self.hidden_hash
    }

    /// Longest public chain size, genesis excluded.
    pub fn chain_size(&self) -> u64 {
        self.tree.max_chain_length() - 1
    }

    /// Proof-of-work check. A stub in this design: hash puzzles are not
    /// simulated, so the check always passes. Extension point.
    pub fn proof_of_work(&self, _block: &Block) -> bool {
        true
    }

    /// Runs the incoming-block checks in order, short-circuiting on the
    /// first failure:
    ///
    /// 1. the previous hash resolves to a known node;
    /// 2. the block is not already a child of that node;
    /// 3. the timestamp is no older than the median of up to the last 11
    ///    ancestor timestamps (parent inclusive);
    /// 4. proof of work (stub);
    /// 5. the first transaction is the coinbase;
    /// 6. replaying the transfers against the parent's balances leaves
    ///    every drawee solvent, with positive amounts and commissions;
    /// 7. the coinbase amount equals the commissions plus the mining fee;
    /// 8. every transfer amount is positive (re-checked).
    pub fn validate_incoming(&self, block: &Block) -> Result<(), ValidationError> {
        use ValidationError::*;

        let parent = self
            .tree
            .node(block.previous_hash)
            .ok_or(PrevHashUnknown(block.previous_hash))?;

        if self.tree.child_hashes(block.previous_hash).any(|h| h == block.hash()) {
            return Err(DuplicateBlock(block.hash()));
        }

        let timestamps =
            self.tree.recent_timestamps(block.previous_hash, TIMESTAMP_WINDOW);
        if block.created_at < median(timestamps) {
            return Err(StaleTimestamp);
        }

        // Stubbed out; never a source of failure here.
        debug_assert!(self.proof_of_work(block));

        let coinbase = block.coinbase().ok_or(MissingCoinbase)?;

        let mut balances = parent.balances.clone();
        for txn in block.transfers() {
            let available = balances.get(&txn.drawee).copied().unwrap_or(0.0);
            if available < txn.amount + txn.commission
                || txn.amount <= 0.0
                || txn.commission <= 0.0
            {
                return Err(InsufficientBalance(txn.id));
            }
            *balances.entry(txn.drawee).or_insert(0.0) -=
                txn.amount + txn.commission;
            *balances.entry(txn.payee).or_insert(0.0) += txn.amount;
        }

        if block.commission_total() + self.mining_fee != coinbase.amount {
            return Err(BadCoinbaseAmount);
        }

        if let Some(txn) = block.transfers().find(|t| t.amount <= 0.0) {
            return Err(NonPositiveAmount(txn.id));
        }

        Ok(())
    }

    /// Adds a validated block to the tree. Private inserts extend (or
    /// start) the withheld branch and record its tip.
    pub fn insert(
        &mut self,
        block: Block,
        private: bool,
    ) -> Result<(), ValidationError> {
        let hash = self
            .tree
            .insert_child(block, private)
            .map_err(|b| ValidationError::PrevHashUnknown(b.previous_hash))?;
        if private {
            self.hidden_hash = Some(hash);
            self.stick_target = Some(hash);
        }
        self.block_count += 1;
        Ok(())
    }

    /// Inserts `block` publicly and reports whether the longest-chain
    /// length changed as a result, i.e. whether the block altered the
    /// canonical tip.
    pub fn is_relevant(&mut self, block: Block) -> Result<bool, ValidationError> {
        let before = self.tree.max_chain_length();
        self.insert(block, false)?;
        Ok(before != self.tree.max_chain_length())
    }

    /// Public, private, and convergence lengths; see [`ChainLengths`].
    pub fn lead_metrics(&self) -> ChainLengths {
        let public = self.tree.public_chain();
        let h = public.len();

        let private = match self.hidden_hash.and_then(|t| self.tree.path_to(t)) {
            Some(path) => path,
            None => return ChainLengths { public: h, private: h, convergence: h },
        };

        let on_public: HashSet<BlockHash> = public.into_iter().collect();
        let convergence =
            private.iter().filter(|hash| on_public.contains(hash)).count();
        ChainLengths { public: h, private: private.len(), convergence }
    }

    /// One-shot request: the next [`Chain::preferred_tip_hash`] call
    /// returns the private-branch target even if the public chain is not
    /// shorter.
    pub fn stick_to_private(&mut self) {
        self.stick_armed = true;
    }

    /// The hash every new block should be mined on top of: the armed
    /// stick-to-private target first (consuming the request), else the
    /// withheld branch tip while one exists, else the public fork-choice
    /// tip.
    pub fn preferred_tip_hash(&mut self) -> BlockHash {
        if self.stick_armed {
            self.stick_armed = false;
            if let Some(target) = self.stick_target {
                return target;
            }
        }
        self.peek_preferred_tip()
    }

    /// As [`Chain::preferred_tip_hash`], without consuming an armed
    /// stick-to-private request.
    pub fn peek_preferred_tip(&self) -> BlockHash {
        if self.stick_armed {
            if let Some(target) = self.stick_target {
                return target;
            }
        }
        match self.hidden_hash {
            Some(tip) => tip,
            None => self.tree.public_tip(),
        }
    }

    /// Whether the parent of `block` belongs to a branch that was mined
    /// privately.
    pub fn is_previous_block_private(&self, block: &Block) -> bool {
        self.tree.is_previous_block_private(block)
    }

    /// Releases the entire withheld branch, returning its blocks in
    /// ancestor-first order. The branch rejoins fork-choice.
    pub fn release_private(&mut self) -> Vec<Block> {
        let released = self.tree.release_hidden(self.hidden_hash);
        self.hidden_hash = None;
        released
    }

    /// Releases exactly one withheld block to contest a tying public
    /// block, keeping the rest of the branch hidden.
    pub fn release_one_parallel(&mut self) -> Option<Block> {
        let (block, was_tip) = self.tree.release_one_parallel(self.hidden_hash)?;
        if was_tip {
            self.hidden_hash = None;
        }
        Some(block)
    }

    /// Replays `txns` in order against a working copy of the public tip's
    /// balances, returning a per-transaction verdict. Stored balances are
    /// never mutated.
    pub fn verify_against_tip(&self, txns: &[Transaction]) -> Vec<bool> {
        let tip = self.tree.public_tip();
        let mut balances = match self.tree.node(tip) {
            Some(node) => node.balances.clone(),
            None => return vec![false; txns.len()],
        };

        let mut verdicts = Vec::with_capacity(txns.len());
        for txn in txns {
            let available = balances.get(&txn.drawee).copied().unwrap_or(0.0);
            if available < txn.amount + txn.commission
                || txn.amount <= 0.0
                || txn.commission <= 0.0
            {
                verdicts.push(false);
            } else {
                *balances.entry(txn.drawee).or_insert(0.0) -=
                    txn.amount + txn.commission;
                *balances.entry(txn.payee).or_insert(0.0) += txn.amount;
                verdicts.push(true);
            }
        }
        verdicts
    }

    /// Hashes on the public longest chain, root excluded.
    pub fn longest_chain_hashes(&self) -> Vec<BlockHash> {
        self.tree.public_chain()
    }

    /// Miners (coinbase payees) of the blocks on the public longest
    /// chain, in root-to-tip order.
    pub fn longest_chain_miners(&self) -> Vec<NodeId> {
        self.tree
            .public_chain()
            .into_iter()
            .filter_map(|h| self.tree.block(h).and_then(Block::miner))
            .collect()
    }
}

/// Median of an unordered set of timestamps; the even case averages the
/// middle pair.
fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::CoinbaseTxn;

    const FEE: f64 = 5.0;

    fn chain() -> Chain {
        let seeds = (0..4)
            .map(|i| {
                Transaction::new(
                    TxnId(i),
                    NodeId::GENESIS,
                    NodeId(i as usize),
                    0.0,
                    100.0,
                    0.0,
                )
            })
            .collect();
        Chain::new(0.0, seeds, FEE)
    }

    fn block_with(
        miner: usize,
        seq: u64,
        parent: BlockHash,
        at: f64,
        transfers: Vec<Transaction>,
    ) -> Block {
        let commission: f64 = transfers.iter().map(|t| t.commission).sum();
        let mut txns = vec![BlockTxn::Coinbase(CoinbaseTxn {
            id: TxnId::coinbase(NodeId(miner), seq),
            payee: NodeId(miner),
            created_at: at,
            amount: commission + FEE,
        })];
        txns.extend(transfers.into_iter().map(BlockTxn::Transfer));
        Block::new(
            BlockId { miner: NodeId(miner), seq },
            at,
            txns,
            parent,
            None,
        )
    }

    fn transfer(id: u64, from: usize, to: usize, at: f64, gross: f64) -> Transaction {
        Transaction::new(TxnId(id), NodeId(from), NodeId(to), at, gross, gross * 0.01)
    }

    fn extend_public(chain: &mut Chain, miner: usize, n: u64, seq0: u64) -> BlockHash {
        let mut tip = chain.peek_preferred_tip();
        for i in 0..n {
            let blk = block_with(miner, seq0 + i, tip, (seq0 + i) as f64, vec![]);
            tip = blk.hash();
            chain.insert(blk, false).unwrap();
        }
        tip
    }

    fn extend_private(chain: &mut Chain, miner: usize, n: u64, seq0: u64) -> BlockHash {
        let mut tip = chain.peek_preferred_tip();
        for i in 0..n {
            let blk = block_with(miner, seq0 + i, tip, (seq0 + i) as f64, vec![]);
            tip = blk.hash();
            chain.insert(blk, true).unwrap();
        }
        tip
    }

    #[test]
    fn accepts_well_formed_block() {
        let mut chain = chain();
        let g = chain.peek_preferred_tip();
        let blk =
            block_with(1, 1, g, 1.0, vec![transfer(10, 0, 2, 0.5, 10.0)]);
        assert_eq!(chain.validate_incoming(&blk), Ok(()));
        chain.insert(blk, false).unwrap();
        assert_eq!(chain.chain_size(), 1);
    }

    #[test]
    fn rejects_unknown_previous_hash() {
        let chain = chain();
        let blk = block_with(1, 1, BlockHash([7; 32]), 1.0, vec![]);
        assert!(matches!(
            chain.validate_incoming(&blk),
            Err(ValidationError::PrevHashUnknown(_))
        ));
    }

    #[test]
    fn rejects_duplicate_block() {
        let mut chain = chain();
        let g = chain.peek_preferred_tip();
        let blk = block_with(1, 1, g, 1.0, vec![]);
        chain.insert(blk.clone(), false).unwrap();
        assert!(matches!(
            chain.validate_incoming(&blk),
            Err(ValidationError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let mut chain = chain();
        extend_public(&mut chain, 1, 5, 1);
        let tip = chain.peek_preferred_tip();
        // Ancestor timestamps are 0..=5; median 2.5.
        let blk = block_with(2, 1, tip, 1.0, vec![]);
        assert_eq!(
            chain.validate_incoming(&blk),
            Err(ValidationError::StaleTimestamp)
        );
    }

    #[test]
    fn rejects_missing_coinbase() {
        let chain = chain();
        let g = chain.peek_preferred_tip();
        let blk = Block::new(
            BlockId { miner: NodeId(1), seq: 1 },
            1.0,
            vec![BlockTxn::Transfer(transfer(10, 0, 2, 0.5, 10.0))],
            g,
            None,
        );
        assert_eq!(
            chain.validate_incoming(&blk),
            Err(ValidationError::MissingCoinbase)
        );
    }

    #[test]
    fn rejects_insufficient_balance() {
        let chain = chain();
        let g = chain.peek_preferred_tip();
        let blk =
            block_with(1, 1, g, 1.0, vec![transfer(10, 0, 2, 0.5, 5000.0)]);
        assert!(matches!(
            chain.validate_incoming(&blk),
            Err(ValidationError::InsufficientBalance(_))
        ));
    }

    #[test]
    fn replay_tracks_balances_across_transfers() {
        let chain = chain();
        let g = chain.peek_preferred_tip();
        // Each is affordable alone; together they overdraw account 0.
        let blk = block_with(
            1,
            1,
            g,
            1.0,
            vec![
                transfer(10, 0, 2, 0.5, 60.0),
                transfer(11, 0, 3, 0.6, 60.0),
            ],
        );
        assert!(matches!(
            chain.validate_incoming(&blk),
            Err(ValidationError::InsufficientBalance(TxnId(11)))
        ));
    }

    #[test]
    fn rejects_bad_coinbase_amount() {
        let chain = chain();
        let g = chain.peek_preferred_tip();
        let t = transfer(10, 0, 2, 0.5, 10.0);
        let txns = vec![
            BlockTxn::Coinbase(CoinbaseTxn {
                id: TxnId::coinbase(NodeId(1), 1),
                payee: NodeId(1),
                created_at: 1.0,
                amount: FEE, // commission missing
            }),
            BlockTxn::Transfer(t),
        ];
        let blk = Block::new(
            BlockId { miner: NodeId(1), seq: 1 },
            1.0,
            txns,
            g,
            None,
        );
        assert_eq!(
            chain.validate_incoming(&blk),
            Err(ValidationError::BadCoinbaseAmount)
        );
    }

    #[test]
    fn lead_metrics_track_private_branch() {
        let mut chain = chain();
        extend_public(&mut chain, 1, 2, 1);
        let metrics = chain.lead_metrics();
        assert_eq!(metrics, ChainLengths { public: 2, private: 2, convergence: 2 });
        assert_eq!(metrics.lead(), 0);

        // Withhold three blocks on top of the public tip.
        extend_private(&mut chain, 3, 3, 1);
        let metrics = chain.lead_metrics();
        assert_eq!(metrics.public, 2);
        assert_eq!(metrics.private, 5);
        assert_eq!(metrics.convergence, 2);
        assert_eq!(metrics.lead(), 3);
    }

    #[test]
    fn preferred_tip_prefers_hidden_branch() {
        let mut chain = chain();
        extend_public(&mut chain, 1, 2, 1);
        let hidden_tip = extend_private(&mut chain, 3, 1, 1);

        assert_eq!(chain.preferred_tip_hash(), hidden_tip);

        let released = chain.release_private();
        assert_eq!(released.len(), 1);
        assert_eq!(chain.hidden_hash(), None);
    }

    #[test]
    fn stick_to_private_is_one_shot() {
        let mut chain = chain();
        let g = chain.peek_preferred_tip();

        // One withheld block off genesis, then a longer public branch.
        let hidden = block_with(3, 1, g, 1.0, vec![]);
        let hidden_tip = hidden.hash();
        chain.insert(hidden, true).unwrap();

        let b1 = block_with(1, 1, g, 1.0, vec![]);
        let b1_hash = b1.hash();
        chain.insert(b1, false).unwrap();
        let b2 = block_with(1, 2, b1_hash, 2.0, vec![]);
        let b2_hash = b2.hash();
        chain.insert(b2, false).unwrap();

        chain.release_private();
        assert_eq!(chain.peek_preferred_tip(), b2_hash);

        chain.stick_to_private();
        assert_eq!(chain.preferred_tip_hash(), hidden_tip);
        // Consumed: falls back to the public fork-choice tip.
        assert_eq!(chain.preferred_tip_hash(), b2_hash);
    }

    #[test]
    fn relevance_reflects_longest_chain_changes() {
        let mut chain = chain();
        let g = chain.peek_preferred_tip();
        let a = block_with(1, 1, g, 1.0, vec![]);
        let a_hash = a.hash();
        assert!(chain.is_relevant(a).unwrap());

        // A sibling at the same height changes nothing.
        let b = block_with(2, 1, g, 1.5, vec![]);
        assert!(!chain.is_relevant(b).unwrap());

        let c = block_with(1, 2, a_hash, 2.0, vec![]);
        assert!(chain.is_relevant(c).unwrap());
    }

    #[test]
    fn pool_verification_never_mutates_state() {
        let chain = chain();
        let txns = vec![
            transfer(10, 0, 2, 0.5, 60.0),
            transfer(11, 0, 3, 0.6, 60.0),
            transfer(12, 1, 3, 0.7, 20.0),
        ];
        assert_eq!(chain.verify_against_tip(&txns), vec![true, false, true]);
        // Same verdicts again: the working copy was discarded.
        assert_eq!(chain.verify_against_tip(&txns), vec![true, false, true]);
    }

    #[test]
    fn median_of_even_window() {
        assert_eq!(median(vec![3.0, 1.0]), 2.0);
        assert_eq!(median(vec![5.0]), 5.0);
        assert_eq!(median(vec![2.0, 9.0, 4.0]), 4.0);
    }
}
