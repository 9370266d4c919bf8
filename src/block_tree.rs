//! Per-peer block tree with fork-choice and balance bookkeeping.
//!
//! The tree is stored as an arena of nodes addressed by index, with a
//! hash index for lookup. Children hold back-indices to their parent, so
//! no ownership cycles arise and length updates can walk upward
//! iteratively. Nodes are never deleted; trees grow monotonically.

use std::collections::HashMap;

use crate::{
    block::{Block, BlockHash},
    transaction::NodeId,
};

/// One block plus the bookkeeping the fork-choice rule needs.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub block: Block,
    parent: Option<usize>,
    /// Children in insertion order; order is what makes first-seen-wins
    /// tie-breaking deterministic.
    children: Vec<usize>,
    /// Account balances as of this block.
    pub balances: HashMap<NodeId, f64>,
    /// Longest descendant chain length rooted here; genesis counts as 1.
    /// Private nodes carry 0 until released.
    pub chain_length: u64,
    preferred_child: Option<usize>,
    /// Set once for blocks inserted privately; survives release.
    pub is_private: bool,
    /// Cleared when the block is released to fork-choice.
    pub is_hidden: bool,
}

/// An owned tree of blocks rooted at genesis.
#[derive(Debug, Clone)]
pub struct BlockTree {
    nodes: Vec<TreeNode>,
    index: HashMap<BlockHash, usize>,
}

impl BlockTree {
    /// Creates a tree holding only `genesis`. Genesis balances are seeded
    /// directly from the genesis transactions, with no coinbase deduction.
    pub fn new(genesis: Block) -> Self {
        let mut balances = HashMap::new();
        for txn in genesis.transfers() {
            balances.insert(txn.payee, txn.amount);
        }

        let hash = genesis.hash();
        let root = TreeNode {
            block: genesis,
            parent: None,
            children: vec![],
            balances,
            chain_length: 1,
            preferred_child: None,
            is_private: false,
            is_hidden: false,
        };

        BlockTree { nodes: vec![root], index: HashMap::from([(hash, 0)]) }
    }

    #[inline]
    pub fn contains(&self, hash: BlockHash) -> bool {
        self.index.contains_key(&hash)
    }

    #[inline]
    pub fn node(&self, hash: BlockHash) -> Option<&TreeNode> {
        self.index.get(&hash).map(|&ix| &self.nodes[ix])
    }

    #[inline]
    pub fn block(&self, hash: BlockHash) -> Option<&Block> {
        self.node(hash).map(|n| &n.block)
    }

    /// Hashes of the direct children of the block with the given hash.
    pub fn child_hashes(
        &self,
        hash: BlockHash,
    ) -> impl Iterator<Item = BlockHash> + '_ {
        self.index
            .get(&hash)
            .into_iter()
            .flat_map(|&ix| self.nodes[ix].children.iter())
            .map(|&c| self.nodes[c].block.hash())
    }

    /// Longest chain length of the whole tree, genesis included.
    #[inline]
    pub fn max_chain_length(&self) -> u64 {
        self.nodes[0].chain_length
    }

    /// Inserts a child node for `block` under the node identified by
    /// `block.previous_hash`, deriving its balances from the parent's.
    ///
    /// Public inserts join fork-choice immediately: preferred-child and
    /// chain-length bookkeeping is propagated up to the root. Private
    /// inserts are created hidden with `chain_length == 0` and touch no
    /// ancestor bookkeeping, so they stay invisible to fork-choice until
    /// released.
    ///
    /// Returns the block back as `Err` when its parent is unknown.
    pub fn insert_child(
        &mut self,
        block: Block,
        private: bool,
    ) -> Result<BlockHash, Block> {
        let parent_ix = match self.index.get(&block.previous_hash) {
            Some(&ix) => ix,
            None => return Err(block),
        };

        let balances = Self::apply_block(&self.nodes[parent_ix].balances, &block);
        let hash = block.hash();
        let ix = self.nodes.len();
        self.nodes.push(TreeNode {
            block,
            parent: Some(parent_ix),
            children: vec![],
            balances,
            chain_length: if private { 0 } else { 1 },
            preferred_child: None,
            is_private: private,
            is_hidden: private,
        });
        self.nodes[parent_ix].children.push(ix);
        self.index.insert(hash, ix);

        if !private {
            self.propagate_lengths(ix);
        }

        Ok(hash)
    }

    /// Balances as of `block`, given its parent's balances: each transfer
    /// debits the drawee's gross outlay (amount plus commission) and
    /// credits the payee the net amount; the coinbase then pays the
    /// commissions plus the mining fee to the miner. Commissions only move
    /// value between accounts; the fixed fee is the sole minting source.
    fn apply_block(
        parent: &HashMap<NodeId, f64>,
        block: &Block,
    ) -> HashMap<NodeId, f64> {
        let mut balances = parent.clone();
        for txn in block.transfers() {
            *balances.entry(txn.drawee).or_insert(0.0) -=
                txn.amount + txn.commission;
            *balances.entry(txn.payee).or_insert(0.0) += txn.amount;
        }
        if let Some(cb) = block.coinbase() {
            *balances.entry(cb.payee).or_insert(0.0) += cb.amount;
        }
        balances
    }

    /// Recomputes `chain_length`/`preferred_child` at `from` and at every
    /// ancestor, from their non-hidden children. Iterative ancestor walk;
    /// terminates at the root.
    fn propagate_lengths(&mut self, from: usize) {
        let mut cur = Some(from);
        while let Some(ix) = cur {
            let mut best: Option<(usize, u64)> = None;
            for &child in &self.nodes[ix].children {
                if self.nodes[child].is_hidden {
                    continue;
                }
                let len = self.nodes[child].chain_length;
                if best.map_or(true, |(_, l)| len > l) {
                    best = Some((child, len));
                }
            }
            self.nodes[ix].chain_length = 1 + best.map_or(0, |(_, l)| l);
            self.nodes[ix].preferred_child = best.map(|(c, _)| c);
            cur = self.nodes[ix].parent;
        }
    }

    /// Hashes on the path from (but not including) the root to the block
    /// with hash `target`, inclusive. `None` if the block is unknown.
    pub fn path_to(&self, target: BlockHash) -> Option<Vec<BlockHash>> {
        let mut ix = *self.index.get(&target)?;
        let mut path = vec![];
        while let Some(parent) = self.nodes[ix].parent {
            path.push(self.nodes[ix].block.hash());
            ix = parent;
        }
        path.reverse();
        Some(path)
    }

    /// Tip of the public longest chain: follow preferred children from the
    /// root. Hidden branches are invisible here by construction.
    pub fn public_tip(&self) -> BlockHash {
        let mut ix = 0;
        while let Some(next) = self.nodes[ix].preferred_child {
            ix = next;
        }
        self.nodes[ix].block.hash()
    }

    /// Hashes on the public longest chain, root excluded, in root-to-tip
    /// order.
    pub fn public_chain(&self) -> Vec<BlockHash> {
        let mut hashes = vec![];
        let mut ix = 0;
        while let Some(next) = self.nodes[ix].preferred_child {
            ix = next;
            hashes.push(self.nodes[ix].block.hash());
        }
        hashes
    }

    /// Whether the parent of `block` was inserted privately. Used by the
    /// stubborn strategy's gamma-branch decision.
    pub fn is_previous_block_private(&self, block: &Block) -> bool {
        self.node(block.previous_hash).map_or(false, |n| n.is_private)
    }

    /// Timestamps of up to `limit` blocks walking parent links from (and
    /// including) the block with hash `from`.
    pub fn recent_timestamps(
        &self,
        from: BlockHash,
        limit: usize,
    ) -> Vec<f64> {
        let mut timestamps = vec![];
        let mut cur = self.index.get(&from).copied();
        while let Some(ix) = cur {
            if timestamps.len() >= limit {
                break;
            }
            timestamps.push(self.nodes[ix].block.created_at);
            cur = self.nodes[ix].parent;
        }
        timestamps
    }

    /// Releases every hidden node, collecting its block; the node whose
    /// hash equals `target` (the private tip) rejoins fork-choice with its
    /// length reset and propagated upward. Blocks come back in insertion
    /// order, so ancestors precede descendants.
    pub fn release_hidden(&mut self, target: Option<BlockHash>) -> Vec<Block> {
        let mut released = vec![];
        for ix in 0..self.nodes.len() {
            if !self.nodes[ix].is_hidden {
                continue;
            }
            self.nodes[ix].is_hidden = false;
            released.push(self.nodes[ix].block.clone());
            if Some(self.nodes[ix].block.hash()) == target {
                self.nodes[ix].chain_length = 1;
                self.propagate_lengths(ix);
            }
        }
        released
    }

    /// Releases exactly one hidden node, the first found in insertion
    /// order, and returns its block along with whether it was the branch
    /// tip identified by `target`. Intended for surfacing a single
    /// competing private block against a tying public one.
    pub fn release_one_parallel(
        &mut self,
        target: Option<BlockHash>,
    ) -> Option<(Block, bool)> {
        for ix in 0..self.nodes.len() {
            if !self.nodes[ix].is_hidden {
                continue;
            }
            self.nodes[ix].is_hidden = false;
            self.nodes[ix].chain_length = 1;
            self.propagate_lengths(ix);
            let block = self.nodes[ix].block.clone();
            let was_target = Some(block.hash()) == target;
            return Some((block, was_target));
        }
        None
    }
}
