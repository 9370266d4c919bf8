//! Blocks and their content-addressed identity.

use std::fmt::{self, Display};

use sha2::{Digest, Sha256};

use crate::transaction::{BlockTxn, NodeId, Transaction, TXN_SIZE_BYTES};

/// Sha256 digest of a block's contents; the block's identity key within
/// every peer's tree.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Placeholder previous-hash of the genesis block.
    pub const GENESIS_PARENT: BlockHash = BlockHash([0; 32]);
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Human-readable block label: the `seq`-th block mined by `miner`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct BlockId {
    pub miner: NodeId,
    pub seq: u64,
}

impl BlockId {
    pub const GENESIS: BlockId = BlockId { miner: NodeId::GENESIS, seq: 0 };
}

impl Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == BlockId::GENESIS {
            write!(f, "blk_genesis")
        } else {
            write!(f, "blk{}_{}", self.miner, self.seq)
        }
    }
}

/// A mined block of transactions.
///
/// The content hash is computed once at construction from
/// `(id, created_at, txns, previous_hash)` and never changes afterwards;
/// blocks are assembled in final form only (see [`PotentialBlock`] for
/// blocks under construction).
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub created_at: f64,
    txns: Vec<BlockTxn>,
    pub previous_hash: BlockHash,
    pub nonce: Option<u64>,
    hash: BlockHash,
}

impl Block {
    pub fn new(
        id: BlockId,
        created_at: f64,
        txns: Vec<BlockTxn>,
        previous_hash: BlockHash,
        nonce: Option<u64>,
    ) -> Self {
        let hash = Self::digest(&id, created_at, &txns, &previous_hash);
        Block { id, created_at, txns, previous_hash, nonce, hash }
    }

    fn digest(
        id: &BlockId,
        created_at: f64,
        txns: &[BlockTxn],
        previous_hash: &BlockHash,
    ) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update((id.miner.0 as u64).to_le_bytes());
        hasher.update(id.seq.to_le_bytes());
        hasher.update(created_at.to_bits().to_le_bytes());
        for txn in txns {
            match txn {
                BlockTxn::Coinbase(cb) => {
                    hasher.update([0u8]);
                    hasher.update(cb.id.0.to_le_bytes());
                    hasher.update((cb.payee.0 as u64).to_le_bytes());
                    hasher.update(cb.created_at.to_bits().to_le_bytes());
                    hasher.update(cb.amount.to_bits().to_le_bytes());
                }
                BlockTxn::Transfer(t) => {
                    hasher.update([1u8]);
                    hasher.update(t.id.0.to_le_bytes());
                    hasher.update((t.drawee.0 as u64).to_le_bytes());
                    hasher.update((t.payee.0 as u64).to_le_bytes());
                    hasher.update(t.created_at.to_bits().to_le_bytes());
                    hasher.update(t.amount.to_bits().to_le_bytes());
                    hasher.update(t.commission.to_bits().to_le_bytes());
                }
            }
        }
        hasher.update(previous_hash.0);
        BlockHash(hasher.finalize().into())
    }

    #[inline]
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    #[inline]
    pub fn txns(&self) -> &[BlockTxn] {
        &self.txns
    }

    /// Block size in bytes: one header unit plus one per transaction.
    pub fn size_bytes(&self) -> u64 {
        (1 + self.txns.len() as u64) * TXN_SIZE_BYTES
    }

    /// The block's coinbase transaction, if its first transaction is one.
    pub fn coinbase(&self) -> Option<&crate::transaction::CoinbaseTxn> {
        match self.txns.first() {
            Some(BlockTxn::Coinbase(cb)) => Some(cb),
            _ => None,
        }
    }

    /// The peer credited by the coinbase transaction.
    pub fn miner(&self) -> Option<NodeId> {
        self.coinbase().map(|cb| cb.payee)
    }

    /// All non-coinbase transactions, in block order.
    pub fn transfers(&self) -> impl Iterator<Item = &Transaction> {
        self.txns.iter().filter_map(|txn| match txn {
            BlockTxn::Transfer(t) => Some(t),
            BlockTxn::Coinbase(_) => None,
        })
    }

    pub fn commission_total(&self) -> f64 {
        self.transfers().map(|t| t.commission).sum()
    }

    /// True if `self` and `other` have no transaction id in common.
    pub fn no_txn_clash(&self, other: &Block) -> bool {
        !self
            .txns
            .iter()
            .any(|a| other.txns.iter().any(|b| a.id() == b.id()))
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Block {}

/// A block under construction by a miner. The finalized [`Block`] (with
/// coinbase and completion timestamp) is only assembled once the mining
/// delay elapses uninterrupted.
#[derive(Debug, Clone)]
pub struct PotentialBlock {
    /// Hash of the chain tip this attempt builds on.
    pub previous_hash: BlockHash,
    /// Transactions selected from the legitimate pool, in timestamp order.
    pub txns: Vec<Transaction>,
    /// Simulated time at which this attempt started.
    pub started_at: f64,
}

impl PotentialBlock {
    /// True if any of this attempt's transactions also appears in `block`.
    pub fn shares_txn_with(&self, block: &Block) -> bool {
        self.txns
            .iter()
            .any(|t| block.txns().iter().any(|b| b.id() == t.id))
    }
}
