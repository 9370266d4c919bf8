//! Ledger primitives: transfers, coinbase rewards, and the identifiers
//! they are keyed by.

use std::fmt::{self, Display};

/// Nominal size of a single transaction in bytes, used for latency
/// computation only.
pub const TXN_SIZE_BYTES: u64 = 1_000;

/// A unique identifier assigned to each simulated peer.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Sentinel drawee for genesis seed transactions, which are credited
    /// without debiting anyone.
    pub const GENESIS: NodeId = NodeId(usize::MAX);
}

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        NodeId(value)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NodeId::GENESIS {
            write!(f, "genesis")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A unique identifier assigned to each transaction.
///
/// Coinbase ids are carved out of a disjoint range (top bit set) so that
/// transfer and coinbase ids never collide in block clash checks.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TxnId(pub u64);

impl TxnId {
    const COINBASE_BIT: u64 = 1 << 63;

    /// Id of the coinbase transaction in the `seq`-th block mined by `node`.
    pub fn coinbase(node: NodeId, seq: u64) -> Self {
        TxnId(Self::COINBASE_BIT | ((node.0 as u64) << 32) | seq)
    }
}

impl From<u64> for TxnId {
    fn from(value: u64) -> Self {
        TxnId(value)
    }
}

impl Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 & Self::COINBASE_BIT != 0 {
            write!(f, "cb{}", self.0 & !Self::COINBASE_BIT)
        } else {
            write!(f, "tx{}", self.0)
        }
    }
}

/// A value transfer between two accounts. The stored `amount` is net of
/// the commission paid to the miner.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: TxnId,
    pub drawee: NodeId,
    pub payee: NodeId,
    /// Generation time.
    pub created_at: f64,
    /// Amount credited to the payee, net of commission.
    pub amount: f64,
    pub commission: f64,
}

impl Transaction {
    /// Creates a transfer of `gross` value from `drawee` to `payee`;
    /// `commission` is deducted from the gross amount.
    pub fn new(
        id: TxnId,
        drawee: NodeId,
        payee: NodeId,
        created_at: f64,
        gross: f64,
        commission: f64,
    ) -> Self {
        Transaction {
            id,
            drawee,
            payee,
            created_at,
            amount: gross - commission,
            commission,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        TXN_SIZE_BYTES
    }
}

/// The mining reward transaction. Exactly one per mined block, always
/// first, crediting the miner with the block's commissions plus the fixed
/// mining fee.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinbaseTxn {
    pub id: TxnId,
    pub payee: NodeId,
    /// Generation time.
    pub created_at: f64,
    pub amount: f64,
}

impl CoinbaseTxn {
    pub fn size_bytes(&self) -> u64 {
        TXN_SIZE_BYTES
    }
}

/// A transaction as it appears inside a block's ordered transaction list.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockTxn {
    Coinbase(CoinbaseTxn),
    Transfer(Transaction),
}

impl BlockTxn {
    pub fn id(&self) -> TxnId {
        match self {
            BlockTxn::Coinbase(cb) => cb.id,
            BlockTxn::Transfer(txn) => txn.id,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, BlockTxn::Coinbase(_))
    }

    pub fn size_bytes(&self) -> u64 {
        TXN_SIZE_BYTES
    }
}
