//! Convenience re-exports of the types most runs need.

pub use crate::block::{Block, BlockHash, BlockId};
pub use crate::chain::{Chain, ChainLengths, ValidationError};
pub use crate::config::SimulationConfig;
pub use crate::node::MinerStats;
pub use crate::simulation::{
    Simulation, SimulationBuildError, SimulationBuilder, SimulationGroup,
    SimulationOutput, SimulationResults,
};
pub use crate::strategy::{SelfishState, Strategy, StubbornState};
pub use crate::transaction::{NodeId, Transaction, TxnId};
