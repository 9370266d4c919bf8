//! Per-miner result table derived from a finished run.
//!
//! Chain shares are measured on node 0's final view of the public
//! longest chain.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use crate::{simulation::SimulationOutput, transaction::NodeId};

#[derive(Debug, Clone)]
struct MinerRow {
    id: NodeId,
    strategy: &'static str,
    is_fast: bool,
    hash_power: f64,
    blocks_mined: u64,
    blocks_in_chain: usize,
    chain_share: f64,
}

/// Tabulated per-miner outcome of a run; [`Display`] renders it as CSV.
#[derive(Debug, Clone)]
pub struct SimulationResults {
    rows: Vec<MinerRow>,
    canonical_length: usize,
}

impl SimulationResults {
    pub fn new(output: &SimulationOutput) -> Self {
        let miners = output
            .chains
            .first()
            .map(|chain| chain.longest_chain_miners())
            .unwrap_or_default();
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for miner in &miners {
            *counts.entry(*miner).or_insert(0) += 1;
        }
        let canonical_length = miners.len();

        let rows = output
            .stats
            .iter()
            .enumerate()
            .map(|(i, stats)| {
                let id = NodeId(i);
                let blocks_in_chain = counts.get(&id).copied().unwrap_or(0);
                let chain_share = if canonical_length == 0 {
                    0.0
                } else {
                    blocks_in_chain as f64 / canonical_length as f64
                };
                MinerRow {
                    id,
                    strategy: output.strategies[i],
                    is_fast: stats.is_fast,
                    hash_power: stats.hash_power,
                    blocks_mined: stats.blocks_mined,
                    blocks_in_chain,
                    chain_share,
                }
            })
            .collect();

        SimulationResults { rows, canonical_length }
    }

    /// Length of the canonical chain the shares are measured against.
    #[inline]
    pub fn canonical_length(&self) -> usize {
        self.canonical_length
    }

    /// Fraction of the canonical chain mined by `id`.
    pub fn chain_share(&self, id: NodeId) -> f64 {
        self.rows
            .iter()
            .find(|row| row.id == id)
            .map_or(0.0, |row| row.chain_share)
    }
}

impl Display for SimulationResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "miner,strategy,is_fast,hash_power,blocks_mined,blocks_in_chain,chain_share"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{},{},{},{:.6},{},{},{:.6}",
                row.id,
                row.strategy,
                row.is_fast,
                row.hash_power,
                row.blocks_mined,
                row.blocks_in_chain,
                row.chain_share
            )?;
        }
        Ok(())
    }
}
