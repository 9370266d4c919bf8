//! Mining strategies.
//!
//! A strategy decides what a node does with a newly accepted block:
//! publish it, withhold it on a private branch, or release withheld
//! blocks in response to public progress. State is carried inline so
//! strategies stay plain `Copy` values.

pub mod honest;
pub mod selfish;
pub mod stubborn;

use log::info;

use crate::{node::NodeActor, simulation::Payload, simulation::Scheduler};

/// State of a selfish miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelfishState {
    /// Set while the miner holds exactly one withheld block over a tying
    /// public chain (the primed states of the selfish-mining automaton).
    pub is_prime: bool,
}

/// State of a stubborn miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StubbornState {
    pub is_prime: bool,
    /// Whether the lead was negative when the previous block arrived.
    /// Distinguishes a tie reached from behind from one reached by being
    /// caught up.
    pub crossed_negative: bool,
}

/// Per-node mining policy, tagged with its mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Honest,
    Selfish(SelfishState),
    Stubborn(StubbornState),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Honest => "honest",
            Strategy::Selfish(_) => "selfish",
            Strategy::Stubborn(_) => "stubborn",
        }
    }

    #[inline]
    pub fn is_adversarial(&self) -> bool {
        !matches!(self, Strategy::Honest)
    }
}

/// Freeze hook: adversarial miners surface their withheld branch so the
/// network can converge before the run ends.
pub(crate) fn on_freeze(node: &mut NodeActor, sched: &mut Scheduler) {
    if !node.strategy.is_adversarial() {
        return;
    }
    let released = node.chain.release_private();
    if !released.is_empty() {
        info!(
            "node {}: releasing {} withheld blocks at freeze",
            node.id,
            released.len()
        );
    }
    for block in released {
        node.broadcast(Payload::Block(block), None, sched);
    }
}
