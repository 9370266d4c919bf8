//! Stubborn mining: a selfish variant that keeps withholding through
//! ties it would otherwise concede.
//!
//! On top of the lead automaton it tracks two extra bits: whether the
//! miner is primed, and whether the lead was negative when the previous
//! block arrived. A tie reached from behind (or one the peers did not
//! build on the released private block) is answered by sticking to the
//! private branch for the next attempt instead of conceding.

use log::debug;

use super::StubbornState;
use crate::{
    block::Block,
    node::NodeActor,
    simulation::{Payload, Scheduler},
    transaction::NodeId,
};

pub(crate) fn on_block_arrival(
    node: &mut NodeActor,
    mut state: StubbornState,
    block: Block,
    sent_by: Option<NodeId>,
    sched: &mut Scheduler,
) -> StubbornState {
    // The lead as of the moment before this block enters the tree.
    let lead = node.chain.lead_metrics().lead();

    match sent_by {
        Some(sender) => {
            match node.chain.is_relevant(block.clone()) {
                Ok(true) => {
                    // Whether the peers built on a block we released.
                    let on_private = node.chain.is_previous_block_private(&block);

                    if lead == 0
                        && state.is_prime
                        && (!on_private || state.crossed_negative)
                    {
                        state.is_prime = false;
                        node.chain.stick_to_private();
                    } else if lead == 0 && state.is_prime && on_private {
                        // The network adopted our released block; the
                        // private branch already leads through it.
                        state.is_prime = false;
                    } else if lead == 0 || lead == -1 {
                        state.is_prime = false;
                        node.interrupt_time = sched.now();
                        node.start_mining(sched);
                    } else {
                        state.is_prime = true;
                        if let Some(withheld) = node.chain.release_one_parallel()
                        {
                            node.broadcast(
                                Payload::Block(withheld),
                                None,
                                sched,
                            );
                        }
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(
                        "node {}: could not insert block {}: {}",
                        node.id, block.id, err
                    );
                    return state;
                }
            }
            node.broadcast(Payload::Block(block), Some(sender), sched);
        }
        None => {
            if lead == 0 && state.is_prime && state.crossed_negative {
                // Caught up from behind: surface everything at once.
                state.is_prime = false;
                if node.chain.insert(block, true).is_ok() {
                    for withheld in node.chain.release_private() {
                        node.broadcast(Payload::Block(withheld), None, sched);
                    }
                }
            } else {
                if lead == 0 && state.is_prime {
                    state.is_prime = false;
                } else if lead == -1 {
                    state.is_prime = true;
                }
                if let Err(err) = node.chain.insert(block, true) {
                    debug!("node {}: private insert failed: {}", node.id, err);
                }
            }
        }
    }

    state.crossed_negative = lead < 0;
    state
}
