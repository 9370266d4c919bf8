//! Selfish mining: withhold mined blocks on a private branch and release
//! them only when public progress threatens the lead.
//!
//! The arrival policy is the classic state machine over
//! `lead = private - public`:
//!
//! * a public block at lead 0 means the race was lost, mine on publicly;
//! * a public block at lead 2 triggers a full release, overtaking the
//!   public chain by one;
//! * any other public progress is contested by releasing a single
//!   withheld block in parallel;
//! * a self-mined block at lead 0 in the primed state is published, every
//!   other self-mined block joins the private branch.

use log::debug;

use super::SelfishState;
use crate::{
    block::Block,
    node::NodeActor,
    simulation::{Payload, Scheduler},
    transaction::NodeId,
};

pub(crate) fn on_block_arrival(
    node: &mut NodeActor,
    mut state: SelfishState,
    block: Block,
    sent_by: Option<NodeId>,
    sched: &mut Scheduler,
) -> SelfishState {
    // The lead as of the moment before this block enters the tree.
    let lead = node.chain.lead_metrics().lead();

    let sender = match sent_by {
        Some(sender) => sender,
        None => {
            if lead == 0 && state.is_prime {
                state.is_prime = false;
                if node.chain.insert(block.clone(), false).is_ok() {
                    node.broadcast(Payload::Block(block), None, sched);
                }
            } else if let Err(err) = node.chain.insert(block, true) {
                debug!("node {}: private insert failed: {}", node.id, err);
            }
            return state;
        }
    };

    match node.chain.is_relevant(block.clone()) {
        Ok(true) => {
            if lead == 0 {
                state.is_prime = false;
            } else if lead == 2 {
                state.is_prime = false;
                for withheld in node.chain.release_private() {
                    node.broadcast(Payload::Block(withheld), None, sched);
                }
            } else {
                state.is_prime = true;
                if let Some(withheld) = node.chain.release_one_parallel() {
                    node.broadcast(Payload::Block(withheld), None, sched);
                }
            }
        }
        Ok(false) => {}
        Err(err) => {
            debug!("node {}: could not insert block {}: {}", node.id, block.id, err);
            return state;
        }
    }

    node.broadcast(Payload::Block(block), Some(sender), sched);
    state
}
