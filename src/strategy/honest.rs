//! The default policy: publish everything, forward everything valid.

use log::debug;

use crate::{
    block::Block,
    node::NodeActor,
    simulation::{Payload, Scheduler},
    transaction::NodeId,
};

pub(crate) fn on_block_arrival(
    node: &mut NodeActor,
    block: Block,
    sent_by: Option<NodeId>,
    sched: &mut Scheduler,
) {
    if let Err(err) = node.chain.insert(block.clone(), false) {
        debug!("node {}: could not insert block {}: {}", node.id, block.id, err);
        return;
    }
    node.broadcast(Payload::Block(block), sent_by, sched);
}
