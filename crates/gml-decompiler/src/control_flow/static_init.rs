//! `static` variable initialization blocks.
//!
//! ```text
//! isstaticok.e
//! bt [done]
//! ...initializers...
//! setstatic.e
//! :[done]
//! ```

use gmvm::{ExtendedOpcode, Opcode};

use super::{pattern_error, slot, Graph, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

pub fn find_static_inits(graph: &mut Graph) -> Result<Vec<NodeId>, ControlFlowError> {
    let mut found = Vec::new();
    for block in graph.blocks.clone() {
        let instructions = graph.instructions(block);
        let n = instructions.len();
        if n < 2
            || !instructions[n - 2].is_extended(ExtendedOpcode::HasStaticInitialized)
            || instructions[n - 1].opcode != Opcode::Bt
        {
            continue;
        }
        let guard_address = instructions[n - 1].address;
        let target = instructions[n - 1]
            .branch_target()
            .ok_or_else(|| pattern_error("static init", guard_address, "missing branch target"))?;
        let head_address = graph[block].end;
        let after = graph
            .block_at(target)
            .ok_or_else(|| pattern_error("static init", guard_address, "no block after initializer"))?;

        graph.strip_last(block, 2);
        graph.disconnect_successors(block);
        if let Some(last) = graph.block_ending_at(target).filter(|&b| b != block) {
            if graph
                .last_instruction(last)
                .is_some_and(|i| i.is_extended(ExtendedOpcode::SetStaticInitialized))
            {
                graph.strip_last(last, 1);
            }
        }

        let head = if head_address < target {
            graph.block_at(head_address)
        } else {
            None
        };
        graph.disconnect_predecessors(after, |n| n.start >= head_address && n.start < target);

        let node = graph.add(Node::new(NodeKind::StaticInit, head_address, target, 1));
        graph.connect(block, node);
        graph.connect(node, after);
        graph.set_child(node, slot::HEAD, head);
        found.push(node);
    }
    Ok(found)
}
