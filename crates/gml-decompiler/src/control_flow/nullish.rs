//! Nullish coalescing (`a ?? b`).
//!
//! ```text
//! <a>
//! isnullish.e
//! bf [end]
//! popz.v
//! <b>
//! :[end]
//! ```
//!
//! The left operand stays on the stack when it is not nullish; otherwise it
//! is discarded and the right operand is evaluated in its place.

use gmvm::{ExtendedOpcode, Opcode};

use super::{pattern_error, slot, Graph, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

pub fn find_nullish(graph: &mut Graph) -> Result<Vec<NodeId>, ControlFlowError> {
    let mut found = Vec::new();
    for block in graph.blocks.clone() {
        let instructions = graph.instructions(block);
        let n = instructions.len();
        if n < 2
            || !instructions[n - 2].is_extended(ExtendedOpcode::IsNullishValue)
            || instructions[n - 1].opcode != Opcode::Bf
        {
            continue;
        }
        let address = instructions[n - 1].address;
        let target = instructions[n - 1]
            .branch_target()
            .ok_or_else(|| pattern_error("nullish", address, "missing branch target"))?;
        let head_address = graph[block].end;
        let head = graph
            .block_at(head_address)
            .filter(|_| head_address < target)
            .ok_or_else(|| pattern_error("nullish", address, "missing right-hand side"))?;
        if graph.first_instruction(head).map(|i| i.opcode) != Some(Opcode::Popz) {
            return Err(pattern_error("nullish", head_address, "right-hand side does not discard the left"));
        }
        let after = graph
            .block_at(target)
            .ok_or_else(|| pattern_error("nullish", address, "no block after expression"))?;

        graph.strip_last(block, 2);
        graph.strip_first(head, 1);
        graph.disconnect_successors(block);
        graph.disconnect_predecessors(after, |n| n.start >= head_address && n.start < target);

        let node = graph.add(Node::new(NodeKind::Nullish, head_address, target, 1));
        graph.connect(block, node);
        graph.connect(node, after);
        graph.set_child(node, slot::HEAD, Some(head));
        found.push(node);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::block::find_blocks;
    use gmvm::asm::assemble;

    #[test]
    fn nullish_right_side_is_folded() {
        let code = assemble(
            "test",
            "push.v self.a
isnullish.e
bf [end]
popz.v
push.v self.b
:[end]
pop.v.v self.c
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let found = find_nullish(&mut graph).unwrap();
        assert_eq!(found.len(), 1);

        let left = graph.blocks[0];
        assert_eq!(graph.instructions(left).len(), 1);
        let head = graph[found[0]].children[slot::HEAD].unwrap();
        assert_eq!(graph.instructions(head).len(), 1, "popz is stripped");
        assert_eq!(graph.instructions(head)[0].opcode, Opcode::Push);
        assert!(graph[head].successors.is_empty());
    }
}
