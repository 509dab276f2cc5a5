//! Short-circuit `&&` / `||` chains.
//!
//! ```text
//! <a> bf [false]      <a> bt [true]
//! <b> bf [false]      <b> bt [true]
//! <c> b [done]        <c> b [done]
//! :[false]            :[true]
//! push.e 0            push.e 1
//! :[done]             :[done]
//! ```
//!
//! Every operand but the last jumps to the block pushing the constant
//! result; the last one jumps over it. The constant is pushed with `push.e`,
//! never `pushi.e`, which keeps this apart from ordinary integer pushes.

use gmvm::{DataType, Opcode};

use super::{pattern_error, Graph, Node, NodeId, NodeKind, ShortCircuitKind};
use crate::error::ControlFlowError;

/// The short-circuit kind if `block` is a lone `push.e 0`/`push.e 1`.
fn result_push(graph: &Graph, block: NodeId) -> Option<ShortCircuitKind> {
    match graph.instructions(block) {
        [push] if push.opcode == Opcode::Push && push.type1 == DataType::Int16 => {
            match push.int_value()? {
                0 => Some(ShortCircuitKind::And),
                _ => Some(ShortCircuitKind::Or),
            }
        }
        _ => None,
    }
}

fn ends_with_jump_to(graph: &Graph, node: NodeId, opcode: Opcode, target: u32) -> bool {
    graph
        .last_instruction(node)
        .is_some_and(|i| i.opcode == opcode && i.branch_target() == Some(target))
}

/// Fold each chain into a short-circuit node spliced in at its first
/// operand block.
///
/// Child 0 is the block ending the first operand. Child `i` starts at the
/// fall-through of operand `i - 1` and runs up to the block that ended with
/// operand `i`'s jump, now stripped and without successors.
pub fn find_short_circuits(graph: &mut Graph) -> Result<Vec<NodeId>, ControlFlowError> {
    let mut found = Vec::new();
    for push_block in graph.blocks.clone() {
        let Some(kind) = result_push(graph, push_block) else {
            continue;
        };
        let push_start = graph[push_block].start;
        let jump = match kind {
            ShortCircuitKind::And => Opcode::Bf,
            ShortCircuitKind::Or => Opcode::Bt,
        };
        let mut operands = graph[push_block].predecessors.clone();
        if operands.is_empty()
            || !operands
                .iter()
                .all(|&p| ends_with_jump_to(graph, p, jump, push_start))
        {
            continue;
        }
        operands.sort_by_key(|&p| graph[p].start);
        operands.dedup();

        let last = graph
            .blocks
            .iter()
            .copied()
            .take_while(|&b| b != push_block)
            .last()
            .ok_or_else(|| pattern_error("short-circuit", push_start, "no final operand"))?;
        let done = graph
            .block_at(graph[push_block].end)
            .ok_or_else(|| pattern_error("short-circuit", push_start, "no block after result"))?;
        if !ends_with_jump_to(graph, last, Opcode::B, graph[done].start) {
            return Err(pattern_error(
                "short-circuit",
                push_start,
                "final operand does not jump past the result",
            ));
        }

        let mut children = vec![operands[0]];
        for &operand in &operands {
            let fall = graph[operand]
                .successors
                .first()
                .copied()
                .ok_or_else(|| pattern_error("short-circuit", graph[operand].start, "operand has no fall-through"))?;
            children.push(fall);
        }

        for &operand in &operands {
            graph.strip_last(operand, 1);
            graph.disconnect_successors(operand);
        }
        graph.strip_last(last, 1);
        graph.disconnect_successors(last);
        graph.disconnect_successors(push_block);

        let first = operands[0];
        let start = graph[first].start;
        let node = graph.add(Node::new(
            NodeKind::ShortCircuit(kind),
            start,
            graph[done].start,
            children.len(),
        ));
        graph.redirect_predecessors(first, node, |_| true);
        graph.connect(node, done);
        graph.replace_in_parent(first, node);
        for (slot, child) in children.into_iter().enumerate() {
            graph.set_child(node, slot, Some(child));
        }
        log::trace!("{kind:?} chain at {start:#x}");
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
    fn three_operand_and_has_three_children() {
        // x = a && b && c
        let code = assemble(
            "test",
            "push.v self.a
conv.v.b
bf [false]
push.v self.b
conv.v.b
bf [false]
push.v self.c
conv.v.b
b [done]
:[false]
push.e 0
:[done]
pop.v.b self.x
exit.i
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let found = find_short_circuits(&mut graph).unwrap();
        assert_eq!(found.len(), 1);
        let node = found[0];
        assert!(matches!(graph[node].kind, NodeKind::ShortCircuit(ShortCircuitKind::And)));
        assert_eq!(graph[node].children.len(), 3);
        for child in graph[node].children.iter().flatten() {
            let last = graph.last_instruction(*child).unwrap();
            assert_eq!(last.opcode, Opcode::Conv, "branches are stripped");
            assert!(graph[*child].successors.is_empty());
        }
        let done = graph[node].successors[0];
        assert_eq!(graph.instructions(done)[0].opcode, Opcode::Pop);
    }

    #[test]
    fn or_chain_uses_bt() {
        let code = assemble(
            "test",
            "push.v self.a
conv.v.b
bt [true]
push.v self.b
conv.v.b
b [done]
:[true]
push.e 1
:[done]
popz.b
exit.i
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let found = find_short_circuits(&mut graph).unwrap();
        assert!(matches!(graph[found[0]].kind, NodeKind::ShortCircuit(ShortCircuitKind::Or)));
        assert_eq!(graph[found[0]].children.len(), 2);
    }

    #[test]
    fn pushi_constant_is_not_a_short_circuit() {
        let code = assemble(
            "test",
            "push.v self.a
conv.v.b
bf [zero]
pushi.e 1
b [done]
:[zero]
pushi.e 0
:[done]
pop.v.i self.x
exit.i
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        assert!(find_short_circuits(&mut graph).unwrap().is_empty());
    }
}
