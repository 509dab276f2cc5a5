//! Basic block construction.

use std::collections::{BTreeSet, HashMap};

use gmvm::{CodeEntry, Instruction, Opcode};

use super::{Graph, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

pub(crate) const TRY_HOOK: &str = "@@try_hook@@";
pub(crate) const FINISH_FINALLY: &str = "@@finish_finally@@";

/// A try hook operand as a code address. Negative operands mean "none".
pub(crate) fn hook_address(inst: &Instruction) -> Result<Option<u32>, ControlFlowError> {
    match inst.int_value() {
        Some(value) if value >= 0 => u32::try_from(value)
            .map(Some)
            .map_err(|_| ControlFlowError::AddressOutOfRange {
                address: inst.address,
                value,
            }),
        _ => Ok(None),
    }
}

/// Addresses where a new block must begin.
fn find_block_starts(code: &CodeEntry) -> Result<BTreeSet<u32>, ControlFlowError> {
    let instructions = &code.instructions;
    let mut starts = BTreeSet::new();
    starts.insert(0);
    starts.insert(code.length);
    for child in code.descendants() {
        starts.insert(child.start_offset);
    }

    for (i, inst) in instructions.iter().enumerate() {
        match inst.opcode {
            Opcode::B | Opcode::Bt | Opcode::Bf | Opcode::PushEnv | Opcode::PopEnv => {
                if let Some(target) = inst.branch_target() {
                    starts.insert(target);
                }
                starts.insert(inst.end_address());
            }
            Opcode::Ret | Opcode::Exit => {
                starts.insert(inst.end_address());
            }
            Opcode::Call if inst.is_call_to(TRY_HOOK) => {
                // push.i FIN; conv; push.i CATCH; conv; call @@try_hook@@; popz
                if let Some(popz) = instructions.get(i + 1).filter(|p| p.opcode == Opcode::Popz) {
                    starts.insert(popz.end_address());
                }
                for back in [4, 2] {
                    let target = i.checked_sub(back).map(|j| hook_address(&instructions[j])).transpose()?;
                    if let Some(target) = target.flatten() {
                        starts.insert(target);
                    }
                }
            }
            Opcode::Call if inst.is_call_to(FINISH_FINALLY) => {
                if let Some(popz) = instructions.get(i + 1).filter(|p| p.opcode == Opcode::Popz) {
                    starts.insert(popz.end_address());
                }
            }
            _ => {}
        }
    }
    Ok(starts)
}

/// Split a root code entry's instructions into basic blocks and wire their
/// edges.
///
/// Blocks tile `[0, length)` exactly; an extra empty block sits at `length`
/// so that branches to the end of the code have a target. Blocks nothing
/// branches or falls into are marked unreachable and chained after the
/// preceding block, so that dead code stays on some path and gets printed.
pub fn find_blocks(code: &CodeEntry) -> Result<Graph, ControlFlowError> {
    let found = code.instructions.last().map(Instruction::end_address).unwrap_or(0);
    if found != code.length {
        return Err(ControlFlowError::LengthMismatch {
            expected: code.length,
            found,
        });
    }

    let starts = find_block_starts(code)?;
    let mut graph = Graph::new(code.length);
    let mut by_start: HashMap<u32, NodeId> = HashMap::new();

    let mut current: Vec<Instruction> = Vec::new();
    let mut current_start = 0u32;
    for inst in &code.instructions {
        if starts.contains(&inst.address) && inst.address != current_start {
            let block = std::mem::take(&mut current);
            let id = graph.add(Node::new(
                NodeKind::Block { instructions: block },
                current_start,
                inst.address,
                0,
            ));
            graph.blocks.push(id);
            by_start.insert(current_start, id);
            current_start = inst.address;
        }
        current.push(inst.clone());
    }
    if !current.is_empty() {
        let id = graph.add(Node::new(
            NodeKind::Block { instructions: current },
            current_start,
            code.length,
            0,
        ));
        graph.blocks.push(id);
        by_start.insert(current_start, id);
    }
    let end = graph.add(Node::new(
        NodeKind::Block { instructions: Vec::new() },
        code.length,
        code.length,
        0,
    ));
    graph.blocks.push(end);
    by_start.insert(code.length, end);

    // Every split point has to land on an instruction boundary.
    for &start in &starts {
        if !by_start.contains_key(&start) {
            return Err(ControlFlowError::MissingBlock {
                address: start,
                target: start,
            });
        }
    }

    let lookup = |address: u32, target: u32| {
        by_start
            .get(&target)
            .copied()
            .ok_or(ControlFlowError::MissingBlock { address, target })
    };

    for index in 0..graph.blocks.len() {
        let block = graph.blocks[index];
        let node = &graph[block];
        let fall = node.end;
        let Some(last) = node.instructions().last() else {
            if fall < code.length {
                let next = lookup(fall, fall)?;
                graph.connect(block, next);
            }
            continue;
        };
        let last = last.clone();
        let targets: Vec<NodeId> = match last.opcode {
            Opcode::B => {
                let target = last.branch_target().unwrap_or(fall);
                vec![lookup(last.address, target)?]
            }
            Opcode::Bt | Opcode::Bf | Opcode::PushEnv => {
                let target = last.branch_target().unwrap_or(fall);
                vec![lookup(last.address, fall)?, lookup(last.address, target)?]
            }
            Opcode::Ret | Opcode::Exit => Vec::new(),
            // popenv's back edge to the body is implied by the with loop
            _ => vec![lookup(last.address, fall)?],
        };
        for target in targets {
            graph.connect(block, target);
        }
    }

    for index in 1..graph.blocks.len() {
        let block = graph.blocks[index];
        if graph[block].predecessors.is_empty() {
            let previous = graph.blocks[index - 1];
            graph[block].unreachable = true;
            graph.connect(previous, block);
        }
    }

    log::trace!("{}: {} blocks", code.name, graph.blocks.len());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmvm::asm::assemble;
    use gmvm::Operand;

    fn starts(graph: &Graph) -> Vec<(u32, u32)> {
        graph.blocks.iter().map(|&b| (graph[b].start, graph[b].end)).collect()
    }

    #[test]
    fn blocks_tile_the_code() {
        // if (a) b = 1 else b = 2
        let code = assemble(
            "test",
            "push.v self.a
conv.v.b
bf [else]
pushi.e 1
pop.v.i self.b
b [end]
:[else]
pushi.e 2
pop.v.i self.b
",
        )
        .unwrap();
        let graph = find_blocks(&code).unwrap();
        let tiles = starts(&graph);
        assert_eq!(tiles.first().map(|t| t.0), Some(0));
        for pair in tiles.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "blocks must be contiguous");
        }
        assert_eq!(tiles.last(), Some(&(code.length, code.length)));
    }

    #[test]
    fn conditional_edges_put_fall_through_first() {
        let code = assemble("test", "push.v self.a\nbf [end]\npush.v self.b\npopz.v\n").unwrap();
        let graph = find_blocks(&code).unwrap();
        let first = graph.blocks[0];
        let succs = &graph[first].successors;
        assert_eq!(succs.len(), 2);
        assert_eq!(graph[succs[0]].start, 12);
        assert_eq!(graph[succs[1]].start, code.length);
    }

    #[test]
    fn dead_code_is_chained_as_unreachable() {
        let code = assemble("test", "exit.i\npush.v self.a\npopz.v\n").unwrap();
        let graph = find_blocks(&code).unwrap();
        let dead = graph.blocks[1];
        assert!(graph[dead].unreachable);
        assert_eq!(graph[graph.blocks[0]].successors, vec![dead]);
        assert!(!graph[graph.blocks[0]].unreachable);
    }

    #[test]
    fn mismatched_length_is_rejected() {
        let mut code = assemble("test", "exit.i\n").unwrap();
        code.length += 4;
        assert!(matches!(
            find_blocks(&code),
            Err(ControlFlowError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn branch_into_instruction_middle_is_rejected() {
        let mut code = assemble("test", "b [end]\npush.i 5\npopz.i\n").unwrap();
        code.instructions[0].operand = Operand::Branch(6);
        assert!(matches!(
            find_blocks(&code),
            Err(ControlFlowError::MissingBlock { .. })
        ));
    }

    #[test]
    fn finish_finally_ends_a_block() {
        let code = assemble(
            "test",
            "call.i cleanup 0
popz.v
call.i @@finish_finally@@ 0
popz.v
call.i after 0
popz.v
exit.i
",
        )
        .unwrap();
        let graph = find_blocks(&code).unwrap();
        let first = graph.blocks[0];
        assert_eq!(graph[first].end, 24);
        assert_eq!(graph.instructions(first).len(), 4);
        assert_eq!(graph.instructions(graph.blocks[1])[0].function_name(), Some("after"));
    }

    #[test]
    fn oversized_try_hook_address_is_rejected() {
        let mut code = assemble(
            "test",
            "push.i 0
conv.i.v
push.i -1
conv.i.v
call.i @@try_hook@@ 2
popz.v
exit.i
",
        )
        .unwrap();
        code.instructions[0].operand = Operand::Int64(1 << 40);
        assert!(matches!(
            find_blocks(&code),
            Err(ControlFlowError::AddressOutOfRange { address: 0, .. })
        ));
    }
}
