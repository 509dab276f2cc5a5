//! try / catch / finally.
//!
//! ```text
//! push.i [fin]; conv.i.v; push.i [catch]; conv.i.v    ; catch is -1 without a catch block
//! call.i @@try_hook@@ 2; popz.v
//! <try>
//! call.i @@try_unhook@@ 0; popz.v; b [fin]
//! :[catch]
//! pop.v.v local.e; call.i @@try_unhook@@ 0; popz.v    ; in either order
//! <catch>
//! b [fin]
//! :[fin]
//! <finally>
//! call.i @@finish_finally@@ 0; popz.v
//! ```
//!
//! Games built before the 2024.6 runtime place the finally body first and
//! jump over the catch when it completes:
//!
//! ```text
//! <try>; call.i @@try_unhook@@ 0; popz.v; b [fin]
//! :[fin]
//! <finally>
//! call.i @@finish_finally@@ 0; popz.v; b [after]
//! :[catch]
//! pop.v.v local.e; call.i @@try_unhook@@ 0; popz.v
//! <catch>
//! b [fin]
//! :[after]
//! ```

use gmvm::{Opcode, Operand};

use super::block::{hook_address, FINISH_FINALLY, TRY_HOOK};
use super::{pattern_error, slot, Graph, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

const TRY_UNHOOK: &str = "@@try_unhook@@";

fn ends_with_call(graph: &Graph, block: NodeId, name: &str) -> bool {
    match graph.instructions(block) {
        [.., call, popz] => call.is_call_to(name) && popz.opcode == Opcode::Popz,
        _ => false,
    }
}

/// Strip `[call name; popz]` and a trailing `b` from the end of a block.
fn strip_exit_sequence(graph: &mut Graph, block: NodeId) {
    if graph.last_instruction(block).is_some_and(|i| i.opcode == Opcode::B) {
        graph.strip_last(block, 1);
    }
    if ends_with_call(graph, block, TRY_UNHOOK) {
        graph.strip_last(block, 2);
    }
}

/// Strip the catch prologue and return the catch variable's name.
fn strip_catch_prologue(graph: &mut Graph, block: NodeId) -> Option<String> {
    let mut name = None;
    loop {
        let (strip, variable) = match graph.instructions(block) {
            [pop, ..] if pop.opcode == Opcode::Pop && name.is_none() => match &pop.operand {
                Operand::Variable(var) => (1, Some(var.name.clone())),
                _ => break,
            },
            [call, popz, ..] if call.is_call_to(TRY_UNHOOK) && popz.opcode == Opcode::Popz => (2, None),
            _ => break,
        };
        if variable.is_some() {
            name = variable;
        }
        graph.strip_first(block, strip);
    }
    name
}

/// The block closing a finally body: the first `@@finish_finally@@` from
/// `from`, stopping short of `limit` and of the next try.
fn find_finally_end(graph: &Graph, from: u32, limit: u32) -> Option<NodeId> {
    graph
        .blocks
        .iter()
        .copied()
        .filter(|&b| graph[b].start >= from && graph[b].end <= limit)
        .take_while(|&b| !ends_with_call(graph, b, TRY_HOOK))
        .find(|&b| ends_with_call(graph, b, FINISH_FINALLY))
}

/// Fold every try hook into a try node. `older_layout` selects the
/// finally-before-catch ordering of pre-2024.6 games.
pub fn find_try_catch(graph: &mut Graph, older_layout: bool) -> Result<Vec<NodeId>, ControlFlowError> {
    let mut found = Vec::new();
    for block in graph.blocks.clone() {
        let instructions = graph.instructions(block);
        let n = instructions.len();
        if n < 6 || !ends_with_call(graph, block, TRY_HOOK) {
            continue;
        }
        let address = instructions[n - 2].address;
        let finally_address =
            hook_address(&instructions[n - 6])?.ok_or_else(|| pattern_error("try", address, "no finally address"))?;
        let catch_address = hook_address(&instructions[n - 4])?;
        if catch_address.is_some_and(|c| (c > finally_address) != older_layout) {
            return Err(pattern_error(
                "try",
                address,
                "catch and finally are out of order for this exception layout",
            ));
        }
        graph.strip_last(block, 6);

        let body_start = graph[block].end;
        let body = graph
            .block_at(body_start)
            .ok_or_else(|| pattern_error("try", address, "no try body"))?;
        let try_end_address = match catch_address {
            Some(catch) if !older_layout => catch,
            _ => finally_address,
        };
        let try_end = graph
            .block_ending_at(try_end_address)
            .ok_or_else(|| pattern_error("try", address, "try body does not end at a block boundary"))?;
        strip_exit_sequence(graph, try_end);
        graph.disconnect_successors(try_end);

        let finally_limit = match catch_address {
            Some(catch) if older_layout => catch,
            _ => graph.code_length,
        };
        let (finally_head, mut end_address) = match find_finally_end(graph, finally_address, finally_limit) {
            Some(finally_end) => {
                graph.strip_last(finally_end, 2);
                graph.disconnect_successors(finally_end);
                let end = graph[finally_end].end;
                let head = graph.block_at(finally_address).filter(|_| finally_address < end);
                (head, end)
            }
            None => (None, finally_address),
        };

        // Older layout: the finally body jumps over the catch.
        if older_layout && catch_address.is_some() {
            let jump = graph.block_at(end_address);
            let target = jump.and_then(|j| match graph.instructions(j) {
                [b] if b.opcode == Opcode::B => b.branch_target().filter(|&t| t > end_address),
                _ => None,
            });
            if let (Some(jump), Some(target)) = (jump, target) {
                graph.strip_last(jump, 1);
                graph.disconnect_successors(jump);
                end_address = target;
            }
        }

        let mut catch_variable = None;
        let catch_head = match catch_address {
            Some(catch_address) => {
                let head = graph
                    .block_at(catch_address)
                    .ok_or_else(|| pattern_error("try", catch_address, "no catch block"))?;
                catch_variable = strip_catch_prologue(graph, head);
                graph[head].unreachable = false;
                graph.disconnect_predecessors(head, |_| true);
                let catch_end_address = if older_layout { end_address } else { finally_address };
                let catch_end = graph
                    .block_ending_at(catch_end_address)
                    .ok_or_else(|| pattern_error("try", catch_address, "catch does not end at a block boundary"))?;
                if graph.last_instruction(catch_end).is_some_and(|i| i.opcode == Opcode::B) {
                    graph.strip_last(catch_end, 1);
                }
                graph.disconnect_successors(catch_end);
                Some(head)
            }
            None => None,
        };

        let after = graph
            .block_at(end_address)
            .ok_or_else(|| pattern_error("try", address, "no block after try"))?;
        graph.disconnect_successors(block);
        graph.disconnect_predecessors(after, |n| n.start >= body_start && n.start < end_address);

        let node = graph.add(Node::new(
            NodeKind::TryCatch { catch_variable },
            body_start,
            end_address,
            3,
        ));
        graph.connect(block, node);
        graph.connect(node, after);
        graph.set_child(node, slot::TRY, Some(body));
        graph.set_child(node, slot::CATCH, catch_head);
        graph.set_child(node, slot::FINALLY, finally_head);
        log::trace!("try at {body_start:#x}..{end_address:#x}");
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
    fn try_catch_strips_hooks_and_names_variable() {
        let code = assemble(
            "test",
            "push.i 96
conv.i.v
push.i 64
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[catch]
pop.v.v local.err
call.i @@try_unhook@@ 0
popz.v
call.i recover 0
popz.v
:[fin]
exit.i
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let found = find_try_catch(&mut graph, false).unwrap();
        assert_eq!(found.len(), 1);
        let node = found[0];
        let NodeKind::TryCatch { catch_variable } = &graph[node].kind else {
            panic!("expected try node");
        };
        assert_eq!(catch_variable.as_deref(), Some("err"));

        let hook = graph.blocks[0];
        assert!(graph.instructions(hook).is_empty());
        assert_eq!(graph[hook].successors, vec![node]);

        let body = graph[node].children[slot::TRY].unwrap();
        assert_eq!(graph.instructions(body).len(), 2);
        let catch = graph[node].children[slot::CATCH].unwrap();
        assert_eq!(graph.instructions(catch).len(), 2);
        assert!(!graph[catch].unreachable);
        assert!(graph[node].children[slot::FINALLY].is_none());
        assert!(graph[body].successors.is_empty());
        assert!(graph[catch].successors.is_empty());
    }

    #[test]
    fn try_finally_attaches_finally_body() {
        // try { risky(); } finally { cleanup(); } after();
        let code = assemble(
            "test",
            "push.i 64
conv.i.v
push.i -1
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[fin]
call.i cleanup 0
popz.v
call.i @@finish_finally@@ 0
popz.v
call.i after 0
popz.v
exit.i
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let node = find_try_catch(&mut graph, false).unwrap()[0];
        assert!(graph[node].children[slot::CATCH].is_none());
        let finally = graph[node].children[slot::FINALLY].unwrap();
        let calls: Vec<_> = graph.instructions(finally).iter().filter_map(|i| i.function_name()).collect();
        assert_eq!(calls, vec!["cleanup"]);
        assert!(graph[finally].successors.is_empty());
        assert_eq!(graph[node].end, 88);
        let after = graph[node].successors[0];
        assert_eq!(graph.instructions(after)[0].function_name(), Some("after"));
    }

    const OLDER_LAYOUT: &str = "push.i 64
conv.i.v
push.i 92
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[fin]
call.i cleanup 0
popz.v
call.i @@finish_finally@@ 0
popz.v
b [after]
:[catch]
pop.v.v local.err
call.i @@try_unhook@@ 0
popz.v
call.i recover 0
popz.v
b [fin]
:[after]
exit.i
";

    #[test]
    fn older_layout_runs_finally_before_catch() {
        let code = assemble("test", OLDER_LAYOUT).unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let node = find_try_catch(&mut graph, true).unwrap()[0];
        let NodeKind::TryCatch { catch_variable } = &graph[node].kind else {
            panic!("expected try node");
        };
        assert_eq!(catch_variable.as_deref(), Some("err"));
        let catch = graph[node].children[slot::CATCH].unwrap();
        assert_eq!(graph.instructions(catch)[0].function_name(), Some("recover"));
        assert_eq!(graph.instructions(catch).len(), 2);
        let finally = graph[node].children[slot::FINALLY].unwrap();
        assert_eq!(graph.instructions(finally).len(), 2);
        assert_eq!(graph[node].end, 128);
        let after = graph[node].successors[0];
        assert_eq!(graph.instructions(after)[0].opcode, Opcode::Exit);
    }

    #[test]
    fn handler_order_must_match_the_exception_layout() {
        let code = assemble("test", OLDER_LAYOUT).unwrap();
        let mut graph = find_blocks(&code).unwrap();
        assert!(matches!(
            find_try_catch(&mut graph, false),
            Err(ControlFlowError::Pattern { construct: "try", .. })
        ));
    }
}
