//! if / else, and the break/continue jumps left inside loops.
//!
//! ```text
//! <cond> bf [else]
//! <true> b [after]      ; absent without an else
//! :[else]
//! <else>
//! :[after]
//! ```
//!
//! Ternaries compile to the same shape; the AST builder tells them apart by
//! what each branch leaves on the stack.

use std::collections::HashSet;

use gmvm::Opcode;

use super::{pattern_error, slot, Graph, LoopKind, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

/// Turn a block's trailing `b` into an edge to a fresh break/continue node.
fn convert_jump(graph: &mut Graph, block: NodeId, kind: NodeKind) -> NodeId {
    graph.strip_last(block, 1);
    graph.disconnect_successors(block);
    let address = graph[block].end;
    let node = graph.add(Node::new(kind, address, address, 0));
    graph.connect(block, node);
    node
}

/// Whether the `b` ending `block` closes the true branch of an if/else
/// rather than continuing to `target`.
///
/// `if (a) { x(); } else { y(); }` as the last statement of a loop body
/// compiles to the same code as `if (a) { x(); continue; } y();`; the
/// if/else reading wins unless the jump is the whole branch or an
/// enclosing if ends before `target`.
fn ends_true_branch(graph: &Graph, block: NodeId, target: u32, loop_start: u32) -> bool {
    let (start, end) = (graph[block].start, graph[block].end);
    let false_target = |n: NodeId| {
        graph
            .last_instruction(n)
            .filter(|i| i.opcode == Opcode::Bf)
            .and_then(|i| i.branch_target())
    };
    let before: Vec<NodeId> = graph
        .blocks
        .iter()
        .copied()
        .filter(|&n| (loop_start..start).contains(&graph[n].start))
        .collect();
    let Some(owner) = before.iter().rev().copied().find(|&n| false_target(n) == Some(end)) else {
        return false;
    };
    if graph[owner].end == start && graph.instructions(block).len() == 1 {
        return false;
    }
    let owner_start = graph[owner].start;
    !before
        .iter()
        .filter(|&&n| graph[n].start < owner_start)
        .any(|&n| false_target(n).is_some_and(|t| t >= end && t < target))
}

/// Resolve `b` jumps that leave the innermost enclosing loop.
fn find_break_continue(graph: &mut Graph) -> usize {
    let mut converted = 0;
    for block in graph.blocks.clone() {
        let Some(last) = graph.last_instruction(block) else {
            continue;
        };
        if last.opcode != Opcode::B {
            continue;
        }
        let Some(target) = last.branch_target() else {
            continue;
        };
        let Some(loop_node) = graph.enclosing_loop(last.address) else {
            continue;
        };
        let Some(info) = graph.loop_info(loop_node).cloned() else {
            continue;
        };
        let loop_start = graph[loop_node].start;

        let kind = if target == info.continue_address
            && (info.kind == LoopKind::While || !ends_true_branch(graph, block, target, loop_start))
        {
            NodeKind::Continue
        } else if info.step_address == Some(target) && !ends_true_branch(graph, block, target, loop_start) {
            if let NodeKind::Loop(info) = &mut graph[loop_node].kind {
                info.continues_to_step = true;
            }
            NodeKind::Continue
        } else if info.break_address == Some(target) {
            NodeKind::Break
        } else {
            continue;
        };
        convert_jump(graph, block, kind);
        converted += 1;
    }
    converted
}

fn reachable_from(graph: &Graph, start: NodeId) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        if visited.insert(node) {
            stack.extend(graph[node].successors.iter().copied());
        }
    }
    visited
}

/// Walk the true branch until it reaches code at or past the false target.
///
/// Successors also reachable from the false branch are preferred, so the
/// walk follows the path the two branches share.
fn find_meet(graph: &Graph, true_node: NodeId, false_node: NodeId) -> NodeId {
    let false_start = graph[false_node].start;
    let from_false = reachable_from(graph, false_node);
    let mut seen = HashSet::new();
    let mut current = true_node;
    loop {
        if matches!(graph[current].kind, NodeKind::Break | NodeKind::Continue) {
            return false_node;
        }
        if current == false_node || graph[current].start >= false_start {
            return current;
        }
        if !seen.insert(current) {
            return false_node;
        }
        let successors = &graph[current].successors;
        let next = successors
            .iter()
            .copied()
            .find(|s| from_false.contains(s))
            .or_else(|| successors.first().copied());
        match next {
            Some(next) => current = next,
            None => return false_node,
        }
    }
}

fn fold(graph: &mut Graph, condition: NodeId) -> Result<NodeId, ControlFlowError> {
    let start = graph[condition].start;
    let (true_node, false_node) = match graph[condition].successors.as_slice() {
        [t, f] => (*t, *f),
        _ => return Err(pattern_error("if", start, "condition without two successors")),
    };
    let meet = if true_node == false_node {
        false_node
    } else {
        find_meet(graph, true_node, false_node)
    };
    let meet_start = graph[meet].start;
    let in_region = move |n: &Node| n.start >= start && n.start < meet_start;

    let true_branch = if true_node == meet {
        graph.add(Node::new(NodeKind::Empty, meet_start, meet_start, 0))
    } else {
        true_node
    };
    let mut else_branch = (false_node != meet).then_some(false_node);

    let jumps_to_meet = |graph: &Graph, n: NodeId| {
        graph
            .last_instruction(n)
            .is_some_and(|i| i.opcode == Opcode::B && i.branch_target() == Some(meet_start))
    };
    let region_preds: Vec<NodeId> = graph[meet]
        .predecessors
        .iter()
        .copied()
        .filter(|&p| p != condition && in_region(&graph[p]))
        .collect();
    if else_branch.is_none() && region_preds.iter().any(|&p| jumps_to_meet(graph, p)) {
        else_branch = Some(graph.add(Node::new(NodeKind::Empty, meet_start, meet_start, 0)));
    }
    for pred in region_preds {
        if jumps_to_meet(graph, pred) {
            graph.strip_last(pred, 1);
        }
        graph.disconnect(pred, meet);
    }

    graph.strip_last(condition, 1);
    graph.disconnect_successors(condition);
    let node = graph.add(Node::new(NodeKind::BinaryBranch, start, meet_start, 3));
    graph.redirect_predecessors(condition, node, |_| true);
    graph.replace_in_parent(condition, node);
    graph.connect(node, meet);
    graph.set_child(node, slot::CONDITION, Some(condition));
    graph.set_child(node, slot::TRUE, Some(true_branch));
    graph.set_child(node, slot::ELSE, else_branch);
    log::trace!("if at {start:#x}..{meet_start:#x}");
    Ok(node)
}

/// Fold every remaining `bf` into an if/else node, innermost (latest)
/// first, after resolving break and continue jumps.
pub fn find_binary_branches(graph: &mut Graph) -> Result<Vec<NodeId>, ControlFlowError> {
    let converted = find_break_continue(graph);
    if converted > 0 {
        log::trace!("{converted} break/continue jumps");
    }
    let mut found = Vec::new();
    for block in graph.blocks.clone().into_iter().rev() {
        if graph.last_instruction(block).is_some_and(|i| i.opcode == Opcode::Bf) {
            found.push(fold(graph, block)?);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::block::find_blocks;
    use crate::control_flow::loops::find_loops;
    use gmvm::asm::assemble;

    fn branches_of(source: &str) -> (Graph, Vec<NodeId>) {
        let code = assemble("test", source).unwrap();
        let mut graph = find_blocks(&code).unwrap();
        find_loops(&mut graph).unwrap();
        let found = find_binary_branches(&mut graph).unwrap();
        (graph, found)
    }

    #[test]
    fn if_else_meets_after_both_branches() {
        let (graph, found) = branches_of(
            "push.v self.a
conv.v.b
bf [else]
call.i x 0
popz.v
b [after]
:[else]
call.i y 0
popz.v
:[after]
exit.i
",
        );
        assert_eq!(found.len(), 1);
        let node = found[0];
        let t = graph[node].children[slot::TRUE].unwrap();
        let e = graph[node].children[slot::ELSE].unwrap();
        assert_eq!(graph.instructions(t).len(), 2, "jump to the meet is stripped");
        assert!(graph[t].successors.is_empty());
        assert!(graph[e].successors.is_empty());
        let after = graph[node].successors[0];
        assert_eq!(graph.instructions(after)[0].opcode, Opcode::Exit);
        assert_eq!(graph.outermost_at(graph.blocks[0]), node);
    }

    #[test]
    fn empty_true_branch_is_an_empty_node() {
        let (graph, found) = branches_of(
            "push.v self.a
conv.v.b
bf [after]
:[after]
exit.i
",
        );
        let node = found[0];
        let t = graph[node].children[slot::TRUE].unwrap();
        assert!(matches!(graph[t].kind, NodeKind::Empty));
        assert_eq!(graph[t].start, graph[node].end);
        assert!(graph[node].children[slot::ELSE].is_none());
    }

    #[test]
    fn vestigial_else_becomes_empty_node() {
        // if (a) { x(); } else { }
        let (graph, found) = branches_of(
            "push.v self.a
conv.v.b
bf [else]
call.i x 0
popz.v
b [after]
:[else]
:[after]
exit.i
",
        );
        let node = found[0];
        let e = graph[node].children[slot::ELSE].unwrap();
        assert!(matches!(graph[e].kind, NodeKind::Empty));
        let t = graph[node].children[slot::TRUE].unwrap();
        assert_eq!(graph.instructions(t).len(), 2);
    }

    #[test]
    fn jumps_out_of_loops_become_break_and_continue() {
        // while (a) { if (b) continue; if (c) break; f(); }
        let (graph, found) = branches_of(
            "
:[head]
push.v self.a
conv.v.b
bf [after]
push.v self.b
conv.v.b
bf [skip1]
b [head]
:[skip1]
push.v self.c
conv.v.b
bf [skip2]
b [after]
:[skip2]
call.i f 0
popz.v
b [head]
:[after]
exit.i
",
        );
        assert_eq!(found.len(), 2);
        let kinds: Vec<&NodeKind> = found
            .iter()
            .map(|&n| {
                let t = graph[n].children[slot::TRUE].unwrap();
                let jump = graph[t].successors[0];
                &graph[jump].kind
            })
            .collect();
        // Later branches fold first.
        assert!(matches!(kinds[0], NodeKind::Break));
        assert!(matches!(kinds[1], NodeKind::Continue));
        let info = graph.loop_info(graph.loops[0]).unwrap();
        assert!(!info.continues_to_step);
    }

    #[test]
    fn else_ending_in_break_keeps_true_branch_jump() {
        // while (a) { if (b) { x(); } else { break; } y(); }
        let (graph, found) = branches_of(
            "
:[head]
push.v self.a
conv.v.b
bf [after]
push.v self.b
conv.v.b
bf [else]
call.i x 0
popz.v
b [meet]
:[else]
b [after]
:[meet]
call.i y 0
popz.v
b [head]
:[after]
exit.i
",
        );
        let node = found[0];
        let e = graph[node].children[slot::ELSE].unwrap();
        assert!(matches!(graph[graph[e].successors[0]].kind, NodeKind::Break));
        let meet = graph[node].successors[0];
        assert_eq!(graph.instructions(meet)[0].opcode, Opcode::Call);
    }

    fn true_branch_exit(graph: &Graph, node: NodeId) -> Option<&NodeKind> {
        let t = graph[node].children[slot::TRUE]?;
        graph[t].successors.first().map(|&s| &graph[s].kind)
    }

    #[test]
    fn continue_in_repeat_is_not_an_else() {
        // repeat (3) { if (a) continue; f(); }
        let (graph, found) = branches_of(
            "
pushi.e 3
dup.i 0
push.e 0
cmp.i.e LTE
bt [after]
:[head]
push.v self.a
conv.v.b
bf [skip]
b [tail]
:[skip]
call.i f 0
popz.v
:[tail]
push.e 1
sub.i.i
dup.i 0
conv.i.b
bt [head]
:[after]
popz.i
exit.i
",
        );
        assert_eq!(found.len(), 1);
        assert!(matches!(true_branch_exit(&graph, found[0]), Some(NodeKind::Continue)));
        assert!(graph[found[0]].children[slot::ELSE].is_none());
    }

    #[test]
    fn nested_continue_in_do_until_keeps_outer_if_closed() {
        // do { if (a) { if (b) { k(); continue; } g(); } h(); } until (c);
        let (graph, found) = branches_of(
            "
:[head]
push.v self.a
conv.v.b
bf [skip_a]
push.v self.b
conv.v.b
bf [skip_b]
call.i k 0
popz.v
b [tail]
:[skip_b]
call.i g 0
popz.v
:[skip_a]
call.i h 0
popz.v
:[tail]
push.v self.c
conv.v.b
bf [head]
exit.i
",
        );
        assert_eq!(found.len(), 2);
        let (inner, outer) = (found[0], found[1]);
        assert!(matches!(true_branch_exit(&graph, inner), Some(NodeKind::Continue)));
        assert!(graph[inner].children[slot::ELSE].is_none());
        let meet = graph[outer].successors[0];
        assert_eq!(graph.instructions(meet)[0].function_name(), Some("h"));
    }

    #[test]
    fn if_else_closing_a_do_until_body_stays_an_else() {
        // do { if (a) { x(); } else { y(); } } until (c);
        let (graph, found) = branches_of(
            "
:[head]
push.v self.a
conv.v.b
bf [else]
call.i x 0
popz.v
b [tail]
:[else]
call.i y 0
popz.v
:[tail]
push.v self.c
conv.v.b
bf [head]
exit.i
",
        );
        let node = found[0];
        assert!(graph[node].children[slot::ELSE].is_some());
        let t = graph[node].children[slot::TRUE].unwrap();
        assert_eq!(graph.instructions(t).len(), 2);
        assert!(graph[t].successors.is_empty());
    }

    #[test]
    fn with_body_jumps_become_continue_and_break() {
        // with (other) { if (a) continue; if (b) break; foo(); }
        let (graph, found) = branches_of(
            "
pushi.e -2
pushenv [tail]
:[body]
push.v self.a
conv.v.b
bf [skip1]
b [tail]
:[skip1]
push.v self.b
conv.v.b
bf [skip2]
b [brk]
:[skip2]
call.i foo 0
popz.v
:[tail]
popenv [body]
b [after]
:[brk]
popenv <drop>
:[after]
exit.i
",
        );
        assert_eq!(found.len(), 2);
        assert!(matches!(true_branch_exit(&graph, found[0]), Some(NodeKind::Break)));
        assert!(matches!(true_branch_exit(&graph, found[1]), Some(NodeKind::Continue)));
    }
}
