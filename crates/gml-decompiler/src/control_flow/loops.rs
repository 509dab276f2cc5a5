//! Loop recovery.
//!
//! Every loop is closed by a backward jump, found by scanning blocks in
//! reverse:
//!
//! ```text
//! while     :[head] <cond> bf [after] <body> b [head] :[after]
//! do/until  :[head] <body> <cond> bf [head] :[after]
//! repeat    <count> dup.i 0 push.e 0 cmp.i.e LTE bt [after]
//!           :[head] <body> push.e 1 sub.i.i dup.i 0 conv.i.b bt [head]
//!           :[after] popz.i
//! with      <target> pushenv [tail] :[head] <body> :[tail] popenv [head]
//!           (b [after] :[brk] popenv <drop>)? :[after]
//! ```
//!
//! Loops are folded outermost first. Break and continue edges are moved to
//! the loop's synthetic after node here; the branch-detection pass turns
//! them into break/continue nodes later.

use std::collections::HashSet;

use gmvm::{ComparisonKind, Opcode, Operand};

use super::{pattern_error, slot, Graph, LoopInfo, LoopKind, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

#[derive(Debug, Clone)]
struct Candidate {
    kind: LoopKind,
    head: NodeId,
    tail: NodeId,
    after: NodeId,
    /// Block before the loop: the repeat counter check or the pushenv.
    before: Option<NodeId>,
    /// `b [after]` and `popenv <drop>` blocks of a `with` loop left by break.
    with_exit: Option<(NodeId, NodeId)>,
}

fn find_candidates(graph: &Graph) -> Result<Vec<Candidate>, ControlFlowError> {
    let mut candidates = Vec::new();
    let mut while_heads = HashSet::new();

    for &block in graph.blocks.iter().rev() {
        let Some(last) = graph.last_instruction(block) else {
            continue;
        };
        let backward = last.branch_offset().is_some_and(|o| o < 0);
        let kind = match last.opcode {
            Opcode::B if backward => LoopKind::While,
            Opcode::Bf if backward => LoopKind::DoUntil,
            Opcode::Bt if backward => LoopKind::Repeat,
            Opcode::PushEnv => LoopKind::With,
            _ => continue,
        };
        let address = last.address;
        let target = last
            .branch_target()
            .ok_or_else(|| pattern_error("loop", address, "missing branch target"))?;
        let missing = |what: &str| pattern_error("loop", address, format!("no {what} block"));

        if kind == LoopKind::With {
            let head = graph.next_block(block).ok_or_else(|| missing("body"))?;
            let tail = graph.block_at(target).ok_or_else(|| missing("popenv"))?;
            let next = graph.next_block(tail).ok_or_else(|| missing("after"))?;
            let mut after = next;
            let mut with_exit = None;
            if let [jump] = graph.instructions(next) {
                let drop_block = graph.next_block(next);
                let is_drop = drop_block.is_some_and(|d| {
                    matches!(graph.instructions(d), [pop] if pop.operand == Operand::PopEnvExit)
                });
                if let (Opcode::B, Some(exit), true) = (jump.opcode, jump.branch_target(), is_drop) {
                    after = graph.block_at(exit).ok_or_else(|| missing("after"))?;
                    with_exit = drop_block.map(|d| (next, d));
                }
            }
            candidates.push(Candidate {
                kind,
                head,
                tail,
                after,
                before: Some(block),
                with_exit,
            });
            continue;
        }

        if kind == LoopKind::While && !while_heads.insert(target) {
            // An earlier `b` to an already known head is a continue.
            continue;
        }
        let head = graph.block_at(target).ok_or_else(|| missing("head"))?;
        let after = graph.next_block(block).ok_or_else(|| missing("after"))?;
        let before = if kind == LoopKind::Repeat {
            let index = graph.block_index(head).unwrap_or(0);
            let before = index
                .checked_sub(1)
                .map(|i| graph.blocks[i])
                .ok_or_else(|| missing("repeat counter"))?;
            Some(before)
        } else {
            None
        };
        candidates.push(Candidate {
            kind,
            head,
            tail: block,
            after,
            before,
            with_exit: None,
        });
    }

    candidates.sort_by_key(|c| (graph[c.head].start, std::cmp::Reverse(graph[c.after].start)));
    Ok(candidates)
}

/// First block in `[start, end)` ending in a `bf` that leaves the loop.
fn find_while_condition(graph: &Graph, start: u32, end: u32, after: u32) -> Option<NodeId> {
    graph.blocks.iter().copied().find(|&b| {
        let node = &graph[b];
        node.start >= start
            && node.start < end
            && node
                .instructions()
                .last()
                .is_some_and(|i| i.opcode == Opcode::Bf && i.branch_target() == Some(after))
    })
}

fn is_repeat_check(graph: &Graph, before: NodeId) -> bool {
    let instructions = graph.instructions(before);
    let n = instructions.len();
    n >= 4
        && instructions[n - 4].opcode == Opcode::Dup
        && instructions[n - 3].int_value() == Some(0)
        && instructions[n - 2].comparison() == Some(ComparisonKind::LessEqual)
        && instructions[n - 1].opcode == Opcode::Bt
}

fn fold(graph: &mut Graph, candidate: &Candidate) -> Result<NodeId, ControlFlowError> {
    let Candidate {
        kind,
        head,
        tail,
        after,
        before,
        with_exit,
    } = candidate.clone();
    let start = graph[head].start;
    let end = graph[after].start;
    let tail_start = graph[tail].start;
    let inside = move |n: &Node| n.start >= start && n.start < end;

    let mut info = LoopInfo {
        kind,
        has_condition: false,
        continue_address: tail_start,
        step_address: None,
        continues_to_step: false,
        break_address: Some(end),
    };
    let mut body = head;

    match kind {
        LoopKind::While => {
            info.continue_address = start;
            if tail_start != start {
                info.step_address = Some(tail_start);
            }
            graph.strip_last(tail, 1);
            graph.disconnect(tail, head);
            if let Some(condition) = find_while_condition(graph, start, tail_start + 1, end) {
                info.has_condition = true;
                body = graph[condition]
                    .successors
                    .first()
                    .copied()
                    .ok_or_else(|| pattern_error("while", start, "condition has no body"))?;
                graph.strip_last(condition, 1);
                graph.disconnect_successors(condition);
            }
        }
        LoopKind::DoUntil => {
            graph.strip_last(tail, 1);
            graph.disconnect_successors(tail);
        }
        LoopKind::Repeat => {
            let before = before.ok_or_else(|| pattern_error("repeat", start, "no counter block"))?;
            if !is_repeat_check(graph, before) || graph.instructions(tail).len() < 5 {
                return Err(pattern_error("repeat", start, "unrecognized counter sequence"));
            }
            graph.strip_last(before, 4);
            graph.disconnect(before, after);
            graph.strip_last(tail, 5);
            graph.disconnect_successors(tail);
            if graph.first_instruction(after).map(|i| i.opcode) == Some(Opcode::Popz) {
                graph.strip_first(after, 1);
            }
        }
        LoopKind::With => {
            let before = before.ok_or_else(|| pattern_error("with", start, "no pushenv block"))?;
            graph.strip_last(before, 1);
            graph.disconnect(before, tail);
            graph.strip_last(tail, 1);
            graph.disconnect_successors(tail);
            info.break_address = None;
            if let Some((jump, drop_block)) = with_exit {
                graph.strip_last(jump, 1);
                graph.disconnect_successors(jump);
                graph.strip_last(drop_block, 1);
                graph.disconnect_successors(drop_block);
                info.break_address = Some(graph[drop_block].start);
            }
        }
    }

    let loop_node = graph.add(Node::new(NodeKind::Loop(info.clone()), start, end, 4));
    let exit = graph.add(Node::new(NodeKind::Empty, end, end, 0));
    graph[exit].parent = Some(loop_node);

    let break_target = match with_exit {
        Some((_, drop_block)) => Some(drop_block),
        None if kind == LoopKind::With => None,
        None => Some(after),
    };
    if let Some(target) = break_target {
        graph.redirect_predecessors(target, exit, inside);
    }
    if kind == LoopKind::While {
        graph.redirect_predecessors(head, exit, inside);
    }

    graph.redirect_predecessors(head, loop_node, move |n| !inside(n));
    graph.connect(loop_node, after);
    graph.replace_in_parent(head, loop_node);
    graph[loop_node].children[slot::LOOP_AFTER] = Some(exit);
    graph.set_child(loop_node, slot::LOOP_HEAD, Some(head));
    graph.set_child(loop_node, slot::LOOP_TAIL, Some(tail));
    graph.set_child(loop_node, slot::LOOP_BODY, Some(body));
    graph.loops.push(loop_node);

    log::trace!("{kind:?} loop at {start:#x}..{end:#x}");
    Ok(loop_node)
}

pub fn find_loops(graph: &mut Graph) -> Result<Vec<NodeId>, ControlFlowError> {
    let candidates = find_candidates(graph)?;
    candidates.iter().map(|c| fold(graph, c)).collect()
}
