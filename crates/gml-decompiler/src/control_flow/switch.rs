//! switch statements.
//!
//! ```text
//! <value>
//! dup.v 0; <case 1>; cmp.v.v EQ; bt [case1]
//! dup.v 0; <case 2>; cmp.v.v EQ; bt [case2]
//! b [default]                   ; or b [end] without a default
//! :[case1] ... b [end]          ; break
//! :[case2] ...
//! :[default] ...
//! :[end]
//! popz.v                        ; discard the switch value
//! ```
//!
//! Inside a case, leaving the enclosing loop or the function first discards
//! the switch value, so a `popz.v` sits before `continue`, `exit` and
//! `return`; those are stripped here.

use std::collections::{BTreeMap, HashSet};

use gmvm::{
    ComparisonKind, ExtendedOpcode, InstanceType, Instruction, Opcode, Operand, VariableOperand, VariableType,
};

use super::{pattern_error, CaseLabel, Graph, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

/// Local the compiler stores return values in while discarding stack data.
pub const RETURN_TEMP: &str = "$$$$temp$$$$";

#[derive(Debug)]
struct Candidate {
    first: NodeId,
    dup_index: usize,
    /// Test blocks after the first, ending with the default jump block.
    chain: Vec<NodeId>,
    cases: Vec<(Vec<Instruction>, u32)>,
    default_target: u32,
}

/// The instance of the variable comes from the stack.
fn is_stacktop(var: &VariableOperand) -> bool {
    var.var_type == VariableType::StackTop || var.instance_type() == Some(InstanceType::Stacktop)
}

/// Item-count stack effect `(pops, pushes)` of an instruction.
fn stack_effect(inst: &Instruction) -> (i64, i64) {
    match inst.opcode {
        Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
            match &inst.operand {
                Operand::Variable(var) if var.var_type.is_array() => (2, 1),
                Operand::Variable(var) if is_stacktop(var) => (1, 1),
                _ => (0, 1),
            }
        }
        Opcode::Conv | Opcode::Neg | Opcode::Not => (1, 1),
        Opcode::Cmp => (2, 1),
        op if op.is_binary() => (2, 1),
        Opcode::Dup => match inst.operand {
            Operand::Dup { size, swap: 0 } => (0, size as i64 + 1),
            _ => (0, 0),
        },
        Opcode::Popz | Opcode::Ret | Opcode::Bt | Opcode::Bf | Opcode::PushEnv => (1, 0),
        Opcode::Pop => match &inst.operand {
            Operand::Variable(var) if var.var_type.is_array() => (3, 0),
            Operand::Variable(var) if is_stacktop(var) => (2, 0),
            Operand::Variable(_) => (1, 0),
            _ => (0, 0),
        },
        Opcode::Call => (inst.argc().unwrap_or(0) as i64, 1),
        Opcode::CallV => (inst.argc().unwrap_or(0) as i64 + 2, 1),
        Opcode::Extended => match inst.extended {
            Some(ExtendedOpcode::PushArrayFinal | ExtendedOpcode::PushArrayContainer) => (2, 1),
            Some(ExtendedOpcode::PopArrayFinal) => (3, 0),
            Some(ExtendedOpcode::SetArrayOwner) => (1, 0),
            Some(
                ExtendedOpcode::PushReference
                | ExtendedOpcode::HasStaticInitialized
                | ExtendedOpcode::IsNullishValue,
            ) => (0, 1),
            _ => (0, 0),
        },
        _ => (0, 0),
    }
}

fn is_case_test(instructions: &[Instruction], dup_index: usize) -> Option<(Vec<Instruction>, u32)> {
    let n = instructions.len();
    if n < dup_index + 3 {
        return None;
    }
    let dup = &instructions[dup_index];
    let is_plain_dup = matches!(dup.operand, Operand::Dup { swap: 0, .. }) && dup.opcode == Opcode::Dup;
    if !is_plain_dup
        || instructions[n - 2].comparison() != Some(ComparisonKind::Equal)
        || instructions[n - 1].opcode != Opcode::Bt
    {
        return None;
    }
    let target = instructions[n - 1].branch_target()?;
    Some((instructions[dup_index + 1..n - 2].to_vec(), target))
}

fn find_candidates(graph: &Graph) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut claimed = HashSet::new();
    for &block in &graph.blocks {
        if claimed.contains(&block) {
            continue;
        }
        let instructions = graph.instructions(block);
        let n = instructions.len();
        if n < 3 {
            continue;
        }
        let Some(dup_index) = instructions[..n - 2].iter().rposition(|i| i.opcode == Opcode::Dup) else {
            continue;
        };
        let Some(first_case) = is_case_test(instructions, dup_index) else {
            continue;
        };

        let mut cases = vec![first_case];
        let mut chain = Vec::new();
        let mut current = graph.next_block(block);
        let mut default_target = None;
        while let Some(test) = current {
            let test_instructions = graph.instructions(test);
            if let Some(case) = is_case_test(test_instructions, 0) {
                cases.push(case);
                chain.push(test);
                current = graph.next_block(test);
                continue;
            }
            if let [jump] = test_instructions {
                if jump.opcode == Opcode::B {
                    default_target = jump.branch_target();
                    chain.push(test);
                }
            }
            break;
        }
        let Some(default_target) = default_target else {
            continue;
        };
        claimed.extend(chain.iter().copied());
        candidates.push(Candidate {
            first: block,
            dup_index,
            chain,
            cases,
            default_target,
        });
    }
    candidates
}

/// Whether a `popz` at `index` discards the switch value on the way out of
/// the switch (continue, exit, return) rather than ending it.
fn is_early_discard(graph: &Graph, instructions: &[Instruction], index: usize) -> bool {
    match &instructions[index + 1..] {
        [next, ..] if next.opcode == Opcode::B => true,
        [push, ret, ..]
            if push.variable().is_some_and(|v| v.name == RETURN_TEMP) && ret.opcode == Opcode::Ret =>
        {
            true
        }
        [exit, ..] if exit.opcode == Opcode::Exit => {
            // An exit right before another switch end belongs to a case.
            graph
                .block_at(exit.end_address())
                .and_then(|b| graph.first_instruction(b))
                .is_some_and(|i| i.opcode == Opcode::Popz)
        }
        _ => false,
    }
}

/// Locate the `popz` ending a switch whose last case starts at `from`,
/// splitting its block if needed.
fn find_end(graph: &mut Graph, from: u32, inner: &[(u32, u32)]) -> Option<NodeId> {
    let blocks: Vec<NodeId> = graph
        .blocks
        .iter()
        .copied()
        .filter(|&b| graph[b].start >= from)
        .collect();
    for block in blocks {
        let start = graph[block].start;
        if inner.iter().any(|&(s, e)| start >= s && start < e) {
            continue;
        }
        let instructions = graph.instructions(block);
        let mut depth = 0i64;
        let mut found = None;
        for (index, inst) in instructions.iter().enumerate() {
            if inst.opcode == Opcode::Popz && depth == 0 && !is_early_discard(graph, instructions, index) {
                found = Some(inst.address);
                break;
            }
            let (pops, pushes) = stack_effect(inst);
            depth += pushes - pops;
        }
        if let Some(address) = found {
            return graph.split_block(block, address);
        }
    }
    None
}

fn fold(graph: &mut Graph, candidate: &Candidate, inner: &[(u32, u32)]) -> Result<NodeId, ControlFlowError> {
    let first = candidate.first;
    let first_end = graph[first].end;
    let max_target = candidate
        .cases
        .iter()
        .map(|(_, t)| *t)
        .chain(std::iter::once(candidate.default_target))
        .max()
        .unwrap_or(first_end);
    let end_block = find_end(graph, max_target, inner)
        .ok_or_else(|| pattern_error("switch", first_end, "no end of switch found"))?;
    let end_address = graph[end_block].start;

    if let Some(instructions) = graph.instructions_mut(first) {
        instructions.truncate(candidate.dup_index);
    }
    graph.disconnect_successors(first);
    for &test in &candidate.chain {
        graph.disconnect_successors(test);
    }
    graph.strip_first(end_block, 1);

    let body_start = candidate
        .cases
        .iter()
        .map(|(_, t)| *t)
        .chain(std::iter::once(candidate.default_target))
        .min()
        .unwrap_or(end_address)
        .min(end_address);
    let in_inner = |address: u32| inner.iter().any(|&(s, e)| address >= s && address < e);
    let body_blocks: Vec<NodeId> = graph
        .blocks
        .iter()
        .copied()
        .filter(|&b| {
            let start = graph[b].start;
            start >= body_start && start < end_address && !in_inner(start) && !candidate.chain.contains(&b)
        })
        .collect();

    let switch_start = graph[first].start;
    for block in body_blocks {
        let instructions = graph.instructions(block);
        let n = instructions.len();
        let leaves = |i: &Instruction| {
            i.opcode == Opcode::Exit
                || (i.opcode == Opcode::B
                    && i.branch_target().is_some_and(|t| t < switch_start || t > end_address))
        };
        let discard = match instructions {
            [.., popz, last] if popz.opcode == Opcode::Popz && leaves(last) => Some(n - 2),
            [.., popz, push, ret]
                if popz.opcode == Opcode::Popz
                    && push.variable().is_some_and(|v| v.name == RETURN_TEMP)
                    && ret.opcode == Opcode::Ret =>
            {
                Some(n - 3)
            }
            _ => None,
        };
        if let Some(index) = discard {
            if let Some(instructions) = graph.instructions_mut(block) {
                instructions.remove(index);
            }
        }

        let breaks = graph
            .last_instruction(block)
            .is_some_and(|i| i.opcode == Opcode::B && i.branch_target() == Some(end_address));
        if breaks {
            graph.strip_last(block, 1);
            graph.disconnect_successors(block);
            let address = graph[block].end;
            let node = graph.add(Node::new(NodeKind::Break, address, address, 0));
            graph.connect(block, node);
        }
    }
    graph.disconnect_predecessors(end_block, |n| n.start >= first_end && n.start < end_address);

    let mut labels: BTreeMap<u32, Vec<CaseLabel>> = BTreeMap::new();
    for (index, (_, target)) in candidate.cases.iter().enumerate() {
        labels.entry(*target).or_default().push(CaseLabel::Value(index));
    }
    if candidate.default_target != end_address {
        labels
            .entry(candidate.default_target)
            .or_default()
            .push(CaseLabel::Default);
    }

    let mut markers = Vec::new();
    for (target, labels) in labels {
        let marker = graph.add(Node::new(NodeKind::SwitchCase { labels }, target, target, 0));
        if target < end_address {
            let block = graph
                .block_at(target)
                .ok_or_else(|| pattern_error("switch", target, "case target is not a block"))?;
            let top = graph.outermost_at(block);
            graph.redirect_predecessors(top, marker, |_| true);
            graph.connect(marker, top);
        }
        markers.push(marker);
    }

    let case_values = candidate.cases.iter().map(|(v, _)| v.clone()).collect();
    let node = graph.add(Node::new(
        NodeKind::Switch { case_values },
        first_end,
        end_address,
        markers.len(),
    ));
    graph.connect(first, node);
    graph.connect(node, end_block);
    for (slot, marker) in markers.into_iter().enumerate() {
        graph.set_child(node, slot, Some(marker));
    }
    log::trace!("switch at {first_end:#x}..{end_address:#x}");
    Ok(node)
}

/// Fold switch statements, innermost (latest) first.
pub fn find_switches(graph: &mut Graph) -> Result<Vec<NodeId>, ControlFlowError> {
    let candidates = find_candidates(graph);
    let mut folded: Vec<(u32, u32)> = Vec::new();
    let mut found = Vec::new();
    for candidate in candidates.iter().rev() {
        let node = fold(graph, candidate, &folded)?;
        folded.push((graph[node].start, graph[node].end));
        found.push(node);
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::block::find_blocks;
    use gmvm::asm::assemble;

    /// switch (x) { case 1: a(); break; case 2: b(); default: c(); }
    const SWITCH: &str = "
push.v self.x
dup.v 0
pushi.e 1
cmp.i.v EQ
bt [case1]
dup.v 0
pushi.e 2
cmp.i.v EQ
bt [case2]
b [default]
:[case1]
call.i a 0
popz.v
b [end]
:[case2]
call.i b 0
popz.v
:[default]
call.i c 0
popz.v
:[end]
popz.v
exit.i
";

    #[test]
    fn stacktop_instances_take_their_instance_off_the_stack() {
        let code = assemble("test", "push.v stacktop.x\npop.v.v stacktop.y\npush.v self.z\n").unwrap();
        let effects: Vec<_> = code.instructions.iter().map(stack_effect).collect();
        assert_eq!(effects, vec![(1, 1), (2, 0), (0, 1)]);
    }

    #[test]
    fn switch_gets_markers_and_breaks() {
        let code = assemble("test", SWITCH).unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let found = find_switches(&mut graph).unwrap();
        assert_eq!(found.len(), 1);
        let node = found[0];
        let NodeKind::Switch { case_values } = &graph[node].kind else {
            panic!("expected switch");
        };
        assert_eq!(case_values.len(), 2);
        assert_eq!(case_values[0].len(), 1);

        let first = graph.blocks[0];
        assert_eq!(graph.instructions(first).len(), 1, "only the switch value remains");
        assert_eq!(graph[first].successors, vec![node]);

        let markers: Vec<NodeId> = graph[node].children.iter().flatten().copied().collect();
        assert_eq!(markers.len(), 3);
        let NodeKind::SwitchCase { labels } = &graph[markers[2]].kind else {
            panic!("expected case marker");
        };
        assert_eq!(labels, &vec![CaseLabel::Default]);

        // case 1 ends in a break node with no successors
        let case1 = graph[markers[0]].successors[0];
        let brk = graph[case1].successors[0];
        assert!(matches!(graph[brk].kind, NodeKind::Break));
        assert!(graph[brk].successors.is_empty());

        // case 2 falls through into the default marker
        let case2 = graph[markers[1]].successors[0];
        assert_eq!(graph[case2].successors, vec![markers[2]]);

        let end = graph[node].successors[0];
        assert_eq!(graph.instructions(end)[0].opcode, Opcode::Exit);
    }

    #[test]
    fn switch_end_inside_block_is_split() {
        // Nothing breaks, so the closing popz shares the default's block.
        let code = assemble(
            "test",
            "push.v self.x
dup.v 0
pushi.e 1
cmp.i.v EQ
bt [case1]
b [default]
:[case1]
call.i a 0
popz.v
:[default]
call.i c 0
popz.v
popz.v
exit.i
",
        )
        .unwrap();
        let mut graph = find_blocks(&code).unwrap();
        let found = find_switches(&mut graph).unwrap();
        let node = found[0];
        assert_eq!(graph[node].end, 52);
        let end = graph[node].successors[0];
        assert_eq!(graph.instructions(end).len(), 1);
        assert_eq!(graph.instructions(end)[0].opcode, Opcode::Exit);

        let case1 = graph[graph[node].children[0].unwrap()].successors[0];
        let default_marker = graph[node].children[1].unwrap();
        assert_eq!(graph[case1].successors, vec![default_marker]);
        let default_body = graph[default_marker].successors[0];
        assert_eq!(graph.instructions(default_body).len(), 2);
        assert!(graph[default_body].successors.is_empty());
    }
}
