//! Embedded function (fragment) extraction.
//!
//! GMS2.3 compiles nested functions and struct literals inline: the parent
//! jumps over the child's body with `b SKIP`, the body ends with `exit`, and
//! the child's code entry records where the body starts.

use std::collections::HashMap;

use gmvm::{CodeEntry, Opcode};

use super::{Graph, Node, NodeId, NodeKind};
use crate::error::ControlFlowError;

/// Prefix the compiler gives script function code entries.
pub const SCRIPT_PREFIX: &str = "gml_Script_";

/// Name of a function as written in source, from its code entry name.
pub fn function_name(code_entry: &str) -> &str {
    code_entry.strip_prefix(SCRIPT_PREFIX).unwrap_or(code_entry)
}

fn fragment_node(code_entry: &CodeEntry, start: u32, end: u32) -> Node {
    Node::new(
        NodeKind::Fragment {
            code_entry: code_entry.name.clone(),
            argument_count: code_entry.argument_count,
            blocks: Vec::new(),
        },
        start,
        end,
        1,
    )
}

fn push_block(graph: &mut Graph, fragment: NodeId, block: NodeId) {
    if let NodeKind::Fragment { blocks, .. } = &mut graph[fragment].kind {
        blocks.push(block);
    }
}

/// The last block of a fragment must end in `exit`; strip it, leaving the
/// block without successors.
fn close_fragment(graph: &mut Graph, fragment: NodeId, last_block: NodeId) -> Result<(), ControlFlowError> {
    let ends_in_exit = graph
        .last_instruction(last_block)
        .is_some_and(|inst| inst.opcode == Opcode::Exit);
    if !ends_in_exit {
        let name = match &graph[fragment].kind {
            NodeKind::Fragment { code_entry, .. } => code_entry.clone(),
            _ => String::new(),
        };
        return Err(ControlFlowError::MissingExit {
            name,
            address: graph[fragment].end,
        });
    }
    graph.strip_last(last_block, 1);
    graph.disconnect_successors(last_block);
    Ok(())
}

/// Carve embedded functions out of the block list.
///
/// Creates the root fragment, plus one fragment node per child code entry,
/// spliced into the parent's flow in place of the `b SKIP` around the body.
pub fn find_fragments(graph: &mut Graph, code: &CodeEntry) -> Result<(), ControlFlowError> {
    let children: HashMap<u32, &CodeEntry> = code
        .descendants()
        .into_iter()
        .filter(|c| c.start_offset != 0)
        .map(|c| (c.start_offset, c))
        .collect();

    let root = graph.add(fragment_node(code, 0, code.length));
    let first = graph.blocks.first().copied();
    graph.set_child(root, 0, first);
    graph.fragments.push(root);

    let mut stack = vec![root];
    let blocks = graph.blocks.clone();
    for (index, &block) in blocks.iter().enumerate() {
        let start = graph[block].start;

        while let Some(&top) = stack.last() {
            if stack.len() == 1 || graph[top].end != start {
                break;
            }
            close_fragment(graph, top, blocks[index - 1])?;
            stack.pop();
        }

        if let Some(child) = children.get(&start).filter(|_| index > 0) {
            let previous = blocks[index - 1];
            let skip = graph
                .last_instruction(previous)
                .filter(|inst| inst.opcode == Opcode::B)
                .and_then(|inst| inst.branch_target())
                .ok_or(ControlFlowError::MissingFragmentBranch { address: start })?;
            let after = graph
                .block_at(skip)
                .ok_or(ControlFlowError::MissingBlock { address: start, target: skip })?;

            graph.strip_last(previous, 1);
            let fragment = graph.add(fragment_node(child, start, skip));
            graph.disconnect(previous, block);
            graph.replace_successor(previous, after, fragment);
            graph.connect(fragment, after);
            graph[block].unreachable = false;
            graph.set_child(fragment, 0, Some(block));
            graph.fragments.push(fragment);
            stack.push(fragment);
            log::trace!("{}: function {} at {start:#x}..{skip:#x}", code.name, child.name);
        }

        if let Some(&top) = stack.last() {
            push_block(graph, top, block);
        }
    }

    if stack.len() != 1 {
        return Err(ControlFlowError::UnmatchedFragments {
            count: stack.len() - 1,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow::block::find_blocks;
    use gmvm::asm::assemble;

    const GLOBAL_SCRIPT: &str = "
b [skip]
> gml_Script_foo (locals=0, args=1)
push.v arg.argument0
ret.v
exit.i
:[skip]
push.i [function]gml_Script_foo
conv.i.v
pushi.e -1
conv.i.v
call.i method 2
dup.v 0
pushi.e -1
pop.v.v self.foo
popz.v
exit.i
";

    #[test]
    fn child_function_becomes_fragment() {
        let code = assemble("gml_GlobalScript_foo", GLOBAL_SCRIPT).unwrap();
        let mut graph = find_blocks(&code).unwrap();
        find_fragments(&mut graph, &code).unwrap();
        assert_eq!(graph.fragments.len(), 2);

        let root = graph.root().unwrap();
        let entry = graph[root].children[0].unwrap();
        assert!(graph.instructions(entry).is_empty(), "b SKIP is stripped");

        let fragment = graph.fragments[1];
        assert_eq!(graph[entry].successors, vec![fragment]);
        let NodeKind::Fragment { code_entry, argument_count, .. } = &graph[fragment].kind else {
            panic!("expected a fragment");
        };
        assert_eq!(code_entry, "gml_Script_foo");
        assert_eq!(*argument_count, 1);

        let head = graph[fragment].children[0].unwrap();
        assert!(!graph[head].unreachable);
        assert_eq!(graph[head].parent, Some(fragment));
        // The trailing exit is dead code after ret; it stays chained but empty.
        let tail = graph[head].successors[0];
        assert!(graph[tail].unreachable);
        assert!(graph.instructions(tail).is_empty());
        assert!(graph[tail].successors.is_empty());

        let after = graph[fragment].successors[0];
        assert_eq!(graph[after].start, graph[fragment].end);
    }

    #[test]
    fn function_without_exit_is_rejected() {
        let source = GLOBAL_SCRIPT.replacen("exit.i\n:[skip]", "popz.v\n:[skip]", 1);
        let code = assemble("gml_GlobalScript_foo", &source).unwrap();
        let mut graph = find_blocks(&code).unwrap();
        assert!(matches!(
            find_fragments(&mut graph, &code),
            Err(ControlFlowError::MissingExit { .. })
        ));
    }

    #[test]
    fn script_prefix_is_dropped_from_names() {
        assert_eq!(function_name("gml_Script_foo"), "foo");
        assert_eq!(function_name("show_message"), "show_message");
    }
}
