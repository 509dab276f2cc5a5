//! Control-flow graph recovery.
//!
//! Instructions are split into basic blocks, embedded functions are carved
//! out as fragments, and then each structured construct is detected and
//! folded into a composite node, in a fixed order:
//!
//! ```text
//! blocks -> fragments -> static init -> nullish -> loops -> short-circuit
//!        -> try/catch -> switch -> if/else
//! ```
//!
//! Folding never deletes nodes. A composite takes over the external edges of
//! the region it replaces and holds the region's entry points in child
//! slots; the region keeps its internal edges, with the edges that used to
//! leave it cut so that walking a child chain ends where the region ends.

pub mod binary_branch;
pub mod block;
pub mod fragment;
pub mod loops;
pub mod nullish;
pub mod short_circuit;
pub mod static_init;
pub mod switch;
pub mod try_catch;

use gmvm::{CodeEntry, Instruction};

use crate::context::GameContext;
use crate::define_entity;
use crate::entity::Arena;
use crate::error::ControlFlowError;

define_entity!(NodeId);

/// Loop flavor, as recognized from the back-edge instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Back edge is an unconditional `b`.
    While,
    /// Back edge is a `bf`: `do { } until (cond)`.
    DoUntil,
    /// Back edge is a `bt` closing a counter decrement.
    Repeat,
    /// `pushenv`/`popenv` pair.
    With,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo {
    pub kind: LoopKind,
    /// Whether a `while` loop has a condition (`while (true)` has none).
    pub has_condition: bool,
    /// Branch target of `continue` inside this loop.
    pub continue_address: u32,
    /// Start of the tail block, a second `continue` target for `while` loops
    /// whose tail holds a `for` step.
    pub step_address: Option<u32>,
    /// Set when some `continue` jumps to `step_address`; the loop is then a
    /// `for` whose step is the last body statement.
    pub continues_to_step: bool,
    /// Branch target of `break` inside this loop.
    pub break_address: Option<u32>,
}

/// Short-circuit operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortCircuitKind {
    And,
    Or,
}

/// Case label attached to a switch case marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseLabel {
    /// Index into the switch's case-value list.
    Value(usize),
    Default,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Straight-line instructions. Folding strips the control instructions
    /// that the enclosing construct accounts for.
    Block { instructions: Vec<Instruction> },
    /// A code entry: the root, or a function/struct body embedded in it.
    Fragment {
        code_entry: String,
        argument_count: u16,
        /// Blocks owned by this fragment, in address order.
        blocks: Vec<NodeId>,
    },
    Loop(LoopInfo),
    BinaryBranch,
    ShortCircuit(ShortCircuitKind),
    StaticInit,
    Nullish,
    TryCatch { catch_variable: Option<String> },
    Switch { case_values: Vec<Vec<Instruction>> },
    SwitchCase { labels: Vec<CaseLabel> },
    Break,
    Continue,
    Empty,
}

/// Child slot indices for the composite kinds.
pub mod slot {
    /// First node of a fragment, static-init body or nullish right-hand side.
    pub const HEAD: usize = 0;

    pub const LOOP_HEAD: usize = 0;
    pub const LOOP_TAIL: usize = 1;
    /// Synthetic empty node marking the loop exit.
    pub const LOOP_AFTER: usize = 2;
    /// First body node; differs from `LOOP_HEAD` only for `while` loops with
    /// a condition.
    pub const LOOP_BODY: usize = 3;

    pub const CONDITION: usize = 0;
    pub const TRUE: usize = 1;
    pub const ELSE: usize = 2;

    pub const TRY: usize = 0;
    pub const CATCH: usize = 1;
    pub const FINALLY: usize = 2;
}

/// A node of the control-flow graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub start: u32,
    pub end: u32,
    pub predecessors: Vec<NodeId>,
    pub successors: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub children: Vec<Option<NodeId>>,
    pub unreachable: bool,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(kind: NodeKind, start: u32, end: u32, slots: usize) -> Self {
        Self {
            start,
            end,
            predecessors: Vec::new(),
            successors: Vec::new(),
            parent: None,
            children: vec![None; slots],
            unreachable: false,
            kind,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        match &self.kind {
            NodeKind::Block { instructions } => instructions,
            _ => &[],
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, NodeKind::Block { .. })
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end
    }
}

/// The control-flow graph of one root code entry.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Arena<NodeId, Node>,
    /// Basic blocks in address order, including the empty end block.
    pub blocks: Vec<NodeId>,
    /// Fragments, root first.
    pub fragments: Vec<NodeId>,
    /// Loop nodes, outermost first.
    pub loops: Vec<NodeId>,
    pub code_length: u32,
}

impl std::ops::Index<NodeId> for Graph {
    type Output = Node;
    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl std::ops::IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
}

impl Graph {
    pub fn new(code_length: u32) -> Self {
        Self {
            nodes: Arena::new(),
            blocks: Vec::new(),
            fragments: Vec::new(),
            loops: Vec::new(),
            code_length,
        }
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node)
    }

    /// The root fragment.
    pub fn root(&self) -> Option<NodeId> {
        self.fragments.first().copied()
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from].successors.push(to);
        self.nodes[to].predecessors.push(from);
    }

    /// Remove one `from -> to` edge.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        remove_one(&mut self.nodes[from].successors, to);
        remove_one(&mut self.nodes[to].predecessors, from);
    }

    pub fn disconnect_successors(&mut self, node: NodeId) {
        let successors = std::mem::take(&mut self.nodes[node].successors);
        for succ in successors {
            remove_one(&mut self.nodes[succ].predecessors, node);
        }
    }

    /// Replace `old` with `new` in `node`'s successor list, keeping its
    /// position.
    pub fn replace_successor(&mut self, node: NodeId, old: NodeId, new: NodeId) {
        if let Some(pos) = self.nodes[node].successors.iter().position(|&s| s == old) {
            self.nodes[node].successors[pos] = new;
            remove_one(&mut self.nodes[old].predecessors, node);
            self.nodes[new].predecessors.push(node);
        }
    }

    /// Move every predecessor edge of `old` that satisfies `filter` over to
    /// `new`, preserving each predecessor's successor order.
    pub fn redirect_predecessors(
        &mut self,
        old: NodeId,
        new: NodeId,
        filter: impl Fn(&Node) -> bool,
    ) {
        let preds: Vec<NodeId> = self.nodes[old]
            .predecessors
            .iter()
            .copied()
            .filter(|&p| filter(&self.nodes[p]))
            .collect();
        for pred in preds {
            self.replace_successor(pred, old, new);
        }
    }

    /// Drop every predecessor edge of `node` that satisfies `filter`.
    pub fn disconnect_predecessors(&mut self, node: NodeId, filter: impl Fn(&Node) -> bool) {
        let preds: Vec<NodeId> = self.nodes[node]
            .predecessors
            .iter()
            .copied()
            .filter(|&p| filter(&self.nodes[p]))
            .collect();
        for pred in preds {
            self.disconnect(pred, node);
        }
    }

    /// Put `new` in every child slot of `old`'s parent that held `old`, and
    /// make `new` the parent of `old`.
    pub fn replace_in_parent(&mut self, old: NodeId, new: NodeId) {
        let parent = self.nodes[old].parent;
        self.nodes[new].parent = parent;
        if let Some(parent) = parent {
            for child in self.nodes[parent].children.iter_mut() {
                if *child == Some(old) {
                    *child = Some(new);
                }
            }
        }
        self.nodes[old].parent = Some(new);
    }

    /// Fill a child slot, taking ownership of the child.
    pub fn set_child(&mut self, parent: NodeId, slot: usize, child: Option<NodeId>) {
        if self.nodes[parent].children.len() <= slot {
            self.nodes[parent].children.resize(slot + 1, None);
        }
        self.nodes[parent].children[slot] = child;
        if let Some(child) = child {
            self.nodes[child].parent = Some(parent);
        }
    }

    /// Block starting at `address`.
    pub fn block_at(&self, address: u32) -> Option<NodeId> {
        let index = self
            .blocks
            .binary_search_by_key(&address, |&b| self.nodes[b].start)
            .ok()?;
        Some(self.blocks[index])
    }

    /// Block ending at `address` (the last non-empty one, if several).
    pub fn block_ending_at(&self, address: u32) -> Option<NodeId> {
        self.blocks
            .iter()
            .copied()
            .filter(|&b| self.nodes[b].end == address && self.nodes[b].start < address)
            .last()
    }

    /// Position of a block in address order.
    pub fn block_index(&self, block: NodeId) -> Option<usize> {
        self.blocks.iter().position(|&b| b == block)
    }

    /// The block following `block` in address order.
    pub fn next_block(&self, block: NodeId) -> Option<NodeId> {
        let index = self.block_index(block)?;
        self.blocks.get(index + 1).copied()
    }

    pub fn instructions(&self, node: NodeId) -> &[Instruction] {
        self.nodes[node].instructions()
    }

    pub fn instructions_mut(&mut self, node: NodeId) -> Option<&mut Vec<Instruction>> {
        match &mut self.nodes[node].kind {
            NodeKind::Block { instructions } => Some(instructions),
            _ => None,
        }
    }

    pub fn last_instruction(&self, node: NodeId) -> Option<&Instruction> {
        self.instructions(node).last()
    }

    pub fn first_instruction(&self, node: NodeId) -> Option<&Instruction> {
        self.instructions(node).first()
    }

    /// Remove the last `count` instructions of a block.
    pub fn strip_last(&mut self, node: NodeId, count: usize) {
        if let Some(instructions) = self.instructions_mut(node) {
            let keep = instructions.len().saturating_sub(count);
            instructions.truncate(keep);
        }
    }

    /// Remove the first `count` instructions of a block.
    pub fn strip_first(&mut self, node: NodeId, count: usize) {
        if let Some(instructions) = self.instructions_mut(node) {
            let count = count.min(instructions.len());
            instructions.drain(..count);
        }
    }

    /// Split a block before the instruction at `address` and return the
    /// second half, which takes over the block's successors.
    pub fn split_block(&mut self, block: NodeId, address: u32) -> Option<NodeId> {
        let index = self
            .instructions(block)
            .iter()
            .position(|i| i.address == address)?;
        if index == 0 {
            return Some(block);
        }
        let tail = self.instructions_mut(block)?.split_off(index);
        let end = self.nodes[block].end;
        let second = self.add(Node::new(NodeKind::Block { instructions: tail }, address, end, 0));
        self.nodes[block].end = address;

        let successors = std::mem::take(&mut self.nodes[block].successors);
        for succ in successors {
            if let Some(pred) = self.nodes[succ].predecessors.iter_mut().find(|p| **p == block) {
                *pred = second;
            }
            self.nodes[second].successors.push(succ);
        }
        self.connect(block, second);

        if let Some(position) = self.block_index(block) {
            self.blocks.insert(position + 1, second);
        }
        for &fragment in &self.fragments {
            if let NodeKind::Fragment { blocks, .. } = &mut self.nodes[fragment].kind {
                if let Some(position) = blocks.iter().position(|&b| b == block) {
                    blocks.insert(position + 1, second);
                    break;
                }
            }
        }
        Some(second)
    }

    /// The outermost node that starts at the same address as `node` and
    /// holds it in a child slot: what the rest of the graph now sees in
    /// place of a folded block.
    pub fn outermost_at(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.nodes[current].parent {
            let p = &self.nodes[parent];
            if p.start != self.nodes[current].start
                || matches!(p.kind, NodeKind::Fragment { .. })
                || !p.children.contains(&Some(current))
            {
                break;
            }
            current = parent;
        }
        current
    }

    /// Loop nodes containing `address`, innermost last.
    pub fn enclosing_loop(&self, address: u32) -> Option<NodeId> {
        self.loops
            .iter()
            .copied()
            .filter(|&l| self.nodes[l].contains(address))
            .max_by_key(|&l| (self.nodes[l].start, std::cmp::Reverse(self.nodes[l].end)))
    }

    pub fn loop_info(&self, node: NodeId) -> Option<&LoopInfo> {
        match &self.nodes[node].kind {
            NodeKind::Loop(info) => Some(info),
            _ => None,
        }
    }
}

fn remove_one(list: &mut Vec<NodeId>, id: NodeId) {
    if let Some(pos) = list.iter().position(|&x| x == id) {
        list.remove(pos);
    }
}

pub(crate) fn pattern_error(construct: &'static str, address: u32, message: impl Into<String>) -> ControlFlowError {
    ControlFlowError::Pattern {
        construct,
        address,
        message: message.into(),
    }
}

/// Build the structured control-flow graph of a root code entry.
pub fn analyze(code: &CodeEntry, game: &dyn GameContext) -> Result<Graph, ControlFlowError> {
    let mut graph = block::find_blocks(code)?;
    fragment::find_fragments(&mut graph, code)?;
    let statics = static_init::find_static_inits(&mut graph)?;
    let nullish = nullish::find_nullish(&mut graph)?;
    let loops = loops::find_loops(&mut graph)?;
    let short_circuits = short_circuit::find_short_circuits(&mut graph)?;
    let tries = try_catch::find_try_catch(&mut graph, game.uses_older_exception_handling())?;
    let switches = switch::find_switches(&mut graph)?;
    let branches = binary_branch::find_binary_branches(&mut graph)?;
    log::debug!(
        "{}: {} blocks, {} fragments, {} static, {} nullish, {} loops, {} short-circuit, {} try, {} switch, {} if",
        code.name,
        graph.blocks.len(),
        graph.fragments.len(),
        statics.len(),
        nullish.len(),
        loops.len(),
        short_circuits.len(),
        tries.len(),
        switches.len(),
        branches.len(),
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(graph: &mut Graph, start: u32) -> NodeId {
        graph.add(Node::new(NodeKind::Empty, start, start, 0))
    }

    #[test]
    fn replace_successor_keeps_position() {
        let mut g = Graph::new(0);
        let a = empty(&mut g, 0);
        let b = empty(&mut g, 1);
        let c = empty(&mut g, 2);
        let d = empty(&mut g, 3);
        g.connect(a, b);
        g.connect(a, c);
        g.replace_successor(a, b, d);
        assert_eq!(g[a].successors, vec![d, c]);
        assert!(g[b].predecessors.is_empty());
        assert_eq!(g[d].predecessors, vec![a]);
    }

    #[test]
    fn replace_in_parent_rewrites_slots() {
        let mut g = Graph::new(0);
        let parent = g.add(Node::new(NodeKind::BinaryBranch, 0, 4, 3));
        let old = empty(&mut g, 0);
        let new = empty(&mut g, 0);
        g.set_child(parent, slot::CONDITION, Some(old));
        g.replace_in_parent(old, new);
        assert_eq!(g[parent].children[slot::CONDITION], Some(new));
        assert_eq!(g[new].parent, Some(parent));
        assert_eq!(g[old].parent, Some(new));
    }
}
