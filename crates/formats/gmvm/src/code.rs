use crate::instruction::Instruction;

/// A compiled unit of VM instructions: a script, an object event, or a
/// function/struct literal embedded in another entry.
///
/// In GMS2.3+, child functions share a bytecode blob with their parent. The
/// root entry owns the instructions; each child records where its own code
/// starts within that blob.
#[derive(Debug, Clone, Default)]
pub struct CodeEntry {
    /// Entry name (e.g., "gml_Script_foo", "gml_Object_obj_player_Step_0").
    pub name: String,
    /// Length of the bytecode blob in bytes.
    pub length: u32,
    /// Decoded instructions (empty for child entries).
    pub instructions: Vec<Instruction>,
    /// Offset where this entry's code starts within the blob.
    pub start_offset: u32,
    /// Number of arguments.
    pub argument_count: u16,
    /// Number of local variables.
    pub locals_count: u16,
    /// Entries for functions embedded in this one, in blob order.
    pub children: Vec<CodeEntry>,
}

impl CodeEntry {
    pub fn new(name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        let length = instructions.last().map(|i| i.end_address()).unwrap_or(0);
        Self {
            name: name.into(),
            length,
            instructions,
            ..Default::default()
        }
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Whether this entry is embedded in another one.
    pub fn is_child(&self) -> bool {
        self.instructions.is_empty() && self.start_offset != 0
    }

    /// Find a child entry (at any depth) by name.
    pub fn find_child(&self, name: &str) -> Option<&CodeEntry> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find_child(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendant entries, depth-first in blob order.
    pub fn descendants(&self) -> Vec<&CodeEntry> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child);
            out.extend(child.descendants());
        }
        out
    }

    /// Index of the instruction at `address`, if one starts there.
    pub fn instruction_index(&self, address: u32) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&address, |i| i.address)
            .ok()
    }
}
