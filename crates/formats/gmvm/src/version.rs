/// Bytecode version a code entry was compiled for.
///
/// Known versions:
/// - 13: Early GameMaker: Studio
/// - 14: GameMaker: Studio 1.x (old instruction format)
/// - 15: GameMaker: Studio 1.4.x (new instruction format)
/// - 16: GameMaker: Studio 1.4.9999+
/// - 17: GameMaker Studio 2.x
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytecodeVersion(pub u8);

impl BytecodeVersion {
    pub const V14: Self = Self(14);
    pub const V15: Self = Self(15);
    pub const V16: Self = Self(16);
    pub const V17: Self = Self(17);

    /// Whether the new instruction format is used (v15+).
    /// v14 and below use a different opcode numbering and instruction layout.
    pub fn has_new_instruction_format(self) -> bool {
        self.0 >= 15
    }

    /// Whether comparisons are encoded as a single `cmp` opcode with a kind byte.
    pub fn has_unified_compare(self) -> bool {
        self.0 >= 15
    }

    /// Whether extended (`break`-multiplexed) opcodes may appear.
    pub fn has_extended_opcodes(self) -> bool {
        self.0 >= 17
    }
}

impl Default for BytecodeVersion {
    fn default() -> Self {
        Self::V17
    }
}

impl std::fmt::Display for BytecodeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
