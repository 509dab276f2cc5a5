/// Opcodes for the GameMaker VM bytecode (v15+ numbering).
///
/// All opcodes use the v15+ values internally. When decoding v14 bytecode,
/// old opcodes are translated to these values at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Arithmetic/logic (two-operand)
    Conv = 0x07,
    Mul = 0x08,
    Div = 0x09,
    Rem = 0x0A,
    Mod = 0x0B,
    Add = 0x0C,
    Sub = 0x0D,
    And = 0x0E,
    Or = 0x0F,
    Xor = 0x10,

    // Unary
    Neg = 0x11,
    Not = 0x12,

    // Bit shifts
    Shl = 0x13,
    Shr = 0x14,

    // Comparison (uses ComparisonKind byte)
    Cmp = 0x15,

    // Stack
    Pop = 0x45,
    Dup = 0x86,

    // Control flow
    Ret = 0x9C,
    Exit = 0x9D,
    Popz = 0x9E,

    // Branches (23-bit signed offset in bits 0-22)
    B = 0xB6,
    Bt = 0xB7,
    Bf = 0xB8,

    // Environment (with-statement scoping)
    PushEnv = 0xBA,
    PopEnv = 0xBB,

    // Push variants
    Push = 0xC0,
    PushLoc = 0xC1,
    PushGlb = 0xC2,
    PushBltn = 0xC3,
    PushI = 0x84,

    // Call
    Call = 0xD9,
    CallV = 0x99,

    /// Extended instruction; the actual operation is an `ExtendedOpcode`
    /// stored in the low 16 bits of the instruction word.
    Extended = 0xFF,
}

/// Mnemonic table, in the form used by disassembly listings.
const MNEMONICS: &[(Opcode, &str)] = &[
    (Opcode::Conv, "conv"),
    (Opcode::Mul, "mul"),
    (Opcode::Div, "div"),
    (Opcode::Rem, "rem"),
    (Opcode::Mod, "mod"),
    (Opcode::Add, "add"),
    (Opcode::Sub, "sub"),
    (Opcode::And, "and"),
    (Opcode::Or, "or"),
    (Opcode::Xor, "xor"),
    (Opcode::Neg, "neg"),
    (Opcode::Not, "not"),
    (Opcode::Shl, "shl"),
    (Opcode::Shr, "shr"),
    (Opcode::Cmp, "cmp"),
    (Opcode::Pop, "pop"),
    (Opcode::Dup, "dup"),
    (Opcode::Ret, "ret"),
    (Opcode::Exit, "exit"),
    (Opcode::Popz, "popz"),
    (Opcode::B, "b"),
    (Opcode::Bt, "bt"),
    (Opcode::Bf, "bf"),
    (Opcode::PushEnv, "pushenv"),
    (Opcode::PopEnv, "popenv"),
    (Opcode::Push, "push"),
    (Opcode::PushLoc, "pushloc"),
    (Opcode::PushGlb, "pushglb"),
    (Opcode::PushBltn, "pushbltn"),
    (Opcode::PushI, "pushi"),
    (Opcode::Call, "call"),
    (Opcode::CallV, "callv"),
    (Opcode::Extended, "break"),
];

impl Opcode {
    /// Decode an opcode byte (v15+).
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x07 => Some(Self::Conv),
            0x08 => Some(Self::Mul),
            0x09 => Some(Self::Div),
            0x0A => Some(Self::Rem),
            0x0B => Some(Self::Mod),
            0x0C => Some(Self::Add),
            0x0D => Some(Self::Sub),
            0x0E => Some(Self::And),
            0x0F => Some(Self::Or),
            0x10 => Some(Self::Xor),
            0x11 => Some(Self::Neg),
            0x12 => Some(Self::Not),
            0x13 => Some(Self::Shl),
            0x14 => Some(Self::Shr),
            0x15 => Some(Self::Cmp),
            0x45 => Some(Self::Pop),
            0x84 => Some(Self::PushI),
            0x86 => Some(Self::Dup),
            0x99 => Some(Self::CallV),
            0x9C => Some(Self::Ret),
            0x9D => Some(Self::Exit),
            0x9E => Some(Self::Popz),
            0xB6 => Some(Self::B),
            0xB7 => Some(Self::Bt),
            0xB8 => Some(Self::Bf),
            0xBA => Some(Self::PushEnv),
            0xBB => Some(Self::PopEnv),
            0xC0 => Some(Self::Push),
            0xC1 => Some(Self::PushLoc),
            0xC2 => Some(Self::PushGlb),
            0xC3 => Some(Self::PushBltn),
            0xD9 => Some(Self::Call),
            0xFF => Some(Self::Extended),
            _ => None,
        }
    }

    /// Translate a v14 opcode to v15+ opcode.
    ///
    /// v14 has one opcode per comparison; the comparison kind is returned
    /// alongside so the decoder can synthesize a `Cmp` operand.
    pub fn from_v14(v: u8) -> Option<(Self, Option<u8>)> {
        let op = match v {
            0x03 => Self::Conv,
            0x04 => Self::Mul,
            0x05 => Self::Div,
            0x06 => Self::Rem,
            0x07 => Self::Mod,
            0x08 => Self::Add,
            0x09 => Self::Sub,
            0x0A => Self::And,
            0x0B => Self::Or,
            0x0C => Self::Xor,
            0x0D => Self::Neg,
            0x0E => Self::Not,
            0x0F => Self::Shl,
            0x10 => Self::Shr,
            0x11..=0x16 => return Some((Self::Cmp, Some(v - 0x10))),
            0x41 => Self::Pop,
            0x82 => Self::Dup,
            0x9D => Self::Ret,
            0x9E => Self::Exit,
            0x9F => Self::Popz,
            0xB7 => Self::B,
            0xB8 => Self::Bt,
            0xB9 => Self::Bf,
            0xBB => Self::PushEnv,
            0xBC => Self::PopEnv,
            0xC0 => Self::Push,
            0xDA => Self::Call,
            0xFF => Self::Extended,
            _ => return None,
        };
        Some((op, None))
    }

    pub fn mnemonic(self) -> &'static str {
        MNEMONICS
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, m)| *m)
            .unwrap_or("?")
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        MNEMONICS.iter().find(|(_, m)| *m == s).map(|(op, _)| *op)
    }

    /// Whether this is one of the three branch instructions.
    pub fn is_branch(self) -> bool {
        matches!(self, Self::B | Self::Bt | Self::Bf)
    }

    /// Whether the instruction encodes a branch offset in its low 23 bits.
    pub fn has_branch_offset(self) -> bool {
        matches!(self, Self::B | Self::Bt | Self::Bf | Self::PushEnv | Self::PopEnv)
    }

    /// Whether this opcode is one of the push family.
    pub fn is_push(self) -> bool {
        matches!(
            self,
            Self::Push | Self::PushLoc | Self::PushGlb | Self::PushBltn | Self::PushI
        )
    }

    /// Whether this is a two-operand arithmetic or bitwise opcode.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Self::Mul
                | Self::Div
                | Self::Rem
                | Self::Mod
                | Self::Add
                | Self::Sub
                | Self::And
                | Self::Or
                | Self::Xor
                | Self::Shl
                | Self::Shr
        )
    }
}

/// Operations multiplexed behind `Opcode::Extended`, keyed by the signed
/// 16-bit value in the instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ExtendedOpcode {
    /// Validate the array index on the stack top.
    CheckArrayIndex = -1,
    /// Push an element of a multi-dimensional array (final dimension).
    PushArrayFinal = -2,
    /// Store into a multi-dimensional array (final dimension).
    PopArrayFinal = -3,
    /// Push an intermediate dimension of a multi-dimensional array.
    PushArrayContainer = -4,
    /// Set the array owner ID used for copy-on-write.
    SetArrayOwner = -5,
    /// Push whether the current function's statics are initialized.
    HasStaticInitialized = -6,
    /// Mark the current function's statics as initialized.
    SetStaticInitialized = -7,
    SaveArrayReference = -8,
    RestoreArrayReference = -9,
    /// Push whether the stack top is `undefined` (keeps the value).
    IsNullishValue = -10,
    /// Push an asset reference (id and asset type packed in an int32).
    PushReference = -11,
}

const EXTENDED_MNEMONICS: &[(ExtendedOpcode, &str)] = &[
    (ExtendedOpcode::CheckArrayIndex, "chkindex"),
    (ExtendedOpcode::PushArrayFinal, "pushaf"),
    (ExtendedOpcode::PopArrayFinal, "popaf"),
    (ExtendedOpcode::PushArrayContainer, "pushac"),
    (ExtendedOpcode::SetArrayOwner, "setowner"),
    (ExtendedOpcode::HasStaticInitialized, "isstaticok"),
    (ExtendedOpcode::SetStaticInitialized, "setstatic"),
    (ExtendedOpcode::SaveArrayReference, "savearef"),
    (ExtendedOpcode::RestoreArrayReference, "restorearef"),
    (ExtendedOpcode::IsNullishValue, "isnullish"),
    (ExtendedOpcode::PushReference, "pushref"),
];

impl ExtendedOpcode {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            -1 => Some(Self::CheckArrayIndex),
            -2 => Some(Self::PushArrayFinal),
            -3 => Some(Self::PopArrayFinal),
            -4 => Some(Self::PushArrayContainer),
            -5 => Some(Self::SetArrayOwner),
            -6 => Some(Self::HasStaticInitialized),
            -7 => Some(Self::SetStaticInitialized),
            -8 => Some(Self::SaveArrayReference),
            -9 => Some(Self::RestoreArrayReference),
            -10 => Some(Self::IsNullishValue),
            -11 => Some(Self::PushReference),
            _ => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        EXTENDED_MNEMONICS
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, m)| *m)
            .unwrap_or("?")
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        EXTENDED_MNEMONICS
            .iter()
            .find(|(_, m)| *m == s)
            .map(|(op, _)| *op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_round_trip() {
        for (op, name) in MNEMONICS {
            assert_eq!(Opcode::from_mnemonic(name), Some(*op));
            assert_eq!(op.mnemonic(), *name);
        }
        for (op, name) in EXTENDED_MNEMONICS {
            assert_eq!(ExtendedOpcode::from_mnemonic(name), Some(*op));
            assert_eq!(ExtendedOpcode::from_i16(*op as i16), Some(*op));
        }
    }

    #[test]
    fn v14_compare_opcodes_carry_kind() {
        assert_eq!(Opcode::from_v14(0x11), Some((Opcode::Cmp, Some(1))));
        assert_eq!(Opcode::from_v14(0x16), Some((Opcode::Cmp, Some(6))));
        assert_eq!(Opcode::from_v14(0x08), Some((Opcode::Add, None)));
        assert_eq!(Opcode::from_v14(0x84), None);
    }
}
