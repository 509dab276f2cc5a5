use std::fmt;

use crate::opcode::{ExtendedOpcode, Opcode};
use crate::types::{ComparisonKind, DataType, InstanceType, VariableType};

/// A decoded instruction with its references resolved to names.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset within the code entry's bytecode.
    pub address: u32,
    /// The operation.
    pub opcode: Opcode,
    /// Present when `opcode` is `Opcode::Extended`.
    pub extended: Option<ExtendedOpcode>,
    /// First type field (bits 16-19 of the instruction word).
    pub type1: DataType,
    /// Second type field (bits 20-23 of the instruction word).
    pub type2: DataType,
    /// The operand data.
    pub operand: Operand,
}

/// Variable operand of push/pop instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableOperand {
    pub name: String,
    /// Instance type (negative) or object index (non-negative).
    pub instance: i16,
    pub var_type: VariableType,
}

impl VariableOperand {
    pub fn instance_type(&self) -> Option<InstanceType> {
        InstanceType::from_i16(self.instance)
    }
}

/// Operand data for an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand.
    None,
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    String(String),
    Variable(VariableOperand),
    /// Function reference pushed as an int32 (`push.i [function]name`).
    Function(String),
    /// Branch target (byte offset from current instruction).
    Branch(i32),
    /// `popenv` that leaves a `with` loop early instead of iterating.
    PopEnvExit,
    Comparison(ComparisonKind),
    Call { function: String, argc: u16 },
    /// `callv`: argument count; function and instance come from the stack.
    CallVariable { argc: u16 },
    /// `dup`: number of extra items, plus the swap size for "dup swap" mode.
    Dup { size: u8, swap: u8 },
    /// `pop.e.v N` with no destination, rearranging the stack.
    PopSwap(u8),
    /// `pushref`: asset id and asset type code.
    Reference { id: i32, asset_type: u8 },
}

impl Instruction {
    /// Instruction size in bytes. Addresses must be accumulated from this,
    /// since sizes vary between 4, 8 and 12 bytes.
    pub fn size(&self) -> u32 {
        match self.opcode {
            Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
                match self.type1 {
                    DataType::Double | DataType::Int64 => 12,
                    DataType::Int16 => 4,
                    _ => 8,
                }
            }
            Opcode::Pop => {
                if self.type1 == DataType::Int16 {
                    4
                } else {
                    8
                }
            }
            Opcode::Call => 8,
            Opcode::Extended => {
                if self.type1 == DataType::Int32 {
                    8
                } else {
                    4
                }
            }
            _ => 4,
        }
    }

    /// Address of the instruction that follows this one.
    pub fn end_address(&self) -> u32 {
        self.address + self.size()
    }

    pub fn branch_offset(&self) -> Option<i32> {
        match self.operand {
            Operand::Branch(offset) => Some(offset),
            _ => None,
        }
    }

    /// Absolute branch target, if this instruction carries a branch offset.
    pub fn branch_target(&self) -> Option<u32> {
        self.branch_offset()
            .map(|offset| (self.address as i64 + offset as i64).max(0) as u32)
    }

    pub fn is_extended(&self, op: ExtendedOpcode) -> bool {
        self.opcode == Opcode::Extended && self.extended == Some(op)
    }

    pub fn variable(&self) -> Option<&VariableOperand> {
        match &self.operand {
            Operand::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        match &self.operand {
            Operand::Call { function, .. } | Operand::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn argc(&self) -> Option<u16> {
        match self.operand {
            Operand::Call { argc, .. } | Operand::CallVariable { argc } => Some(argc),
            _ => None,
        }
    }

    /// Integer literal carried by a push.
    pub fn int_value(&self) -> Option<i64> {
        match self.operand {
            Operand::Int16(v) => Some(v as i64),
            Operand::Int32(v) => Some(v as i64),
            Operand::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn comparison(&self) -> Option<ComparisonKind> {
        match self.operand {
            Operand::Comparison(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether this is a call to the given function name.
    pub fn is_call_to(&self, name: &str) -> bool {
        self.opcode == Opcode::Call && self.function_name() == Some(name)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extended {
            Some(ext) => write!(f, "{}", ext.mnemonic())?,
            None => write!(f, "{}", self.opcode.mnemonic())?,
        }
        if !self.opcode.has_branch_offset() {
            write!(f, ".{}", self.type1.suffix())?;
            if matches!(
                self.opcode,
                Opcode::Conv | Opcode::Pop | Opcode::Cmp
            ) || self.opcode.is_binary()
            {
                write!(f, ".{}", self.type2.suffix())?;
            }
        }
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int16(v) => write!(f, " {v}"),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Double(v) => write!(f, " {v}"),
            Operand::Bool(v) => write!(f, " {v}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Variable(v) => {
                let instance = match v.instance_type() {
                    Some(t) => t.keyword().to_string(),
                    None => v.instance.to_string(),
                };
                write!(f, " {}{}.{}", v.var_type.prefix(), instance, v.name)
            }
            Operand::Function(name) => write!(f, " [function]{name}"),
            Operand::Branch(offset) => {
                write!(f, " {:#x}", self.address as i64 + *offset as i64)
            }
            Operand::PopEnvExit => write!(f, " <drop>"),
            Operand::Comparison(kind) => write!(f, " {}", kind.mnemonic()),
            Operand::Call { function, argc } => write!(f, " {function} {argc}"),
            Operand::CallVariable { argc } => write!(f, " {argc}"),
            Operand::Dup { size, swap } => {
                if *swap != 0 {
                    write!(f, " {size} {swap}")
                } else {
                    write!(f, " {size}")
                }
            }
            Operand::PopSwap(size) => write!(f, " {size}"),
            Operand::Reference { id, asset_type } => write!(f, " {id} {asset_type}"),
        }
    }
}
