//! GameMaker VM instruction set.
//!
//! - `opcode`/`types`: opcode, extended-opcode and operand type tables
//! - `instruction`/`code`: decoded instructions and code entries
//! - `decode`: binary bytecode decoding (v14 opcodes normalized to v15+)
//! - `asm`: the textual assembly listing format

pub mod asm;
pub mod code;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod instruction;
pub mod opcode;
pub mod types;
pub mod version;

pub use code::CodeEntry;
pub use error::{Error, Result};
pub use instruction::{Instruction, Operand, VariableOperand};
pub use opcode::{ExtendedOpcode, Opcode};
pub use types::{AssetType, ComparisonKind, DataType, InstanceType, VariableType};
pub use version::BytecodeVersion;
