use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::instruction::{Instruction, Operand, VariableOperand};
use crate::opcode::{ExtendedOpcode, Opcode};
use crate::types::{ComparisonKind, DataType, VariableType};
use crate::version::BytecodeVersion;

/// Resolves the numeric references embedded in bytecode to names.
///
/// In data.win, variable and function operands are patched through
/// per-symbol occurrence chains; the resolver hides that by answering for a
/// specific instruction address.
pub trait SymbolResolver {
    /// Name of the variable referenced by the instruction at `address`.
    fn variable(&self, address: u32, raw_id: u32) -> Option<String>;
    /// Name of the function called by the instruction at `address`.
    fn function(&self, address: u32, raw_id: u32) -> Option<String>;
    /// Function referenced by an int32 push at `address`, if the operand is
    /// a function reference rather than a plain integer.
    fn function_reference(&self, _address: u32, _value: i32) -> Option<String> {
        None
    }
    /// String table entry.
    fn string(&self, index: u32) -> Option<String>;
}

/// Resolver backed by plain index tables.
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    pub variables: Vec<String>,
    pub functions: Vec<String>,
    pub strings: Vec<String>,
    /// Addresses of int32 pushes that reference functions.
    pub function_pushes: Vec<u32>,
}

impl SymbolResolver for TableResolver {
    fn variable(&self, _address: u32, raw_id: u32) -> Option<String> {
        self.variables.get(raw_id as usize).cloned()
    }

    fn function(&self, _address: u32, raw_id: u32) -> Option<String> {
        self.functions.get(raw_id as usize).cloned()
    }

    fn function_reference(&self, address: u32, value: i32) -> Option<String> {
        if !self.function_pushes.contains(&address) {
            return None;
        }
        self.functions.get(value as usize).cloned()
    }

    fn string(&self, index: u32) -> Option<String> {
        self.strings.get(index as usize).cloned()
    }
}

/// Decode bytecode for a single code entry.
///
/// `bytecode` is the raw bytecode bytes for this code entry. All opcodes are
/// normalized to v15+ numbering.
pub fn decode(
    bytecode: &[u8],
    version: BytecodeVersion,
    resolver: &dyn SymbolResolver,
) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut c = Cursor::new(bytecode);

    while !c.is_empty() {
        let inst_offset = c.position();
        let word = c.read_u32()?;

        let opcode_byte = ((word >> 24) & 0xFF) as u8;
        let type2_raw = ((word >> 20) & 0xF) as u8;
        let type1_raw = ((word >> 16) & 0xF) as u8;
        let val16 = (word & 0xFFFF) as u16;

        let (opcode, v14_cmp) = if version.has_new_instruction_format() {
            (Opcode::from_u8(opcode_byte), None)
        } else {
            match Opcode::from_v14(opcode_byte) {
                Some((op, cmp)) => (Some(op), cmp),
                None => (None, None),
            }
        };
        let opcode = opcode.ok_or(Error::UnknownOpcode {
            opcode: opcode_byte,
            offset: inst_offset,
        })?;

        let type1 = DataType::from_u8(type1_raw);
        let type2 = DataType::from_u8(type2_raw);
        let address = inst_offset as u32;

        let mut extended = None;
        let operand = match opcode {
            Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
                decode_push_operand(type1, val16, address, &mut c, resolver)?
            }

            // Pop with an int16 destination type is a stack swap with no variable.
            Opcode::Pop => {
                if type1 == DataType::Int16 {
                    Operand::PopSwap(val16 as u8)
                } else {
                    decode_variable(val16, address, &mut c, resolver)?
                }
            }

            // Branch instructions: 23-bit signed offset in bits 22-0 of the word.
            Opcode::B | Opcode::Bt | Opcode::Bf | Opcode::PushEnv | Opcode::PopEnv => {
                if opcode == Opcode::PopEnv && word & 0x00FF_FFFF == 0x00F0_0000 {
                    Operand::PopEnvExit
                } else {
                    let raw23 = word & 0x007F_FFFF;
                    // Sign-extend from 23 bits
                    let offset = if raw23 & 0x40_0000 != 0 {
                        (raw23 | 0xFF80_0000) as i32
                    } else {
                        raw23 as i32
                    };
                    // Offset is in 4-byte units
                    Operand::Branch(offset * 4)
                }
            }

            Opcode::Cmp => {
                let cmp_byte = v14_cmp.unwrap_or(((word >> 8) & 0xFF) as u8);
                let kind = ComparisonKind::from_u8(cmp_byte).ok_or_else(|| Error::Parse {
                    context: "bytecode",
                    message: format!("unknown comparison kind {cmp_byte} at offset {inst_offset:#x}"),
                })?;
                Operand::Comparison(kind)
            }

            Opcode::Call => {
                let raw = c.read_u32()?;
                let function = resolver
                    .function(address, raw & 0x00FF_FFFF)
                    .unwrap_or_else(|| format!("func_{}", raw & 0x00FF_FFFF));
                Operand::Call {
                    function,
                    argc: val16,
                }
            }

            Opcode::CallV => Operand::CallVariable { argc: val16 },

            Opcode::Dup => Operand::Dup {
                size: (val16 & 0xFF) as u8,
                swap: ((val16 >> 8) & 0x7F) as u8,
            },

            Opcode::Extended => {
                let ext = ExtendedOpcode::from_i16(val16 as i16).ok_or(
                    Error::UnknownExtendedOpcode {
                        value: val16 as i16,
                        offset: inst_offset,
                    },
                )?;
                extended = Some(ext);
                if type1 == DataType::Int32 {
                    let value = c.read_i32()?;
                    if ext == ExtendedOpcode::PushReference {
                        Operand::Reference {
                            id: value & 0x00FF_FFFF,
                            asset_type: ((value >> 24) & 0xFF) as u8,
                        }
                    } else {
                        Operand::Int32(value)
                    }
                } else {
                    Operand::None
                }
            }

            _ => Operand::None,
        };

        instructions.push(Instruction {
            address,
            opcode,
            extended,
            type1,
            type2,
            operand,
        });
    }

    Ok(instructions)
}

fn decode_variable(
    val16: u16,
    address: u32,
    c: &mut Cursor<'_>,
    resolver: &dyn SymbolResolver,
) -> Result<Operand> {
    let raw = c.read_u32()?;
    let id = raw & 0x00FF_FFFF;
    let var_type = VariableType::from_u8(((raw >> 24) & 0xF8) as u8);
    let name = resolver
        .variable(address, id)
        .unwrap_or_else(|| format!("var_{id}"));
    Ok(Operand::Variable(VariableOperand {
        name,
        instance: val16 as i16,
        var_type,
    }))
}

fn decode_push_operand(
    type1: DataType,
    val16: u16,
    address: u32,
    c: &mut Cursor<'_>,
    resolver: &dyn SymbolResolver,
) -> Result<Operand> {
    match type1 {
        DataType::Double => Ok(Operand::Double(c.read_f64()?)),
        DataType::Float => Ok(Operand::Double(c.read_f32()? as f64)),
        DataType::Int32 => {
            let value = c.read_i32()?;
            match resolver.function_reference(address, value) {
                Some(name) => Ok(Operand::Function(name)),
                None => Ok(Operand::Int32(value)),
            }
        }
        DataType::Int64 => Ok(Operand::Int64(c.read_i64()?)),
        DataType::Bool => Ok(Operand::Bool(c.read_u32()? != 0)),
        DataType::String => {
            let index = c.read_u32()?;
            let s = resolver.string(index).ok_or_else(|| Error::Parse {
                context: "bytecode",
                message: format!("string index {index} out of range at offset {address:#x}"),
            })?;
            Ok(Operand::String(s))
        }
        DataType::Variable => decode_variable(val16, address, c, resolver),
        DataType::Int16 => Ok(Operand::Int16(val16 as i16)),
        DataType::Raw(v) => Err(Error::Parse {
            context: "bytecode",
            message: format!("unknown push data type {v:#x}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(opcode: u8, type2: u8, type1: u8, val16: u16) -> [u8; 4] {
        let w = ((opcode as u32) << 24) | ((type2 as u32) << 20) | ((type1 as u32) << 16) | val16 as u32;
        w.to_le_bytes()
    }

    fn resolver() -> TableResolver {
        TableResolver {
            variables: vec!["a".into(), "b".into()],
            functions: vec!["show_debug_message".into()],
            strings: vec!["hello".into()],
            function_pushes: Vec::new(),
        }
    }

    #[test]
    fn decodes_compound_assignment_sequence() {
        let mut bytes = Vec::new();
        // push.v self.a
        bytes.extend_from_slice(&word(0xC0, 0, 0x5, 0xFFFF));
        bytes.extend_from_slice(&(0xA000_0000u32).to_le_bytes());
        // push.e 1
        bytes.extend_from_slice(&word(0xC0, 0, 0xF, 1));
        // add.e.v
        bytes.extend_from_slice(&word(0x0C, 0x5, 0xF, 0));
        // pop.v.v self.a
        bytes.extend_from_slice(&word(0x45, 0x5, 0x5, 0xFFFF));
        bytes.extend_from_slice(&(0xA000_0000u32).to_le_bytes());

        let insts = decode(&bytes, BytecodeVersion::V17, &resolver()).unwrap();
        assert_eq!(insts.len(), 4);
        assert_eq!(insts[0].address, 0);
        assert_eq!(insts[1].address, 8);
        assert_eq!(insts[2].address, 12);
        assert_eq!(insts[3].address, 16);
        let var = insts[3].variable().unwrap();
        assert_eq!(var.name, "a");
        assert_eq!(var.instance, -1);
        assert_eq!(var.var_type, VariableType::Normal);
    }

    #[test]
    fn decodes_negative_branch_offsets() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&word(0x9E, 0, 0x5, 0)); // popz.v
        // b -1 (in words)
        bytes.extend_from_slice(&(0xB600_0000u32 | 0x007F_FFFF).to_le_bytes());
        let insts = decode(&bytes, BytecodeVersion::V17, &resolver()).unwrap();
        assert_eq!(insts[1].branch_offset(), Some(-4));
        assert_eq!(insts[1].branch_target(), Some(0));
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let bytes = word(0x01, 0, 0, 0);
        assert!(matches!(
            decode(&bytes, BytecodeVersion::V17, &resolver()),
            Err(Error::UnknownOpcode { opcode: 0x01, .. })
        ));
    }
}
