//! Reader for the textual VM assembly used by test harnesses and the CLI.
//!
//! One instruction per line, in disassembly form:
//!
//! ```text
//! # comment
//! push.v self.a
//! pushi.e 1
//! add.i.v
//! pop.v.v self.a
//! bf [else]
//! :[else]
//! call.i show_debug_message 1
//! > gml_Script_foo (locals=0, args=2)
//! ```
//!
//! `:[name]` defines a label at the current address; `[end]` is implicitly
//! the code length. `> name` opens a child code entry (an embedded function)
//! starting at the current address. Addresses are computed from instruction
//! sizes, so branch offsets come out exactly as the compiler would emit them.

use std::collections::HashMap;

use crate::code::CodeEntry;
use crate::error::{Error, Result};
use crate::instruction::{Instruction, Operand, VariableOperand};
use crate::opcode::{ExtendedOpcode, Opcode};
use crate::types::{ComparisonKind, DataType, InstanceType, VariableType};

/// Assemble a listing into a root code entry.
pub fn assemble(name: &str, source: &str) -> Result<CodeEntry> {
    let mut instructions = Vec::new();
    // (index into `instructions`, label, line number)
    let mut pending_branches: Vec<(usize, String, usize)> = Vec::new();
    let mut labels: HashMap<String, u32> = HashMap::new();
    let mut children = Vec::new();
    let mut address = 0u32;

    for (line_index, raw_line) in source.lines().enumerate() {
        let line_no = line_index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix(":[") {
            let label = rest.strip_suffix(']').ok_or_else(|| Error::Assembly {
                line: line_no,
                message: format!("malformed label definition {line:?}"),
            })?;
            if labels.insert(label.to_string(), address).is_some() {
                return Err(Error::Assembly {
                    line: line_no,
                    message: format!("duplicate label [{label}]"),
                });
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('>') {
            children.push(parse_child(rest.trim(), address, line_no)?);
            continue;
        }

        let (inst, label) = parse_instruction(line, address, line_no)?;
        if let Some(label) = label {
            pending_branches.push((instructions.len(), label, line_no));
        }
        address += inst.size();
        instructions.push(inst);
    }

    labels.entry("end".to_string()).or_insert(address);
    for (index, label, line_no) in pending_branches {
        let target = *labels.get(&label).ok_or_else(|| Error::Assembly {
            line: line_no,
            message: format!("undefined label [{label}]"),
        })?;
        let inst = &mut instructions[index];
        inst.operand = Operand::Branch(target as i32 - inst.address as i32);
    }

    for child in &mut children {
        child.length = address;
    }

    Ok(CodeEntry {
        name: name.to_string(),
        length: address,
        instructions,
        start_offset: 0,
        argument_count: 0,
        locals_count: 0,
        children,
    })
}

/// `name (locals=N, args=M)`, with the parenthesized part optional.
fn parse_child(text: &str, address: u32, line: usize) -> Result<CodeEntry> {
    let (name, attrs) = match text.split_once('(') {
        Some((name, rest)) => (name.trim(), rest.trim_end_matches(')')),
        None => (text, ""),
    };
    if name.is_empty() {
        return Err(Error::Assembly {
            line,
            message: "child entry without a name".into(),
        });
    }
    let mut entry = CodeEntry {
        name: name.to_string(),
        start_offset: address,
        ..Default::default()
    };
    for attr in attrs.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let (key, value) = attr.split_once('=').ok_or_else(|| Error::Assembly {
            line,
            message: format!("malformed child attribute {attr:?}"),
        })?;
        let value: u16 = value.trim().parse().map_err(|_| Error::Assembly {
            line,
            message: format!("invalid number in {attr:?}"),
        })?;
        match key.trim() {
            "locals" => entry.locals_count = value,
            "args" => entry.argument_count = value,
            other => {
                return Err(Error::Assembly {
                    line,
                    message: format!("unknown child attribute {other:?}"),
                })
            }
        }
    }
    Ok(entry)
}

/// Parse one instruction line. Returns the instruction and, for branches,
/// the label whose address becomes the branch target.
fn parse_instruction(line: &str, address: u32, line_no: usize) -> Result<(Instruction, Option<String>)> {
    let err = |message: String| Error::Assembly {
        line: line_no,
        message,
    };

    let (head, operand_text) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let mut parts = head.split('.');
    let mnemonic = parts.next().unwrap_or_default();
    let type1 = parts.next().map(|s| parse_type(s, line_no)).transpose()?;
    let type2 = parts.next().map(|s| parse_type(s, line_no)).transpose()?;

    if let Some(ext) = ExtendedOpcode::from_mnemonic(mnemonic) {
        let type1 = type1.unwrap_or(DataType::Int16);
        let operand = if ext == ExtendedOpcode::PushReference {
            let mut fields = operand_text.split_whitespace();
            let id = parse_int::<i32>(fields.next(), line_no)?;
            let asset_type = parse_int::<u8>(fields.next(), line_no)?;
            Operand::Reference { id, asset_type }
        } else if type1 == DataType::Int32 {
            Operand::Int32(parse_int::<i32>(Some(operand_text), line_no)?)
        } else {
            Operand::None
        };
        let inst = Instruction {
            address,
            opcode: Opcode::Extended,
            extended: Some(ext),
            type1,
            type2: type2.unwrap_or(DataType::Int16),
            operand,
        };
        return Ok((inst, None));
    }

    let opcode = Opcode::from_mnemonic(mnemonic)
        .ok_or_else(|| err(format!("unknown mnemonic {mnemonic:?}")))?;
    let type1 = type1.unwrap_or(DataType::Int32);
    let type2 = type2.unwrap_or(type1);
    let mut label = None;

    let operand = match opcode {
        Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
            parse_push_operand(type1, operand_text, line_no)?
        }
        Opcode::Pop => {
            if type1 == DataType::Int16 {
                Operand::PopSwap(parse_int::<u8>(Some(operand_text), line_no)?)
            } else {
                Operand::Variable(parse_variable(operand_text, line_no)?)
            }
        }
        Opcode::B | Opcode::Bt | Opcode::Bf | Opcode::PushEnv | Opcode::PopEnv => {
            if opcode == Opcode::PopEnv && operand_text == "<drop>" {
                Operand::PopEnvExit
            } else {
                let name = operand_text
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(|| err(format!("expected [label], found {operand_text:?}")))?;
                label = Some(name.to_string());
                Operand::Branch(0)
            }
        }
        Opcode::Cmp => Operand::Comparison(
            ComparisonKind::from_mnemonic(operand_text)
                .ok_or_else(|| err(format!("unknown comparison {operand_text:?}")))?,
        ),
        Opcode::Call => {
            let (function, argc) = parse_call(operand_text, line_no)?;
            Operand::Call { function, argc }
        }
        Opcode::CallV => Operand::CallVariable {
            argc: parse_int::<u16>(Some(operand_text), line_no)?,
        },
        Opcode::Dup => {
            let mut fields = operand_text.split_whitespace();
            let size = parse_int::<u8>(fields.next(), line_no)?;
            let swap = match fields.next() {
                Some(s) => parse_int::<u8>(Some(s), line_no)?,
                None => 0,
            };
            Operand::Dup { size, swap }
        }
        _ => {
            if !operand_text.is_empty() {
                return Err(err(format!("{mnemonic} takes no operand")));
            }
            Operand::None
        }
    };

    let inst = Instruction {
        address,
        opcode,
        extended: None,
        type1,
        type2,
        operand,
    };
    Ok((inst, label))
}

fn parse_type(s: &str, line: usize) -> Result<DataType> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => DataType::from_suffix(c).ok_or_else(|| Error::Assembly {
            line,
            message: format!("unknown type suffix {s:?}"),
        }),
        _ => Err(Error::Assembly {
            line,
            message: format!("unknown type suffix {s:?}"),
        }),
    }
}

fn parse_int<T: std::str::FromStr>(s: Option<&str>, line: usize) -> Result<T> {
    let s = s.unwrap_or_default().trim();
    s.parse().map_err(|_| Error::Assembly {
        line,
        message: format!("invalid integer {s:?}"),
    })
}

fn parse_push_operand(type1: DataType, text: &str, line: usize) -> Result<Operand> {
    let err = |what: &str| Error::Assembly {
        line,
        message: format!("invalid {what} literal {text:?}"),
    };
    Ok(match type1 {
        DataType::Int16 => Operand::Int16(parse_int(Some(text), line)?),
        DataType::Int32 => match text.strip_prefix("[function]") {
            Some(name) => Operand::Function(name.trim().to_string()),
            None => Operand::Int32(parse_int(Some(text), line)?),
        },
        DataType::Int64 => Operand::Int64(parse_int(Some(text), line)?),
        DataType::Double | DataType::Float => {
            Operand::Double(text.parse().map_err(|_| err("double"))?)
        }
        DataType::Bool => match text {
            "true" | "1" => Operand::Bool(true),
            "false" | "0" => Operand::Bool(false),
            _ => return Err(err("boolean")),
        },
        DataType::String => Operand::String(parse_string(text).ok_or_else(|| err("string"))?),
        DataType::Variable => Operand::Variable(parse_variable(text, line)?),
        DataType::Raw(_) => return Err(err("push")),
    })
}

/// `[array]self.name`, `local.x`, `3.name` (object index), ...
fn parse_variable(text: &str, line: usize) -> Result<VariableOperand> {
    let err = |message: String| Error::Assembly { line, message };
    let mut rest = text.trim();
    let mut var_type = VariableType::Normal;
    if let Some(after) = rest.strip_prefix('[') {
        let (prefix, tail) = after
            .split_once(']')
            .ok_or_else(|| err(format!("malformed variable {text:?}")))?;
        var_type = VariableType::from_prefix(prefix)
            .ok_or_else(|| err(format!("unknown variable prefix [{prefix}]")))?;
        rest = tail;
    }
    let (instance, name) = rest
        .split_once('.')
        .ok_or_else(|| err(format!("variable {text:?} needs an instance prefix")))?;
    let instance = match InstanceType::from_keyword(instance) {
        Some(t) => t as i16,
        None => instance
            .parse::<i16>()
            .map_err(|_| err(format!("unknown instance {instance:?}")))?,
    };
    if name.is_empty() {
        return Err(err(format!("variable {text:?} has no name")));
    }
    Ok(VariableOperand {
        name: name.to_string(),
        instance,
        var_type,
    })
}

/// `name argc` or `name(argc=N)`.
fn parse_call(text: &str, line: usize) -> Result<(String, u16)> {
    if let Some((name, rest)) = text.split_once('(') {
        let count = rest
            .trim_end_matches(')')
            .trim()
            .trim_start_matches("argc=");
        return Ok((name.trim().to_string(), parse_int(Some(count), line)?));
    }
    let mut fields = text.split_whitespace();
    let name = fields.next().ok_or_else(|| Error::Assembly {
        line,
        message: "call without a function name".into(),
    })?;
    Ok((name.to_string(), parse_int(fields.next(), line)?))
}

fn parse_string(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            other => out.push(other),
        }
    }
    Some(out)
}
