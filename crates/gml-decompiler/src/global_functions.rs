//! Global function names declared by global scripts.
//!
//! A GMLv2 global script declares its functions by binding each embedded
//! function to a variable right after the function's body:
//!
//! ```text
//! push.i [function]gml_Script_foo
//! conv.i.v; pushi.e -1; conv.i.v
//! call.i method 2
//! dup.v 0; pushi.e -6
//! pop.v.v [stacktop]self.foo
//! popz.v
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use gmvm::{CodeEntry, Opcode, Operand};
use rayon::prelude::*;

use crate::control_flow::{block, fragment, Graph, NodeKind};
use crate::error::{ControlFlowError, DecompilerError, DecompilerPhase};

/// How far past a function body the binding `pop` may appear.
const BINDING_WINDOW: usize = 10;

/// Bidirectional function name <-> code entry table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalFunctions {
    by_name: HashMap<String, String>,
    by_code_entry: HashMap<String, String>,
}

impl GlobalFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, code_entry: impl Into<String>) {
        let (name, code_entry) = (name.into(), code_entry.into());
        self.by_code_entry.insert(code_entry.clone(), name.clone());
        self.by_name.insert(name, code_entry);
    }

    pub fn code_entry_of(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn name_of(&self, code_entry: &str) -> Option<&str> {
        self.by_code_entry.get(code_entry).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Find the functions each entry declares, processing entries in
    /// parallel. Only the final insert of each entry's results is serialized.
    pub fn prescan(entries: &[CodeEntry]) -> Result<Self, DecompilerError> {
        let shared = Mutex::new(GlobalFunctions::new());
        entries.par_iter().try_for_each(|entry| {
            let found = scan_entry(entry)?;
            if !found.is_empty() {
                let mut table = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                for (name, code_entry) in found {
                    table.insert(name, code_entry);
                }
            }
            Ok::<_, DecompilerError>(())
        })?;
        let table = shared.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        log::debug!("prescan: {} global functions in {} entries", table.len(), entries.len());
        Ok(table)
    }
}

/// `(function name, code entry)` pairs declared by one root entry.
fn scan_entry(entry: &CodeEntry) -> Result<Vec<(String, String)>, DecompilerError> {
    let wrap = |e: ControlFlowError| DecompilerError::wrap(DecompilerPhase::ControlFlow, entry.name.as_str(), e);
    let mut graph = block::find_blocks(entry).map_err(wrap)?;
    fragment::find_fragments(&mut graph, entry).map_err(wrap)?;
    Ok(bindings(&graph, entry))
}

fn bindings(graph: &Graph, entry: &CodeEntry) -> Vec<(String, String)> {
    let mut found = Vec::new();
    for &fragment in graph.fragments.iter().skip(1) {
        let NodeKind::Fragment { code_entry, .. } = &graph[fragment].kind else {
            continue;
        };
        let Some(start) = entry.instruction_index(graph[fragment].end) else {
            continue;
        };
        let window = &entry.instructions[start..(start + BINDING_WINDOW).min(entry.instructions.len())];
        let pushes_function = window
            .first()
            .is_some_and(|i| i.opcode == Opcode::Push && i.operand == Operand::Function(code_entry.clone()));
        if !pushes_function {
            continue;
        }
        let binding = window.iter().find_map(|i| match (&i.opcode, &i.operand) {
            (Opcode::Pop, Operand::Variable(var)) => Some(var.name.clone()),
            _ => None,
        });
        if let Some(name) = binding {
            found.push((name, code_entry.clone()));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmvm::asm::assemble;

    const GLOBAL_SCRIPT: &str = "
b [decl]
> gml_Script_add (locals=0, args=2)
push.v arg.argument0
push.v arg.argument1
add.v.v
ret.v
exit.i
:[decl]
push.i [function]gml_Script_add
conv.i.v
pushi.e -1
conv.i.v
call.i method 2
dup.v 0
pushi.e -6
pop.v.v [stacktop]self.add
popz.v
exit.i
";

    #[test]
    fn prescan_maps_names_both_ways() {
        let a = assemble("gml_GlobalScript_math", GLOBAL_SCRIPT).unwrap();
        let b = assemble("gml_GlobalScript_empty", "exit.i\n").unwrap();
        let table = GlobalFunctions::prescan(&[a, b]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.code_entry_of("add"), Some("gml_Script_add"));
        assert_eq!(table.name_of("gml_Script_add"), Some("add"));
    }

    #[test]
    fn prescan_reports_broken_entries() {
        let broken = assemble("gml_GlobalScript_bad", "b [x]\n> gml_Script_f\npushi.e 1\npopz.i\n:[x]\nexit.i\n").unwrap();
        let err = GlobalFunctions::prescan(&[broken]).unwrap_err();
        assert_eq!(err.phase, DecompilerPhase::ControlFlow);
    }
}
