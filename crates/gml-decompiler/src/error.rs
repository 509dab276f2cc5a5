use std::fmt;

/// Pipeline phase an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompilerPhase {
    ControlFlow,
    AstBuilding,
    AstCleanup,
    Printing,
}

impl fmt::Display for DecompilerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ControlFlow => "control flow analysis",
            Self::AstBuilding => "AST building",
            Self::AstCleanup => "AST cleanup",
            Self::Printing => "printing",
        })
    }
}

/// Structural errors raised while building and folding the control-flow graph.
#[derive(Debug, thiserror::Error)]
pub enum ControlFlowError {
    #[error("instruction at {address:#x} refers to {target:#x}, which is not an instruction boundary")]
    MissingBlock { address: u32, target: u32 },

    #[error("function {name} ending at {address:#x} does not end in exit")]
    MissingExit { name: String, address: u32 },

    #[error("embedded function at {address:#x} is not preceded by a branch around it")]
    MissingFragmentBranch { address: u32 },

    #[error("{count} embedded function(s) still open at end of code")]
    UnmatchedFragments { count: usize },

    #[error("blocks end at {found:#x} but code length is {expected:#x}")]
    LengthMismatch { expected: u32, found: u32 },

    #[error("instruction at {address:#x} pushes {value} as a code address")]
    AddressOutOfRange { address: u32, value: i64 },

    #[error("{construct} at {address:#x}: {message}")]
    Pattern {
        construct: &'static str,
        address: u32,
        message: String,
    },
}

/// Errors raised while simulating instructions into an AST.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{address:#x}: stack underflow on {instruction}")]
    StackUnderflow { address: u32, instruction: String },

    #[error("{address:#x}: unexpected {instruction}")]
    UnexpectedInstruction { address: u32, instruction: String },

    #[error("{count} item(s) left over on the stack at the end of {code_entry}")]
    LeftoverStack { count: usize, code_entry: String },

    #[error("node at {address:#x} continues to {count} successors")]
    Branching { address: u32, count: usize },

    #[error("{0}")]
    Malformed(String),
}

/// A problem recorded instead of raised, when settings allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecompileWarning {
    #[error("data left over on the stack: {count} item(s) at the end of {code_entry}")]
    DataLeftOnStack { count: usize, code_entry: String },
}

/// The single error type surfaced by the decompiler, tagged with the phase it
/// came from and wrapping the lower-level cause.
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed for {code_entry}: {message}")]
pub struct DecompilerError {
    pub phase: DecompilerPhase,
    pub code_entry: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DecompilerError {
    /// Wrap a lower-level error, keeping it as the source.
    pub fn wrap<E>(phase: DecompilerPhase, code_entry: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            phase,
            code_entry: code_entry.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T, E = DecompilerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn wrapped_errors_keep_phase_and_source() {
        let inner = BuildError::LeftoverStack {
            count: 2,
            code_entry: "gml_Script_a".into(),
        };
        let err = DecompilerError::wrap(DecompilerPhase::AstBuilding, "gml_Script_a", inner);
        assert_eq!(err.phase, DecompilerPhase::AstBuilding);
        assert!(err.to_string().starts_with("AST building failed for gml_Script_a"));
        assert!(err.source().is_some());
    }
}
