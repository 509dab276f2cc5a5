use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected end of data at offset {offset:#x} (need {need} bytes, have {have})")]
    UnexpectedEof {
        offset: usize,
        need: usize,
        have: usize,
    },

    #[error("unknown opcode {opcode:#04x} at offset {offset:#x}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("unknown extended opcode {value} at offset {offset:#x}")]
    UnknownExtendedOpcode { value: i16, offset: usize },

    #[error("branch at {address:#x} targets {target:#x}, which is not an instruction boundary")]
    InvalidBranchTarget { address: u32, target: i64 },

    #[error("line {line}: {message}")]
    Assembly { line: usize, message: String },

    #[error("{context}: {message}")]
    Parse { context: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
