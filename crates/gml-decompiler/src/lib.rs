//! Decompiler from GameMaker VM bytecode to GML source.
//!
//! One code entry goes through:
//! - `control_flow`: basic blocks, embedded function fragments, and the
//!   loops, branches, switches and other regions folded out of them
//! - `ast::builder`: stack simulation of the folded graph into statements
//! - `ast::cleaner`: macro resolution and source-level rewrites
//! - `ast::printer`: GML text
//!
//! [`DecompileContext`] runs all of it. [`GlobalFunctions::prescan`] builds
//! the function name table a game's global scripts declare.

pub mod ast;
pub mod context;
pub mod control_flow;
pub mod decompile;
pub mod entity;
pub mod error;
pub mod global_functions;
pub mod macros;
pub mod settings;

pub use context::{GameContext, SimpleGameContext};
pub use decompile::DecompileContext;
pub use error::{DecompileWarning, DecompilerError, DecompilerPhase, Result};
pub use global_functions::GlobalFunctions;
pub use macros::{EnumDeclarations, MacroRegistry, MacroRegistryError, MacroType};
pub use settings::DecompileSettings;
