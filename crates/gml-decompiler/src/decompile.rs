//! Entry point: one code entry through the whole pipeline.

use gmvm::CodeEntry;

use crate::ast::builder::AstBuilder;
use crate::ast::cleaner::AstCleaner;
use crate::ast::{printer, Stmt};
use crate::context::GameContext;
use crate::control_flow;
use crate::error::{DecompileWarning, DecompilerError, DecompilerPhase, Result};
use crate::macros::EnumDeclarations;
use crate::settings::DecompileSettings;

/// Decompilation state of a single root code entry.
///
/// Warnings and enum declarations accumulate across calls, so one context
/// can be reused to decompile the same entry to both forms.
pub struct DecompileContext<'a> {
    game: &'a dyn GameContext,
    code: &'a CodeEntry,
    settings: &'a DecompileSettings,
    warnings: Vec<DecompileWarning>,
    enum_declarations: EnumDeclarations,
}

impl<'a> DecompileContext<'a> {
    pub fn new(game: &'a dyn GameContext, code: &'a CodeEntry, settings: &'a DecompileSettings) -> Self {
        Self {
            game,
            code,
            settings,
            warnings: Vec::new(),
            enum_declarations: EnumDeclarations::new(),
        }
    }

    /// Decompile to the root fragment's statements.
    pub fn decompile_to_ast(&mut self) -> Result<Vec<Stmt>> {
        let name = self.code.name.as_str();
        let graph = control_flow::analyze(self.code, self.game)
            .map_err(|e| DecompilerError::wrap(DecompilerPhase::ControlFlow, name, e))?;
        let (mut body, warnings) = AstBuilder::new(&graph, self.game, self.settings)
            .build()
            .map_err(|e| DecompilerError::wrap(DecompilerPhase::AstBuilding, name, e))?;
        self.warnings.extend(warnings);
        if self.settings.clean_ast {
            let enums = AstCleaner::new(self.game, self.settings).clean(name, &mut body);
            self.enum_declarations.merge(&enums);
        }
        log::debug!("{name}: {} top-level statements", body.len());
        Ok(body)
    }

    /// Decompile to GML source text.
    pub fn decompile_to_string(&mut self) -> Result<String> {
        let body = self.decompile_to_ast()?;
        Ok(printer::print(&body, &self.enum_declarations, self.settings))
    }

    pub fn warnings(&self) -> &[DecompileWarning] {
        &self.warnings
    }

    /// Enum values the cleaner resolved, for printing declarations once
    /// across many code entries.
    pub fn enum_declarations(&self) -> &EnumDeclarations {
        &self.enum_declarations
    }
}
