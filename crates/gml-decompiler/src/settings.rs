use serde::{Deserialize, Serialize};

/// Decompiler behavior and output formatting options.
///
/// Every cleanup feature is enabled by default. Disable individual features
/// by setting their fields to `false`, or use `from_skip_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompileSettings {
    /// String emitted once per indentation level.
    pub indent_string: String,
    pub use_semicolon: bool,
    /// Put `{` at the end of the statement line instead of on its own line.
    pub open_block_braces_on_same_line: bool,
    /// Record a warning instead of failing when a fragment ends with values
    /// still on the simulated stack.
    pub allow_leftover_data_on_stack: bool,
    /// Run the AST cleaner at all.
    pub clean_ast: bool,
    pub macro_resolution: bool,
    /// Rewrite `init; while (cond) { ...; step }` into `for` loops.
    pub convert_for_loops: bool,
    /// Drop the `exit` the compiler appends to every root code entry.
    pub remove_trailing_exit: bool,
    /// Print `enum` blocks for enum values resolved in the output.
    pub create_enum_declarations: bool,
}

impl Default for DecompileSettings {
    fn default() -> Self {
        Self {
            indent_string: "    ".to_string(),
            use_semicolon: true,
            open_block_braces_on_same_line: false,
            allow_leftover_data_on_stack: false,
            clean_ast: true,
            macro_resolution: true,
            convert_for_loops: true,
            remove_trailing_exit: true,
            create_enum_declarations: true,
        }
    }
}

impl DecompileSettings {
    /// Create settings with everything enabled except the features in the
    /// skip list:
    /// - `"clean-ast"`
    /// - `"macro-resolution"`
    /// - `"for-loops"`
    /// - `"trailing-exit"`
    /// - `"enum-declarations"`
    /// - `"strict-stack"`: allow leftover stack data (records a warning)
    pub fn from_skip_list(skip: &[&str]) -> Self {
        let mut settings = Self::default();
        settings.apply_skip_list(skip);
        settings
    }

    /// Disable the features in the skip list on top of these settings.
    pub fn apply_skip_list(&mut self, skip: &[&str]) {
        for name in skip {
            match *name {
                "clean-ast" => self.clean_ast = false,
                "macro-resolution" => self.macro_resolution = false,
                "for-loops" => self.convert_for_loops = false,
                "trailing-exit" => self.remove_trailing_exit = false,
                "enum-declarations" => self.create_enum_declarations = false,
                "strict-stack" => self.allow_leftover_data_on_stack = true,
                other => log::warn!("unknown feature to skip: {other}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_all() {
        let settings = DecompileSettings::default();
        assert!(settings.clean_ast);
        assert!(settings.macro_resolution);
        assert!(settings.convert_for_loops);
        assert!(settings.remove_trailing_exit);
        assert!(!settings.allow_leftover_data_on_stack);
        assert_eq!(settings.indent_string, "    ");
    }

    #[test]
    fn skip_list_disables_features() {
        let settings = DecompileSettings::from_skip_list(&["for-loops", "strict-stack", "bogus"]);
        assert!(!settings.convert_for_loops);
        assert!(settings.allow_leftover_data_on_stack);
        assert!(settings.macro_resolution);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings: DecompileSettings =
            serde_json::from_str(r#"{ "indent_string": "\t", "clean_ast": false }"#).unwrap();
        assert_eq!(settings.indent_string, "\t");
        assert!(!settings.clean_ast);
        assert!(settings.use_semicolon);
    }
}
