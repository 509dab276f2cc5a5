//! Game-specific macro types: enums, constants and asset names that integer
//! literals are rewritten into.
//!
//! A [`MacroRegistry`] maps variable names, function arguments and function
//! return values to a [`MacroType`], globally and per code entry. It is
//! usually loaded from JSON (see [`MacroRegistry::from_json`]).

mod json;
mod resolve;

use std::collections::{BTreeMap, HashMap};

use gmvm::AssetType;

/// Errors raised while loading a registry. Independent of decompilation.
#[derive(Debug, thiserror::Error)]
pub enum MacroRegistryError {
    #[error("registry JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{context}: unknown macro type {name:?}")]
    UnknownMacroType { context: String, name: String },

    #[error("{context}: reference to unregistered type {name:?}")]
    UnknownTypeReference { context: String, name: String },

    #[error("{context}: {message}")]
    Malformed { context: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroType {
    Enum {
        name: String,
        values: BTreeMap<i64, String>,
    },
    Constants(BTreeMap<i64, String>),
    Asset(AssetType),
    /// `0`/`1` as `false`/`true`.
    Boolean,
    /// Instance keywords for negative values, object names otherwise.
    InstanceType,
    /// Built-in `c_*` color constants.
    Color,
    /// First member that resolves.
    Union(Vec<MacroType>),
    /// Every member must pass; the result comes from the last member that is
    /// not a predicate.
    Intersect(Vec<MacroType>),
    /// Predicate on the expression: its kind (`Variable`, `Function`,
    /// `Integer`, `String`) and name or value.
    Match {
        condition_type: Option<String>,
        condition_value: Option<String>,
    },
    MatchNot {
        condition_type: Option<String>,
        condition_value: Option<String>,
    },
    /// Applies the element type to every element of an array literal.
    ArrayInit(Box<MacroType>),
    /// Positional argument types of a call; `None` leaves an argument alone.
    FunctionArgs(Vec<Option<MacroType>>),
}

impl MacroType {
    pub fn is_predicate(&self) -> bool {
        matches!(self, Self::Match { .. } | Self::MatchNot { .. })
    }
}

/// Types attached to names, at one scope (global or a single code entry).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameTypes {
    pub variables: HashMap<String, MacroType>,
    pub function_arguments: HashMap<String, MacroType>,
    pub function_returns: HashMap<String, MacroType>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroRegistry {
    /// Named types, referenced by name from descriptors.
    pub types: HashMap<String, MacroType>,
    pub global: NameTypes,
    pub code_entries: HashMap<String, NameTypes>,
    /// Argument names per code entry, replacing `argument0`, `argument1`, ...
    pub named_arguments: HashMap<String, Vec<String>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup<'a>(
        &'a self,
        code_entry: &str,
        name: &str,
        select: impl Fn(&'a NameTypes) -> &'a HashMap<String, MacroType>,
    ) -> Option<&'a MacroType> {
        self.code_entries
            .get(code_entry)
            .and_then(|names| select(names).get(name))
            .or_else(|| select(&self.global).get(name))
    }

    pub fn variable_type(&self, code_entry: &str, name: &str) -> Option<&MacroType> {
        self.lookup(code_entry, name, |n| &n.variables)
    }

    pub fn function_arguments_type(&self, code_entry: &str, function: &str) -> Option<&MacroType> {
        self.lookup(code_entry, function, |n| &n.function_arguments)
    }

    pub fn function_return_type(&self, code_entry: &str, function: &str) -> Option<&MacroType> {
        self.lookup(code_entry, function, |n| &n.function_returns)
    }

    pub fn argument_names(&self, code_entry: &str) -> Option<&[String]> {
        self.named_arguments.get(code_entry).map(Vec::as_slice)
    }

    /// Register the built-in types: `Bool`, `Id.Instance`, `Color`, and
    /// `Asset.<Type>` for every asset type.
    pub fn register_basic(&mut self) {
        self.types.insert("Bool".into(), MacroType::Boolean);
        self.types.insert("Id.Instance".into(), MacroType::InstanceType);
        self.types.insert("Color".into(), MacroType::Color);
        for asset_type in AssetType::all() {
            self.types
                .insert(format!("Asset.{}", asset_type.name()), MacroType::Asset(asset_type));
        }
    }
}

/// Enum values used by decompiled code, by enum name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumDeclarations {
    enums: BTreeMap<String, BTreeMap<i64, String>>,
}

impl EnumDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, enum_name: &str, value_name: &str, value: i64) {
        self.enums
            .entry(enum_name.to_string())
            .or_default()
            .insert(value, value_name.to_string());
    }

    /// Fold another table in. Values declared under the same enum name are
    /// combined; on a value clash the existing name wins.
    pub fn merge(&mut self, other: &EnumDeclarations) {
        for (name, values) in &other.enums {
            let target = self.enums.entry(name.clone()).or_default();
            for (value, value_name) in values {
                target.entry(*value).or_insert_with(|| value_name.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enums.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<i64, String>)> {
        self.enums.iter().map(|(name, values)| (name.as_str(), values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_entry_types_override_global_ones() {
        let mut registry = MacroRegistry::new();
        registry.global.variables.insert("state".into(), MacroType::Boolean);
        registry
            .code_entries
            .entry("gml_Object_obj_a_Step_0".into())
            .or_default()
            .variables
            .insert("state".into(), MacroType::Color);
        assert_eq!(
            registry.variable_type("gml_Object_obj_a_Step_0", "state"),
            Some(&MacroType::Color)
        );
        assert_eq!(registry.variable_type("gml_Script_b", "state"), Some(&MacroType::Boolean));
        assert_eq!(registry.variable_type("gml_Script_b", "other"), None);
    }

    #[test]
    fn merge_combines_values_of_the_same_enum() {
        let mut a = EnumDeclarations::new();
        a.record("State", "Idle", 0);
        let mut b = EnumDeclarations::new();
        b.record("State", "Walk", 1);
        b.record("State", "Other", 0);
        b.record("Dir", "Up", 0);
        a.merge(&b);
        let state: Vec<_> = a.iter().find(|(n, _)| *n == "State").unwrap().1.values().cloned().collect();
        assert_eq!(state, vec!["Idle".to_string(), "Walk".to_string()]);
        assert_eq!(a.iter().count(), 2);
    }
}
