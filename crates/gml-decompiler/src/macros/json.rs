//! Registry JSON loading.
//!
//! ```json
//! {
//!   "Types": {
//!     "RegisterBasic": true,
//!     "Enums": { "State": { "Values": { "0": "Idle", "1": "Walk" } } },
//!     "Constants": { "Keys": { "Values": { "37": "vk_left" } } },
//!     "General": { "StateOrBool": { "MacroType": "Union", "Types": ["State", "Bool"] } }
//!   },
//!   "GlobalNames": {
//!     "Variables": { "state": "State" },
//!     "FunctionArguments": { "set_state": ["State", null] },
//!     "FunctionReturn": { "get_state": "State" }
//!   },
//!   "CodeEntryNames": { "gml_Script_foo": { "Variables": { "x": "Bool" } } },
//!   "NamedArguments": { "gml_Script_foo": ["first", "second"] }
//! }
//! ```
//!
//! Named types may reference each other in any order; a reference cycle is
//! reported as an unknown reference.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{MacroRegistry, MacroRegistryError, MacroType, NameTypes};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RegistryFile {
    types: TypesSection,
    global_names: NamesSection,
    code_entry_names: BTreeMap<String, NamesSection>,
    named_arguments: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct TypesSection {
    register_basic: bool,
    enums: Map<String, Value>,
    constants: Map<String, Value>,
    general: Map<String, Value>,
    other: Map<String, Value>,
    custom: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct NamesSection {
    variables: Map<String, Value>,
    function_arguments: Map<String, Value>,
    function_return: Map<String, Value>,
}

fn malformed(context: &str, message: impl Into<String>) -> MacroRegistryError {
    MacroRegistryError::Malformed {
        context: context.to_string(),
        message: message.into(),
    }
}

/// `{ "0": "Idle" }` or `{ "Idle": 0 }`, optionally wrapped in `{ "Values": ... }`.
fn parse_values(context: &str, value: &Value) -> Result<BTreeMap<i64, String>, MacroRegistryError> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed(context, "expected an object of values"))?;
    let object = match object.get("Values") {
        Some(inner) => inner
            .as_object()
            .ok_or_else(|| malformed(context, "\"Values\" must be an object"))?,
        None => object,
    };
    let mut values = BTreeMap::new();
    for (key, entry) in object {
        if let Ok(number) = key.parse::<i64>() {
            let name = entry
                .as_str()
                .ok_or_else(|| malformed(context, format!("value {key} needs a name")))?;
            values.insert(number, name.to_string());
        } else {
            let number = entry
                .as_i64()
                .ok_or_else(|| malformed(context, format!("{key} needs an integer value")))?;
            values.insert(number, key.clone());
        }
    }
    Ok(values)
}

struct Loader<'a> {
    raw: HashMap<String, &'a Value>,
    resolved: HashMap<String, MacroType>,
    resolving: HashSet<String>,
}

impl<'a> Loader<'a> {
    fn named(&mut self, context: &str, name: &str) -> Result<MacroType, MacroRegistryError> {
        if let Some(found) = self.resolved.get(name) {
            return Ok(found.clone());
        }
        let unknown = || MacroRegistryError::UnknownTypeReference {
            context: context.to_string(),
            name: name.to_string(),
        };
        let raw = *self.raw.get(name).ok_or_else(unknown)?;
        if !self.resolving.insert(name.to_string()) {
            return Err(unknown());
        }
        let parsed = self.descriptor(name, raw)?;
        self.resolving.remove(name);
        self.resolved.insert(name.to_string(), parsed.clone());
        Ok(parsed)
    }

    fn descriptor(&mut self, context: &str, value: &Value) -> Result<MacroType, MacroRegistryError> {
        match value {
            Value::String(name) => self.named(context, name),
            Value::Array(items) => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    args.push(match item {
                        Value::Null => None,
                        item => Some(self.descriptor(context, item)?),
                    });
                }
                Ok(MacroType::FunctionArgs(args))
            }
            Value::Object(object) => {
                let kind = object
                    .get("MacroType")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed(context, "object without \"MacroType\""))?;
                let field = |name: &str| {
                    object
                        .get(name)
                        .ok_or_else(|| malformed(context, format!("{kind} needs \"{name}\"")))
                };
                let text = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_string);
                Ok(match kind {
                    "Enum" => MacroType::Enum {
                        name: text("Name").unwrap_or_else(|| context.to_string()),
                        values: parse_values(context, field("Values")?)?,
                    },
                    "Constants" => MacroType::Constants(parse_values(context, field("Values")?)?),
                    "Union" | "Intersect" => {
                        let members = field("Types")?
                            .as_array()
                            .ok_or_else(|| malformed(context, "\"Types\" must be an array"))?;
                        let members = members
                            .iter()
                            .map(|m| self.descriptor(context, m))
                            .collect::<Result<Vec<_>, _>>()?;
                        if kind == "Union" {
                            MacroType::Union(members)
                        } else {
                            MacroType::Intersect(members)
                        }
                    }
                    "ArrayInit" => MacroType::ArrayInit(Box::new(self.descriptor(context, field("Type")?)?)),
                    "Match" => MacroType::Match {
                        condition_type: text("ConditionalType"),
                        condition_value: text("ConditionalValue"),
                    },
                    "MatchNot" => MacroType::MatchNot {
                        condition_type: text("ConditionalType"),
                        condition_value: text("ConditionalValue"),
                    },
                    other => {
                        return Err(MacroRegistryError::UnknownMacroType {
                            context: context.to_string(),
                            name: other.to_string(),
                        })
                    }
                })
            }
            _ => Err(malformed(context, "expected a string, array or object")),
        }
    }

    fn names(&mut self, section: &NamesSection) -> Result<NameTypes, MacroRegistryError> {
        let mut out = NameTypes::default();
        for (source, target) in [
            (&section.variables, &mut out.variables),
            (&section.function_arguments, &mut out.function_arguments),
            (&section.function_return, &mut out.function_returns),
        ] {
            for (name, value) in source {
                target.insert(name.clone(), self.descriptor(name, value)?);
            }
        }
        Ok(out)
    }
}

impl MacroRegistry {
    /// Load a registry from its JSON form.
    pub fn from_json(text: &str) -> Result<Self, MacroRegistryError> {
        let file: RegistryFile = serde_json::from_str(text)?;
        let mut registry = MacroRegistry::new();
        if file.types.register_basic {
            registry.register_basic();
        }

        let mut loader = Loader {
            raw: HashMap::new(),
            resolved: registry.types.clone(),
            resolving: HashSet::new(),
        };
        for (name, value) in &file.types.enums {
            loader.resolved.insert(
                name.clone(),
                MacroType::Enum {
                    name: value
                        .get("Name")
                        .and_then(Value::as_str)
                        .unwrap_or(name)
                        .to_string(),
                    values: parse_values(name, value)?,
                },
            );
        }
        for (name, value) in &file.types.constants {
            loader
                .resolved
                .insert(name.clone(), MacroType::Constants(parse_values(name, value)?));
        }
        for section in [&file.types.general, &file.types.other, &file.types.custom] {
            for (name, value) in section {
                loader.raw.insert(name.clone(), value);
            }
        }
        let names: Vec<String> = loader.raw.keys().cloned().collect();
        for name in names {
            loader.named(&name, &name)?;
        }

        registry.global = loader.names(&file.global_names)?;
        for (entry, section) in &file.code_entry_names {
            let names = loader.names(section)?;
            registry.code_entries.insert(entry.clone(), names);
        }
        registry.named_arguments = file.named_arguments.into_iter().collect();
        registry.types = loader.resolved;
        log::debug!(
            "macro registry: {} types, {} code entry overrides",
            registry.types.len(),
            registry.code_entries.len()
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "Types": {
            "RegisterBasic": true,
            "Enums": { "State": { "Values": { "0": "Idle", "1": "Walk" } } },
            "General": {
                "StateOrBool": { "MacroType": "Union", "Types": ["State", "Bool"] },
                "Keys": { "MacroType": "Constants", "Values": { "vk_left": 37 } }
            }
        },
        "GlobalNames": {
            "Variables": { "state": "StateOrBool" },
            "FunctionArguments": { "set_state": ["State", null] }
        },
        "CodeEntryNames": { "gml_Script_foo": { "Variables": { "key": "Keys" } } },
        "NamedArguments": { "gml_Script_foo": ["first", "second"] }
    }"#;

    #[test]
    fn loads_types_names_and_arguments() {
        let registry = MacroRegistry::from_json(REGISTRY).unwrap();
        assert!(matches!(
            registry.variable_type("anything", "state"),
            Some(MacroType::Union(members)) if members.len() == 2
        ));
        match registry.variable_type("gml_Script_foo", "key") {
            Some(MacroType::Constants(values)) => assert_eq!(values.get(&37).map(String::as_str), Some("vk_left")),
            other => panic!("unexpected {other:?}"),
        }
        match registry.function_arguments_type("x", "set_state") {
            Some(MacroType::FunctionArgs(args)) => {
                assert!(matches!(args[0], Some(MacroType::Enum { .. })));
                assert!(args[1].is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            registry.argument_names("gml_Script_foo"),
            Some(&["first".to_string(), "second".to_string()][..])
        );
        assert!(registry.types.contains_key("Asset.Sprite"));
    }

    #[test]
    fn unknown_discriminator_and_reference_are_errors() {
        let err = MacroRegistry::from_json(r#"{ "Types": { "General": { "A": { "MacroType": "Bogus" } } } }"#)
            .unwrap_err();
        assert!(matches!(err, MacroRegistryError::UnknownMacroType { .. }));

        let err = MacroRegistry::from_json(r#"{ "GlobalNames": { "Variables": { "x": "Missing" } } }"#).unwrap_err();
        assert!(matches!(err, MacroRegistryError::UnknownTypeReference { .. }));

        let err = MacroRegistry::from_json(r#"{ "Types": { "General": { "A": "B", "B": "A" } } }"#).unwrap_err();
        assert!(matches!(err, MacroRegistryError::UnknownTypeReference { .. }));

        assert!(matches!(
            MacroRegistry::from_json("{ not json").unwrap_err(),
            MacroRegistryError::Json(_)
        ));
    }
}
