//! What the decompiler needs to know about the game a code entry came from.

use std::collections::{HashMap, HashSet};

use gmvm::AssetType;

use crate::global_functions::GlobalFunctions;
use crate::macros::MacroRegistry;

/// Game-level information consulted while decompiling.
///
/// Implementations are shared read-only across every code entry of a game,
/// including from the parallel global-function prescan.
pub trait GameContext: Send + Sync {
    /// GameMaker Studio 2 or later.
    fn uses_gms2(&self) -> bool {
        true
    }

    /// GMLv2 (GMS 2.3+): structs, functions, and one-dimensional array
    /// indexing. Before it, `a[i, j]` is encoded as a single index.
    fn uses_gmlv2(&self) -> bool {
        true
    }

    /// Whether the VM has a real boolean type. Before it, `true` and `false`
    /// are pushed as 16-bit 0 and 1.
    fn uses_typed_booleans(&self) -> bool {
        true
    }

    /// Assets are pushed with `pushref` (2023.8+), so plain integers are
    /// never asset indices.
    fn uses_asset_references(&self) -> bool {
        false
    }

    /// Room instances are pushed with `pushref` rather than as raw ids.
    fn uses_room_instance_references(&self) -> bool {
        false
    }

    fn is_bytecode_14_or_lower(&self) -> bool {
        false
    }

    /// try/finally laid out the pre-2024.6 way, finally body before catch.
    fn uses_older_exception_handling(&self) -> bool {
        false
    }

    fn is_builtin_variable(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    fn is_builtin_function(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    fn global_functions(&self) -> &GlobalFunctions;

    fn macro_registry(&self) -> &MacroRegistry;

    /// Name of the asset of `asset_type` with index `id`.
    fn asset_name(&self, asset_type: AssetType, id: i64) -> Option<&str> {
        let _ = (asset_type, id);
        None
    }

    /// Index of the asset of `asset_type` called `name`.
    fn asset_id(&self, asset_type: AssetType, name: &str) -> Option<i64> {
        let _ = (asset_type, name);
        None
    }

    fn script_id(&self, name: &str) -> Option<i64> {
        self.asset_id(AssetType::Script, name)
    }
}

/// A `GameContext` backed by in-memory tables.
#[derive(Debug, Clone)]
pub struct SimpleGameContext {
    pub gms2: bool,
    pub gmlv2: bool,
    pub typed_booleans: bool,
    pub asset_references: bool,
    pub room_instance_references: bool,
    pub bytecode_14_or_lower: bool,
    pub older_exception_handling: bool,
    pub global_functions: GlobalFunctions,
    pub macro_registry: MacroRegistry,
    pub assets: HashMap<(AssetType, i64), String>,
    pub builtin_variables: HashSet<String>,
    pub builtin_functions: HashSet<String>,
}

impl Default for SimpleGameContext {
    fn default() -> Self {
        Self {
            gms2: true,
            gmlv2: true,
            typed_booleans: true,
            asset_references: false,
            room_instance_references: false,
            bytecode_14_or_lower: false,
            older_exception_handling: false,
            global_functions: GlobalFunctions::default(),
            macro_registry: MacroRegistry::default(),
            assets: HashMap::new(),
            builtin_variables: HashSet::new(),
            builtin_functions: HashSet::new(),
        }
    }
}

impl SimpleGameContext {
    pub fn with_registry(macro_registry: MacroRegistry) -> Self {
        Self {
            macro_registry,
            ..Self::default()
        }
    }

    pub fn add_asset(&mut self, asset_type: AssetType, id: i64, name: impl Into<String>) {
        self.assets.insert((asset_type, id), name.into());
    }
}

impl GameContext for SimpleGameContext {
    fn uses_gms2(&self) -> bool {
        self.gms2 && !self.bytecode_14_or_lower
    }

    /// GMLv2 features need a GMS2 runtime.
    fn uses_gmlv2(&self) -> bool {
        self.gmlv2 && self.uses_gms2()
    }

    fn uses_typed_booleans(&self) -> bool {
        self.typed_booleans && !self.bytecode_14_or_lower
    }

    fn uses_asset_references(&self) -> bool {
        self.asset_references
    }

    fn uses_room_instance_references(&self) -> bool {
        self.room_instance_references
    }

    fn is_bytecode_14_or_lower(&self) -> bool {
        self.bytecode_14_or_lower
    }

    fn uses_older_exception_handling(&self) -> bool {
        self.older_exception_handling
    }

    fn is_builtin_variable(&self, name: &str) -> bool {
        self.builtin_variables.contains(name)
    }

    fn is_builtin_function(&self, name: &str) -> bool {
        self.builtin_functions.contains(name)
    }

    fn global_functions(&self) -> &GlobalFunctions {
        &self.global_functions
    }

    fn macro_registry(&self) -> &MacroRegistry {
        &self.macro_registry
    }

    fn asset_name(&self, asset_type: AssetType, id: i64) -> Option<&str> {
        self.assets.get(&(asset_type, id)).map(String::as_str)
    }

    fn asset_id(&self, asset_type: AssetType, name: &str) -> Option<i64> {
        self.assets
            .iter()
            .find(|((ty, _), asset)| *ty == asset_type && asset.as_str() == name)
            .map(|((_, id), _)| *id)
    }
}
