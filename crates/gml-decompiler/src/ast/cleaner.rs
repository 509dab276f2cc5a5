//! Source-level rewrites of a built AST.
//!
//! The builder produces statements that mirror the bytecode. The cleaner
//! turns them into what a person would have written: named arguments,
//! symbolic macro values, `var` declarations, `for` loops, and instance and
//! function names instead of numbers and code entry names.

use std::collections::HashSet;

use gmvm::{AssetType, InstanceType};

use super::simulate::argument_index;
use super::{AssignKind, Expr, ExprKind, FunctionDecl, InstanceRef, MacroValue, Stmt, Variable};
use crate::context::GameContext;
use crate::control_flow::fragment::function_name;
use crate::control_flow::switch::RETURN_TEMP;
use crate::macros::{EnumDeclarations, MacroRegistry, MacroType};
use crate::settings::DecompileSettings;

/// The fragment being cleaned.
#[derive(Debug)]
struct Scope {
    code_entry: String,
    /// Name return types are registered under.
    function: String,
    arguments: Option<Vec<String>>,
}

pub struct AstCleaner<'a> {
    game: &'a dyn GameContext,
    settings: &'a DecompileSettings,
    scopes: Vec<Scope>,
    enums: EnumDeclarations,
}

impl<'a> AstCleaner<'a> {
    pub fn new(game: &'a dyn GameContext, settings: &'a DecompileSettings) -> Self {
        Self {
            game,
            settings,
            scopes: Vec::new(),
            enums: EnumDeclarations::new(),
        }
    }

    /// Clean the root fragment of `code_entry` in place, returning the enum
    /// values its macros resolved to.
    pub fn clean(mut self, code_entry: &str, body: &mut Vec<Stmt>) -> EnumDeclarations {
        self.enter(code_entry, None);
        self.clean_fragment(body);
        self.scopes.pop();
        if self.settings.remove_trailing_exit && matches!(body.last(), Some(Stmt::Exit)) {
            body.pop();
        }
        self.enums
    }

    fn registry(&self) -> &'a MacroRegistry {
        self.game.macro_registry()
    }

    fn enter(&mut self, code_entry: &str, name: Option<&str>) {
        let arguments = self.registry().argument_names(code_entry).map(<[String]>::to_vec);
        self.scopes.push(Scope {
            code_entry: code_entry.to_string(),
            function: name.unwrap_or_else(|| function_name(code_entry)).to_string(),
            arguments,
        });
    }

    fn scope(&self) -> Option<&Scope> {
        self.scopes.last()
    }

    fn code_entry(&self) -> &str {
        self.scope().map_or("", |s| s.code_entry.as_str())
    }

    fn clean_fragment(&mut self, body: &mut Vec<Stmt>) {
        self.clean_block(body);
        declare_locals(body, &mut HashSet::new());
    }

    fn clean_function(&mut self, decl: &mut FunctionDecl) {
        self.enter(&decl.code_entry, decl.name.as_deref());
        if let Some(names) = self.scope().and_then(|s| s.arguments.as_ref()) {
            for (argument, name) in decl.arguments.iter_mut().zip(names) {
                *argument = name.clone();
            }
        }
        self.clean_fragment(&mut decl.body);
        self.scopes.pop();
    }

    fn clean_block(&mut self, body: &mut Vec<Stmt>) {
        for stmt in body.iter_mut() {
            self.clean_stmt(stmt);
        }
        if self.settings.convert_for_loops {
            convert_for_loops(body);
        }
    }

    fn clean_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Assign { target, value, .. } => {
                self.clean_variable_deep(target);
                self.clean_expr(value);
                if self.settings.macro_resolution {
                    let ty = self.registry().variable_type(self.code_entry(), &target.name);
                    self.resolve_into(ty, value);
                }
            }
            Stmt::Expr(e) | Stmt::Throw(e) => self.clean_expr(e),
            Stmt::Return(e) => {
                self.clean_expr(e);
                if self.settings.macro_resolution {
                    let function = self.scope().map_or("", |s| s.function.as_str());
                    let ty = self.registry().function_return_type(self.code_entry(), function);
                    self.resolve_into(ty, e);
                }
            }
            Stmt::FunctionDecl(decl) => self.clean_function(decl),
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.clean_expr(condition);
                self.clean_block(then_body);
                if let Some(else_body) = else_body {
                    self.clean_block(else_body);
                }
            }
            Stmt::While { condition, body, .. } => {
                if let Some(condition) = condition {
                    self.clean_expr(condition);
                }
                self.clean_block(body);
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.clean_stmt(init);
                }
                self.clean_expr(condition);
                self.clean_stmt(step);
                self.clean_block(body);
            }
            Stmt::DoUntil { body, condition } => {
                self.clean_block(body);
                self.clean_expr(condition);
            }
            Stmt::Repeat { count, body } => {
                self.clean_expr(count);
                self.clean_block(body);
            }
            Stmt::With { target, body } => {
                self.clean_expr(target);
                self.name_with_target(target);
                self.clean_block(body);
            }
            Stmt::Switch { value, cases } => {
                self.clean_expr(value);
                let ty = self.type_of(value).filter(|_| self.settings.macro_resolution);
                for case in cases {
                    for label in case.labels.iter_mut().flatten() {
                        self.clean_expr(label);
                        self.resolve_into(ty, label);
                    }
                    self.clean_block(&mut case.body);
                }
            }
            Stmt::TryCatch {
                try_body,
                catch,
                finally,
            } => {
                self.clean_block(try_body);
                if let Some((_, body)) = catch {
                    self.clean_block(body);
                }
                if let Some(body) = finally {
                    self.clean_block(body);
                }
            }
            Stmt::Static(body) => self.clean_block(body),
            Stmt::Break | Stmt::Continue | Stmt::Exit => {}
        }
    }

    fn clean_expr(&mut self, expr: &mut Expr) {
        expr.walk_mut(&mut |e| self.rewrite(e));
    }

    /// Clean a variable that is not wrapped in an expression, such as an
    /// assignment target.
    fn clean_variable_deep(&mut self, variable: &mut Variable) {
        if let InstanceRef::Expr(e) = &mut variable.instance {
            self.clean_expr(e);
        }
        for index in &mut variable.indices {
            self.clean_expr(index);
        }
        self.clean_variable(variable);
    }

    fn rewrite(&mut self, e: &mut Expr) {
        match &mut e.kind {
            ExprKind::Variable(v) | ExprKind::IncDec { target: v, .. } => self.clean_variable(v),
            ExprKind::Function(decl) => self.clean_function(decl),
            ExprKind::FunctionRef(function) | ExprKind::Call { function, .. } => self.name_function(function),
            ExprKind::AssetRef { asset_type, id } => {
                if let Some(name) = self.game.asset_name(*asset_type, i64::from(*id)) {
                    e.kind = ExprKind::Macro(MacroValue::Asset(name.to_string()));
                }
            }
            _ => {}
        }
        if !self.settings.macro_resolution {
            return;
        }
        match &mut e.kind {
            ExprKind::Call { function, .. } => {
                let ty = self.registry().function_arguments_type(self.code_entry(), function);
                self.resolve_into(ty, e);
            }
            ExprKind::Compare { left, right, .. } => {
                if let Some(ty) = self.type_of(left) {
                    self.resolve_into(Some(ty), right);
                } else if let Some(ty) = self.type_of(right) {
                    self.resolve_into(Some(ty), left);
                }
            }
            _ => {}
        }
    }

    fn clean_variable(&mut self, variable: &mut Variable) {
        if let Some(index) = argument_index(&variable.name) {
            let is_argument = matches!(
                variable.instance,
                InstanceRef::Builtin(InstanceType::Arg | InstanceType::Own | InstanceType::Builtin)
            );
            let named = self
                .scope()
                .and_then(|s| s.arguments.as_ref())
                .and_then(|names| names.get(index));
            if let (true, Some(name)) = (is_argument, named) {
                variable.name = name.clone();
                variable.instance = InstanceRef::Builtin(InstanceType::Arg);
            }
        }
        // `global.room` written for a builtin global reads as plain `room`.
        if variable.instance == InstanceRef::Builtin(InstanceType::Global)
            && self.game.is_builtin_variable(&variable.name)
        {
            variable.instance = InstanceRef::Builtin(InstanceType::Builtin);
        }
        if let InstanceRef::Object { id, name: name @ None } = &mut variable.instance {
            *name = self
                .game
                .asset_name(AssetType::Object, i64::from(*id))
                .map(str::to_string);
        }
    }

    fn name_function(&self, function: &mut String) {
        if self.game.is_builtin_function(function) {
            return;
        }
        let name = match self.game.global_functions().name_of(function) {
            Some(name) => name,
            None => function_name(function),
        };
        if name != function.as_str() {
            *function = name.to_string();
        }
    }

    /// `with (-2)` reads as `with (other)`, `with (3)` as the object's name.
    fn name_with_target(&self, target: &mut Expr) {
        let Some(value) = target.int_value() else {
            return;
        };
        let kind = if value < 0 {
            match i16::try_from(value).ok().and_then(InstanceType::from_i16) {
                Some(instance) => ExprKind::InstanceType(instance),
                None => return,
            }
        } else {
            match self.game.asset_name(AssetType::Object, value) {
                Some(name) => ExprKind::Macro(MacroValue::Asset(name.to_string())),
                None => return,
            }
        };
        target.kind = kind;
    }

    /// Macro type attached to the value of `expr`.
    fn type_of(&self, expr: &Expr) -> Option<&'a MacroType> {
        let registry = self.registry();
        match &expr.kind {
            ExprKind::Variable(v) => registry.variable_type(self.code_entry(), &v.name),
            ExprKind::Call { function, .. } => registry.function_return_type(self.code_entry(), function),
            _ => None,
        }
    }

    fn resolve_into(&mut self, ty: Option<&MacroType>, expr: &mut Expr) {
        let Some(resolved) = ty.and_then(|ty| ty.resolve(expr, self.game)) else {
            return;
        };
        if resolved == *expr {
            return;
        }
        if self.settings.create_enum_declarations {
            resolved.walk(&mut |e| {
                if let ExprKind::Macro(MacroValue::EnumValue {
                    enum_name,
                    value_name,
                    value,
                }) = &e.kind
                {
                    self.enums.record(enum_name, value_name, *value);
                }
            });
        }
        *expr = resolved;
    }
}

/// Mark the first plain assignment of each local with `var`. Function bodies
/// are separate fragments and get their own pass.
fn declare_locals(body: &mut [Stmt], declared: &mut HashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign {
                target,
                kind: AssignKind::Normal,
                declare,
                ..
            } if target.is_local() && target.name != RETURN_TEMP => {
                if declared.insert(target.name.clone()) {
                    *declare = true;
                }
            }
            Stmt::If {
                then_body, else_body, ..
            } => {
                declare_locals(then_body, declared);
                if let Some(else_body) = else_body {
                    declare_locals(else_body, declared);
                }
            }
            Stmt::While { body, .. }
            | Stmt::DoUntil { body, .. }
            | Stmt::Repeat { body, .. }
            | Stmt::With { body, .. }
            | Stmt::Static(body) => declare_locals(body, declared),
            Stmt::For { init, body, .. } => {
                if let Some(init) = init {
                    declare_locals(std::slice::from_mut(init.as_mut()), declared);
                }
                declare_locals(body, declared);
            }
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    declare_locals(&mut case.body, declared);
                }
            }
            Stmt::TryCatch {
                try_body,
                catch,
                finally,
            } => {
                declare_locals(try_body, declared);
                if let Some((_, body)) = catch {
                    declare_locals(body, declared);
                }
                if let Some(body) = finally {
                    declare_locals(body, declared);
                }
            }
            _ => {}
        }
    }
}

/// Whether a `continue` in `body` belongs to the loop `body` is part of.
fn has_own_continue(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::Continue => true,
        Stmt::If {
            then_body, else_body, ..
        } => has_own_continue(then_body) || else_body.as_deref().is_some_and(has_own_continue),
        Stmt::Switch { cases, .. } => cases.iter().any(|c| has_own_continue(&c.body)),
        Stmt::TryCatch {
            try_body,
            catch,
            finally,
        } => {
            has_own_continue(try_body)
                || catch.as_ref().is_some_and(|(_, b)| has_own_continue(b))
                || finally.as_deref().is_some_and(has_own_continue)
        }
        Stmt::Static(body) => has_own_continue(body),
        _ => false,
    })
}

/// Variable a `for` step statement updates.
fn step_variable(stmt: &Stmt) -> Option<&Variable> {
    match stmt {
        Stmt::Assign { target, .. } if target.indices.is_empty() => Some(target),
        Stmt::Expr(Expr {
            kind: ExprKind::IncDec { target, .. },
            ..
        }) if target.indices.is_empty() => Some(target),
        _ => None,
    }
}

/// Whether `body[i]` can become a `for` loop, and if so whether the statement
/// before it is the loop's init.
///
/// A loop whose `continue`s jump to the step is always rewritten, with or
/// without an init statement. Any other loop needs an init and must not
/// `continue`, which would skip the step in a `while` but not in a `for`.
fn for_candidate(body: &[Stmt], i: usize) -> Option<bool> {
    let Stmt::While {
        condition: Some(condition),
        body: loop_body,
        continues_to_step,
    } = &body[i]
    else {
        return None;
    };
    let variable = loop_body.last().and_then(step_variable)?;
    if !condition.mentions(variable) {
        return None;
    }
    let has_init = i.checked_sub(1).and_then(|prev| body.get(prev)).is_some_and(|prev| {
        matches!(prev, Stmt::Assign { target, kind: AssignKind::Normal, .. } if target.same_as(variable))
    });
    (*continues_to_step || (has_init && !has_own_continue(loop_body))).then_some(has_init)
}

/// Rewrite `init; while (cond) { ...; step }` into `for (init; cond; step)`.
fn convert_for_loops(body: &mut Vec<Stmt>) {
    let mut i = 0;
    while i < body.len() {
        let Some(has_init) = for_candidate(body, i) else {
            i += 1;
            continue;
        };
        if let Stmt::While {
            condition,
            body: loop_body,
            ..
        } = &mut body[i]
        {
            if let (Some(condition), Some(step)) = (condition.take(), loop_body.pop()) {
                let converted = Stmt::For {
                    init: None,
                    condition,
                    step: Box::new(step),
                    body: std::mem::take(loop_body),
                };
                body[i] = converted;
            }
        }
        if has_init {
            let init = body.remove(i - 1);
            i -= 1;
            if let Stmt::For { init: slot, .. } = &mut body[i] {
                *slot = Some(Box::new(init));
            }
        }
        i += 1;
    }
}
