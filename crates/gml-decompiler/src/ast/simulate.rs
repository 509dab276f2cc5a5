//! Symbolic execution of VM instructions against an expression stack.
//!
//! Each fragment (the root code entry or an embedded function) gets its own
//! [`FragmentContext`]. Straight-line instructions push and pop expressions;
//! stores, discarded values, returns and exits become statements.

use std::collections::HashMap;

use gmvm::{
    AssetType, DataType, ExtendedOpcode, InstanceType, Instruction, Opcode, Operand, VariableOperand, VariableType,
};

use super::{AssignKind, BinaryOp, Expr, ExprKind, FunctionDecl, IncDecPosition, InstanceRef, Stmt, UnaryOp, Variable};
use crate::context::GameContext;
use crate::control_flow::fragment::function_name;
use crate::control_flow::switch::RETURN_TEMP;
use crate::error::BuildError;

/// Pre-GMLv2 `a[i, j]` is flattened to `a[i * 32000 + j]`.
const LEGACY_ARRAY_STRIDE: i64 = 32000;

const NEW_ARRAY: &str = "@@NewGMLArray@@";
const NEW_OBJECT: &str = "@@NewGMLObject@@";
const THROW: &str = "@@throw@@";
const METHOD: &str = "method";
/// Marks a struct literal's constructor code entry.
const STRUCT_MARKER: &str = "___struct___";

/// Simulation state of one fragment.
#[derive(Debug, Default)]
pub struct FragmentContext {
    pub code_entry: String,
    pub argument_count: u16,
    pub stack: Vec<Expr>,
    /// Embedded functions already built, waiting for the `push.i [function]`
    /// that references them.
    pub functions: HashMap<String, FunctionDecl>,
    /// Value stored to the switch return temporary, read back by the push
    /// right before `ret`.
    return_value: Option<Expr>,
}

fn unexpected(inst: &Instruction) -> BuildError {
    BuildError::UnexpectedInstruction {
        address: inst.address,
        instruction: inst.to_string(),
    }
}

/// Rank used to pick the result type of a binary operation.
fn type_rank(ty: DataType) -> u8 {
    match ty {
        DataType::Variable => 4,
        DataType::Double => 3,
        DataType::Int64 => 2,
        DataType::Bool => 0,
        _ => 1,
    }
}

fn result_type(a: DataType, b: DataType) -> DataType {
    let wider = if type_rank(a) >= type_rank(b) { a } else { b };
    if type_rank(wider) == 1 {
        DataType::Int32
    } else {
        wider
    }
}

/// Where a variable lives, from an instance value popped off the stack.
fn instance_ref(expr: Expr) -> InstanceRef {
    if let ExprKind::InstanceType(ty) = expr.kind {
        return InstanceRef::Builtin(ty);
    }
    match expr.int_value().and_then(|v| i16::try_from(v).ok()) {
        Some(id) if id >= 0 => InstanceRef::Object { id, name: None },
        Some(id) => match InstanceType::from_i16(id) {
            Some(ty) => InstanceRef::Builtin(ty),
            None => InstanceRef::Expr(Box::new(expr)),
        },
        None => InstanceRef::Expr(Box::new(expr)),
    }
}

fn operand_instance(instance: i16) -> InstanceRef {
    if instance >= 0 {
        return InstanceRef::Object { id: instance, name: None };
    }
    InstanceRef::Builtin(InstanceType::from_i16(instance).unwrap_or(InstanceType::Own))
}

/// `(i, j)` from a flattened `i * 32000 + j` index.
fn split_legacy_index(index: &Expr) -> Option<(Expr, Expr)> {
    let ExprKind::Binary {
        op: BinaryOp::Add,
        left,
        right,
    } = &index.kind
    else {
        return None;
    };
    let ExprKind::Binary {
        op: BinaryOp::Mul,
        left: first,
        right: stride,
    } = &left.kind
    else {
        return None;
    };
    (stride.int_value() == Some(LEGACY_ARRAY_STRIDE)).then(|| ((**first).clone(), (**right).clone()))
}

/// `N` of an `argumentN` variable.
pub(crate) fn argument_index(name: &str) -> Option<usize> {
    name.strip_prefix("argument")?.parse().ok()
}

/// Whether `variable_name` is what a function code entry gets bound to.
fn binds_function(variable_name: &str, code_entry: &str) -> bool {
    let name = function_name(code_entry);
    name == variable_name
        || name
            .strip_prefix(variable_name)
            .is_some_and(|rest| rest.starts_with("_gml_"))
}

/// Field list of a struct literal whose constructor body is `decl`, with
/// `argumentN` replaced by the values passed to it.
fn struct_fields(decl: &FunctionDecl, args: &[Expr]) -> Option<Vec<(String, Expr)>> {
    decl.body
        .iter()
        .map(|stmt| match stmt {
            Stmt::Assign {
                target,
                value,
                kind: AssignKind::Normal,
                ..
            } => {
                let mut value = value.clone();
                value.walk_mut(&mut |e| {
                    let index = e.as_variable().and_then(|v| argument_index(&v.name));
                    if let Some(arg) = index.and_then(|i| args.get(i)) {
                        *e = arg.clone();
                    }
                });
                Some((target.name.clone(), value))
            }
            _ => None,
        })
        .collect()
}

impl FragmentContext {
    pub fn new(code_entry: impl Into<String>, argument_count: u16) -> Self {
        Self {
            code_entry: code_entry.into(),
            argument_count,
            ..Self::default()
        }
    }

    fn pop(&mut self, inst: &Instruction) -> Result<Expr, BuildError> {
        self.stack.pop().ok_or_else(|| BuildError::StackUnderflow {
            address: inst.address,
            instruction: inst.to_string(),
        })
    }

    /// Number of items from the top (after skipping `skip`) that make up
    /// `bytes` bytes of VM stack.
    fn items_spanning(&self, inst: &Instruction, bytes: u32, skip: usize) -> Result<usize, BuildError> {
        let mut total = 0;
        let mut count = 0;
        for item in self.stack.iter().rev().skip(skip) {
            if total >= bytes {
                break;
            }
            total += item.stack_type.stack_size();
            count += 1;
        }
        if total < bytes {
            return Err(BuildError::StackUnderflow {
                address: inst.address,
                instruction: inst.to_string(),
            });
        }
        Ok(count)
    }

    /// Simulate one instruction, appending any statement it completes.
    pub fn execute(&mut self, inst: &Instruction, game: &dyn GameContext, out: &mut Vec<Stmt>) -> Result<(), BuildError> {
        match inst.opcode {
            // ============================================================
            // Pushes
            // ============================================================
            Opcode::Push | Opcode::PushLoc | Opcode::PushGlb | Opcode::PushBltn | Opcode::PushI => {
                let expr = self.push_operand(inst, game)?;
                self.stack.push(expr);
            }

            // ============================================================
            // Arithmetic, bitwise and comparison
            // ============================================================
            op if op.is_binary() => {
                let right = self.pop(inst)?;
                let left = self.pop(inst)?;
                let op = BinaryOp::from_opcode(op).ok_or_else(|| unexpected(inst))?;
                self.stack.push(Expr::new(
                    ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    result_type(inst.type1, inst.type2),
                ));
            }
            Opcode::Cmp => {
                let right = self.pop(inst)?;
                let left = self.pop(inst)?;
                let kind = inst.comparison().ok_or_else(|| unexpected(inst))?;
                self.stack.push(Expr::new(
                    ExprKind::Compare {
                        kind,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    DataType::Bool,
                ));
            }
            Opcode::Neg | Opcode::Not => {
                let operand = self.pop(inst)?;
                let op = match inst.opcode {
                    Opcode::Neg => UnaryOp::Negate,
                    _ if inst.type1 == DataType::Bool => UnaryOp::Not,
                    _ => UnaryOp::BitwiseNot,
                };
                self.stack.push(Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    inst.type1,
                ));
            }
            Opcode::Conv => {
                let mut value = self.pop(inst)?;
                if inst.type2 == DataType::Bool && !game.uses_typed_booleans() {
                    if let ExprKind::Int16 { value: v @ (0 | 1), .. } = value.kind {
                        value.kind = ExprKind::Bool(v == 1);
                    }
                }
                value.stack_type = inst.type2;
                self.stack.push(value);
            }

            // ============================================================
            // Stack manipulation
            // ============================================================
            Opcode::Dup => {
                let Operand::Dup { size, swap } = inst.operand else {
                    return Err(unexpected(inst));
                };
                let unit = inst.type1.stack_size();
                if swap == 0 {
                    self.duplicate(inst, size, unit)?;
                } else {
                    self.dup_swap(inst, size as u32 * unit, swap as u32 * unit)?;
                }
            }
            Opcode::Popz => {
                let value = self.pop(inst)?;
                out.push(match value.kind {
                    ExprKind::Function(decl) if decl.name.is_some() => Stmt::FunctionDecl(decl),
                    ExprKind::Throw(inner) => Stmt::Throw(*inner),
                    kind => Stmt::Expr(Expr {
                        kind,
                        duplicated: value.duplicated,
                        stack_type: value.stack_type,
                    }),
                });
            }
            Opcode::Pop => match &inst.operand {
                Operand::PopSwap(size) => self.pop_swap(inst, *size)?,
                Operand::Variable(var) => self.pop_variable(inst, var, game, out)?,
                _ => return Err(unexpected(inst)),
            },

            // ============================================================
            // Calls
            // ============================================================
            Opcode::Call => {
                let Operand::Call { function, argc } = &inst.operand else {
                    return Err(unexpected(inst));
                };
                let args = (0..*argc).map(|_| self.pop(inst)).collect::<Result<Vec<_>, _>>()?;
                let expr = self.call(function, args);
                self.stack.push(expr);
            }
            Opcode::CallV => {
                let argc = inst.argc().ok_or_else(|| unexpected(inst))?;
                let function = self.pop(inst)?;
                let instance = self.pop(inst)?;
                let args = (0..argc).map(|_| self.pop(inst)).collect::<Result<Vec<_>, _>>()?;
                self.stack.push(Expr::new(
                    ExprKind::VariableCall {
                        function: Box::new(function),
                        instance: Box::new(instance),
                        args,
                    },
                    DataType::Variable,
                ));
            }

            // ============================================================
            // Returns
            // ============================================================
            Opcode::Ret => {
                let value = self.pop(inst)?;
                out.push(Stmt::Return(value));
            }
            Opcode::Exit => out.push(Stmt::Exit),

            // Early `with` exits are folded into the loop's break.
            Opcode::PopEnv if inst.operand == Operand::PopEnvExit => {}

            Opcode::Extended => self.extended(inst, game, out)?,

            // Branches and environment changes are consumed by control-flow
            // folding and never reach the simulator.
            _ => return Err(unexpected(inst)),
        }
        Ok(())
    }

    fn push_operand(&mut self, inst: &Instruction, game: &dyn GameContext) -> Result<Expr, BuildError> {
        Ok(match &inst.operand {
            Operand::Int16(value) => Expr::new(
                ExprKind::Int16 {
                    value: *value,
                    regular_push: inst.opcode == Opcode::Push,
                },
                DataType::Int16,
            ),
            Operand::Int32(v) => Expr::new(ExprKind::Int32(*v), DataType::Int32),
            Operand::Int64(v) => Expr::new(ExprKind::Int64(*v), DataType::Int64),
            Operand::Double(v) => Expr::new(ExprKind::Double(*v), DataType::Double),
            Operand::Bool(v) => Expr::new(ExprKind::Bool(*v), DataType::Bool),
            Operand::String(s) => Expr::new(ExprKind::String(s.clone()), DataType::String),
            Operand::Function(name) => match self.functions.remove(name) {
                Some(decl) => Expr::new(ExprKind::Function(Box::new(decl)), DataType::Int32),
                None => Expr::new(ExprKind::FunctionRef(name.clone()), DataType::Int32),
            },
            Operand::Variable(var) => {
                if var.name == RETURN_TEMP {
                    if let Some(value) = self.return_value.take() {
                        return Ok(value);
                    }
                }
                Expr::variable(self.variable_access(inst, var, game)?)
            }
            _ => return Err(unexpected(inst)),
        })
    }

    /// Pop whatever a variable access takes from the stack (array index and
    /// instance, or just the instance) and build the variable.
    fn variable_access(
        &mut self,
        inst: &Instruction,
        var: &VariableOperand,
        game: &dyn GameContext,
    ) -> Result<Variable, BuildError> {
        let mut variable = Variable::new(var.name.clone(), InstanceType::Own);
        let stacktop = var.var_type == VariableType::StackTop || var.instance == InstanceType::Stacktop as i16;
        if var.var_type.is_array() {
            let index = self.pop(inst)?;
            let instance = self.pop(inst)?;
            variable.instance = instance_ref(instance);
            match split_legacy_index(&index).filter(|_| !game.uses_gmlv2()) {
                Some((first, second)) => {
                    variable.indices = vec![first, second];
                    variable.legacy_2d = true;
                }
                None => variable.indices.push(index),
            }
        } else if stacktop {
            let instance = self.pop(inst)?;
            variable.instance = instance_ref(instance);
        } else {
            variable.instance = operand_instance(var.instance);
        }
        Ok(variable)
    }

    fn duplicate(&mut self, inst: &Instruction, size: u8, unit: u32) -> Result<(), BuildError> {
        // `dup.x 0` copies one item whatever its recorded type.
        let count = if size == 0 {
            1
        } else {
            self.items_spanning(inst, (size as u32 + 1) * unit, 0)?
        };
        let start = self.stack.len().checked_sub(count).ok_or_else(|| BuildError::StackUnderflow {
            address: inst.address,
            instruction: inst.to_string(),
        })?;
        let copies: Vec<Expr> = self.stack[start..]
            .iter()
            .cloned()
            .map(|mut e| {
                e.duplicated = true;
                e
            })
            .collect();
        self.stack.extend(copies);
        Ok(())
    }

    /// Swap the top `top_bytes` of the stack with the `below_bytes` under it.
    fn dup_swap(&mut self, inst: &Instruction, top_bytes: u32, below_bytes: u32) -> Result<(), BuildError> {
        let top = self.items_spanning(inst, top_bytes, 0)?;
        let below = self.items_spanning(inst, below_bytes, top)?;
        let len = self.stack.len();
        let moved = self.stack.split_off(len - top);
        let under = self.stack.split_off(len - top - below);
        self.stack.extend(moved);
        self.stack.extend(under);
        Ok(())
    }

    /// `pop.e.v 5` moves the top item under the one below it, `pop.e.v 6`
    /// under the two below it.
    fn pop_swap(&mut self, inst: &Instruction, size: u8) -> Result<(), BuildError> {
        let top = self.pop(inst)?;
        let depth = usize::from(size.saturating_sub(4));
        let at = self.stack.len().checked_sub(depth).ok_or_else(|| BuildError::StackUnderflow {
            address: inst.address,
            instruction: inst.to_string(),
        })?;
        self.stack.insert(at, top);
        Ok(())
    }

    fn pop_variable(
        &mut self,
        inst: &Instruction,
        var: &VariableOperand,
        game: &dyn GameContext,
        out: &mut Vec<Stmt>,
    ) -> Result<(), BuildError> {
        // `pop.i.v` stores a value pushed after the index and instance.
        let value_first = if inst.type1 == DataType::Int32 {
            Some(self.pop(inst)?)
        } else {
            None
        };
        let target = self.variable_access(inst, var, game)?;
        let value = match value_first {
            Some(value) => value,
            None => self.pop(inst)?,
        };
        if var.name == RETURN_TEMP {
            self.return_value = Some(value);
            return Ok(());
        }
        self.assign(target, value, out);
        Ok(())
    }

    /// Store `value` to `target`, recognizing the increment, compound and
    /// function-binding forms.
    fn assign(&mut self, target: Variable, value: Expr, out: &mut Vec<Stmt>) {
        if value.duplicated {
            if let ExprKind::Function(decl) = &value.kind {
                if binds_function(&target.name, &decl.code_entry) {
                    if let Some(ExprKind::Function(top)) = self.stack.last_mut().map(|e| &mut e.kind) {
                        top.name = Some(target.name);
                        return;
                    }
                }
            }
        }

        if let ExprKind::Binary { op, left, right } = &value.kind {
            let increment = *op == BinaryOp::Add;
            let steps_by_one = matches!(op, BinaryOp::Add | BinaryOp::Sub) && right.is_regular_one();
            let left_is_target = left.as_variable().is_some_and(|v| v.same_as(&target));

            // `++x` as a value: the new value was duplicated before the store.
            if steps_by_one && left_is_target && value.duplicated {
                if let Some(top) = self.stack.last_mut().filter(|top| top.same_as(&value)) {
                    top.kind = ExprKind::IncDec {
                        target,
                        position: IncDecPosition::Prefix,
                        increment,
                    };
                    top.duplicated = false;
                    return;
                }
            }
            // `x++` as a value: the old value was duplicated before the add.
            if steps_by_one && left_is_target && left.duplicated {
                let top_is_target = self
                    .stack
                    .last()
                    .and_then(Expr::as_variable)
                    .is_some_and(|v| v.same_as(&target));
                if let Some(top) = self.stack.last_mut().filter(|_| top_is_target) {
                    top.kind = ExprKind::IncDec {
                        target,
                        position: IncDecPosition::Postfix,
                        increment,
                    };
                    return;
                }
            }

            // Array and instance-expression targets only count as compound
            // when the read reused the store's index and instance.
            let simple = target.indices.is_empty() && !matches!(target.instance, InstanceRef::Expr(_));
            let reuses_parts = left.as_variable().is_some_and(Variable::has_duplicated_parts);
            if left_is_target && (simple || reuses_parts) {
                let kind = if steps_by_one {
                    AssignKind::Postfix { increment }
                } else {
                    AssignKind::Compound(*op)
                };
                out.push(Stmt::Assign {
                    target,
                    value: (**right).clone(),
                    kind,
                    declare: false,
                });
                return;
            }
        }

        out.push(Stmt::Assign {
            target,
            value,
            kind: AssignKind::Normal,
            declare: false,
        });
    }

    fn call(&mut self, function: &str, mut args: Vec<Expr>) -> Expr {
        let kind = match function {
            NEW_ARRAY => ExprKind::ArrayInit(args),
            NEW_OBJECT if !args.is_empty() => {
                let constructor = args.remove(0);
                let fields = match &constructor.kind {
                    ExprKind::Function(decl) if decl.code_entry.contains(STRUCT_MARKER) => struct_fields(decl, &args),
                    _ => None,
                };
                match fields {
                    Some(fields) => ExprKind::StructInit(fields),
                    None => ExprKind::New {
                        constructor: Box::new(constructor),
                        args,
                    },
                }
            }
            THROW if args.len() == 1 => ExprKind::Throw(Box::new(args.remove(0))),
            METHOD if args.len() == 2 && matches!(args[1].kind, ExprKind::Function(_)) => {
                return args.remove(1);
            }
            "@@This@@" => ExprKind::InstanceType(InstanceType::Own),
            "@@Other@@" => ExprKind::InstanceType(InstanceType::Other),
            "@@Global@@" => ExprKind::InstanceType(InstanceType::Global),
            _ => ExprKind::Call {
                function: function.to_string(),
                args,
            },
        };
        Expr::new(kind, DataType::Variable)
    }

    fn extended(&mut self, inst: &Instruction, game: &dyn GameContext, out: &mut Vec<Stmt>) -> Result<(), BuildError> {
        let Some(op) = inst.extended else {
            return Err(unexpected(inst));
        };
        match op {
            ExtendedOpcode::CheckArrayIndex
            | ExtendedOpcode::SaveArrayReference
            | ExtendedOpcode::RestoreArrayReference
            | ExtendedOpcode::SetStaticInitialized => {}
            ExtendedOpcode::SetArrayOwner => {
                self.pop(inst)?;
            }
            ExtendedOpcode::PushArrayFinal | ExtendedOpcode::PushArrayContainer => {
                let index = self.pop(inst)?;
                let mut container = self.pop(inst)?;
                match &mut container.kind {
                    ExprKind::Variable(v) => v.indices.push(index),
                    _ => return Err(unexpected(inst)),
                }
                self.stack.push(container);
            }
            ExtendedOpcode::PopArrayFinal => {
                let index = self.pop(inst)?;
                let container = self.pop(inst)?;
                let value = self.pop(inst)?;
                let ExprKind::Variable(mut target) = container.kind else {
                    return Err(unexpected(inst));
                };
                target.indices.push(index);
                self.assign(target, value, out);
            }
            ExtendedOpcode::PushReference => {
                let Operand::Reference { id, asset_type } = inst.operand else {
                    return Err(unexpected(inst));
                };
                let kind = match AssetType::from_code(asset_type) {
                    Some(AssetType::RoomInstance) if !game.uses_room_instance_references() => ExprKind::Int32(id),
                    Some(asset_type) => ExprKind::AssetRef { asset_type, id },
                    None => ExprKind::Int32(id),
                };
                self.stack.push(Expr::new(kind, DataType::Int32));
            }
            _ => return Err(unexpected(inst)),
        }
        Ok(())
    }

    /// Leftover values at the end of the fragment.
    pub fn leftover(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimpleGameContext;
    use gmvm::asm::assemble;

    fn run(source: &str) -> (FragmentContext, Vec<Stmt>) {
        run_with(source, &SimpleGameContext::default())
    }

    fn run_with(source: &str, game: &SimpleGameContext) -> (FragmentContext, Vec<Stmt>) {
        let code = assemble("test", source).unwrap();
        let mut ctx = FragmentContext::new("test", 0);
        let mut out = Vec::new();
        for inst in &code.instructions {
            ctx.execute(inst, game, &mut out).unwrap();
        }
        (ctx, out)
    }

    fn assign_kind(stmt: &Stmt) -> AssignKind {
        match stmt {
            Stmt::Assign { kind, .. } => *kind,
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn increment_statement_is_postfix() {
        let (ctx, out) = run("push.v self.a\npush.e 1\nadd.i.v\npop.v.v self.a\n");
        assert!(ctx.stack.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(assign_kind(&out[0]), AssignKind::Postfix { increment: true });
    }

    #[test]
    fn add_of_other_value_is_compound() {
        let (_, out) = run("push.v self.a\npushi.e 5\nadd.i.v\npop.v.v self.a\n");
        let Stmt::Assign { value, kind, .. } = &out[0] else {
            panic!("expected assignment");
        };
        assert_eq!(*kind, AssignKind::Compound(BinaryOp::Add));
        assert_eq!(value.int_value(), Some(5));

        // pushi.e 1 is an ordinary literal, not an increment.
        let (_, out) = run("push.v self.a\npushi.e 1\nsub.i.v\npop.v.v self.a\n");
        assert_eq!(assign_kind(&out[0]), AssignKind::Compound(BinaryOp::Sub));
    }

    #[test]
    fn prefix_and_postfix_values() {
        // b = ++a
        let (ctx, out) = run("push.v self.a\npush.e 1\nadd.i.v\ndup.v 0\npop.v.v self.a\npop.v.v self.b\n");
        assert!(ctx.stack.is_empty());
        let Stmt::Assign { target, value, .. } = &out[0] else {
            panic!("expected assignment");
        };
        assert_eq!(target.name, "b");
        assert!(matches!(
            value.kind,
            ExprKind::IncDec {
                position: IncDecPosition::Prefix,
                increment: true,
                ..
            }
        ));

        // b = a--
        let (_, out) = run("push.v self.a\ndup.v 0\npush.e 1\nsub.i.v\npop.v.v self.a\npop.v.v self.b\n");
        let Stmt::Assign { value, .. } = &out[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::IncDec {
                position: IncDecPosition::Postfix,
                increment: false,
                ..
            }
        ));
    }

    #[test]
    fn array_compound_needs_duplicated_index() {
        // a[i] += 2
        let (_, out) = run(
            "pushi.e -1
push.v self.i
conv.v.i
dup.i 1
push.v [array]self.a
pushi.e 2
add.i.v
pop.i.v [array]self.a
",
        );
        assert_eq!(out.len(), 1);
        assert_eq!(assign_kind(&out[0]), AssignKind::Compound(BinaryOp::Add));

        // a[i] = a[i] + 2
        let (_, out) = run(
            "pushi.e -1
push.v self.i
push.v [array]self.a
pushi.e 2
add.i.v
pushi.e -1
push.v self.i
pop.v.v [array]self.a
",
        );
        assert_eq!(assign_kind(&out[0]), AssignKind::Normal);
    }

    #[test]
    fn legacy_two_dimensional_index_is_split() {
        let game = SimpleGameContext {
            gmlv2: false,
            ..SimpleGameContext::default()
        };
        let (ctx, _) = run_with(
            "pushi.e -1
push.v self.i
pushi.e 32000
mul.i.v
push.v self.j
add.v.v
push.v [array]self.grid
",
            &game,
        );
        let Some(ExprKind::Variable(v)) = ctx.stack.last().map(|e| &e.kind) else {
            panic!("expected variable");
        };
        assert!(v.legacy_2d);
        assert_eq!(v.indices.len(), 2);
        assert_eq!(v.indices[0].as_variable().map(|i| i.name.as_str()), Some("i"));
    }

    #[test]
    fn room_instance_references_follow_the_game() {
        let pushed = |game: &SimpleGameContext| {
            let (ctx, _) = run_with("pushref.i 100004 14\n", game);
            ctx.stack.last().map(|e| e.kind.clone())
        };
        assert_eq!(pushed(&SimpleGameContext::default()), Some(ExprKind::Int32(100004)));
        let game = SimpleGameContext {
            room_instance_references: true,
            ..SimpleGameContext::default()
        };
        assert_eq!(
            pushed(&game),
            Some(ExprKind::AssetRef {
                asset_type: AssetType::RoomInstance,
                id: 100004
            })
        );
    }

    #[test]
    fn calls_take_arguments_in_source_order() {
        let (_, out) = run("pushi.e 2\npushi.e 1\ncall.i point_distance(argc=2)\npopz.v\n");
        let Stmt::Expr(Expr {
            kind: ExprKind::Call { function, args },
            ..
        }) = &out[0]
        else {
            panic!("expected call statement");
        };
        assert_eq!(function, "point_distance");
        assert_eq!(args[0].int_value(), Some(1));
        assert_eq!(args[1].int_value(), Some(2));
    }

    #[test]
    fn array_literal_and_throw() {
        let (ctx, _) = run("pushi.e 3\npushi.e 2\npushi.e 1\ncall.i @@NewGMLArray@@ 3\n");
        assert!(matches!(&ctx.stack[0].kind, ExprKind::ArrayInit(items) if items.len() == 3));

        let (_, out) = run("push.s \"oops\"\nconv.s.v\ncall.i @@throw@@ 1\npopz.v\n");
        assert!(matches!(&out[0], Stmt::Throw(Expr { kind: ExprKind::String(s), .. }) if s == "oops"));
    }

    #[test]
    fn return_temporary_is_forwarded() {
        let (ctx, out) = run("push.v self.x\npop.v.v local.$$$$temp$$$$\npush.v local.$$$$temp$$$$\nret.v\n");
        assert!(ctx.stack.is_empty());
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Stmt::Return(e) if e.as_variable().is_some_and(|v| v.name == "x")));
    }

    #[test]
    fn pop_swap_moves_top_below() {
        let (ctx, _) = run("pushi.e 1\npushi.e 2\npushi.e 3\npop.e.v 5\n");
        let values: Vec<_> = ctx.stack.iter().filter_map(Expr::int_value).collect();
        assert_eq!(values, vec![1, 3, 2]);
        let (ctx, _) = run("pushi.e 1\npushi.e 2\npushi.e 3\npop.e.v 6\n");
        let values: Vec<_> = ctx.stack.iter().filter_map(Expr::int_value).collect();
        assert_eq!(values, vec![3, 1, 2]);
    }

    #[test]
    fn underflow_is_an_error() {
        let code = assemble("test", "add.i.i\n").unwrap();
        let mut ctx = FragmentContext::new("test", 0);
        let err = ctx
            .execute(&code.instructions[0], &SimpleGameContext::default(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::StackUnderflow { address: 0, .. }));
    }
}
