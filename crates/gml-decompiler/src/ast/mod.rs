//! Decompiled syntax tree.
//!
//! - `simulate`: per-instruction stack simulation
//! - `builder`: walks the folded control-flow graph into statements
//! - `cleaner`: macro resolution and source-level rewrites
//! - `printer`: renders statements as GML text

pub mod builder;
pub mod cleaner;
pub mod printer;
pub mod simulate;

use gmvm::{AssetType, ComparisonKind, DataType, InstanceType};

use crate::control_flow::ShortCircuitKind;

/// An expression plus the two simulation flags every stack value carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    /// Set on the copies a `dup` pushed.
    pub duplicated: bool,
    /// VM type the value occupies on the stack.
    pub stack_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// `regular_push` is set for `push.e` as opposed to `pushi.e`; the
    /// compiler uses `push.e 1` for `++`/`--`.
    Int16 { value: i16, regular_push: bool },
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Bool(bool),
    Variable(Variable),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        kind: ComparisonKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Call { function: String, args: Vec<Expr> },
    /// `callv`: a call through a function value.
    VariableCall {
        function: Box<Expr>,
        instance: Box<Expr>,
        args: Vec<Expr>,
    },
    New { constructor: Box<Expr>, args: Vec<Expr> },
    ArrayInit(Vec<Expr>),
    StructInit(Vec<(String, Expr)>),
    /// Reference to a script function or another code entry.
    FunctionRef(String),
    Function(Box<FunctionDecl>),
    Ternary {
        condition: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
    },
    ShortCircuit {
        kind: ShortCircuitKind,
        conditions: Vec<Expr>,
    },
    Nullish { left: Box<Expr>, right: Box<Expr> },
    IncDec {
        target: Variable,
        position: IncDecPosition,
        increment: bool,
    },
    InstanceType(InstanceType),
    /// `pushref` asset reference.
    AssetRef { asset_type: AssetType, id: i32 },
    Throw(Box<Expr>),
    /// A literal rewritten into a symbolic name.
    Macro(MacroValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Integer division, `div`.
    Rem,
    /// Remainder, `%`.
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn from_opcode(opcode: gmvm::Opcode) -> Option<Self> {
        use gmvm::Opcode;
        Some(match opcode {
            Opcode::Add => Self::Add,
            Opcode::Sub => Self::Sub,
            Opcode::Mul => Self::Mul,
            Opcode::Div => Self::Div,
            Opcode::Rem => Self::Rem,
            Opcode::Mod => Self::Mod,
            Opcode::And => Self::And,
            Opcode::Or => Self::Or,
            Opcode::Xor => Self::Xor,
            Opcode::Shl => Self::Shl,
            Opcode::Shr => Self::Shr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    /// `!` on booleans.
    Not,
    /// `~` on integers.
    BitwiseNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecPosition {
    Prefix,
    Postfix,
}

/// How an assignment statement is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    Normal,
    /// `x op= value`
    Compound(BinaryOp),
    /// `++x` / `--x`
    Prefix { increment: bool },
    /// `x++` / `x--`
    Postfix { increment: bool },
}

/// Where a variable lives.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceRef {
    Builtin(InstanceType),
    /// Object index; `name` is filled in by the cleaner when known.
    Object { id: i16, name: Option<String> },
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub instance: InstanceRef,
    pub indices: Vec<Expr>,
    /// Pre-GMLv2 `a[i, j]` indexing.
    pub legacy_2d: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, instance: InstanceType) -> Self {
        Self {
            name: name.into(),
            instance: InstanceRef::Builtin(instance),
            indices: Vec::new(),
            legacy_2d: false,
        }
    }

    pub fn is_local(&self) -> bool {
        self.instance == InstanceRef::Builtin(InstanceType::Local) && self.indices.is_empty()
    }

    /// Whether this variable is the same storage location as `other`.
    pub fn same_as(&self, other: &Variable) -> bool {
        self.name == other.name
            && self.legacy_2d == other.legacy_2d
            && self.indices.len() == other.indices.len()
            && self.indices.iter().zip(&other.indices).all(|(a, b)| a.same_as(b))
            && match (&self.instance, &other.instance) {
                (InstanceRef::Expr(a), InstanceRef::Expr(b)) => a.same_as(b),
                (InstanceRef::Object { id: a, .. }, InstanceRef::Object { id: b, .. }) => a == b,
                (a, b) => a == b,
            }
    }

    /// Whether any part of the access came from a `dup`.
    pub fn has_duplicated_parts(&self) -> bool {
        self.indices.iter().any(|i| i.duplicated)
            || matches!(&self.instance, InstanceRef::Expr(e) if e.duplicated)
    }
}

/// A function or constructor body, embedded in its parent's code.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub code_entry: String,
    /// Set once the function is bound to a name with `function name() {}`.
    pub name: Option<String>,
    pub arguments: Vec<String>,
    pub body: Vec<Stmt>,
    pub is_constructor: bool,
}

/// Symbolic replacement for a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroValue {
    EnumValue {
        enum_name: String,
        value_name: String,
        value: i64,
    },
    Constant(String),
    Asset(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` is the `default` label.
    pub labels: Vec<Option<Expr>>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: Variable,
        value: Expr,
        kind: AssignKind,
        /// First assignment of a local: printed with `var`.
        declare: bool,
    },
    Expr(Expr),
    /// `function name(args) { }`
    FunctionDecl(Box<FunctionDecl>),
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        condition: Option<Expr>,
        body: Vec<Stmt>,
        /// Some `continue` must run the last body statement first.
        continues_to_step: bool,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Expr,
        step: Box<Stmt>,
        body: Vec<Stmt>,
    },
    DoUntil { body: Vec<Stmt>, condition: Expr },
    Repeat { count: Expr, body: Vec<Stmt> },
    With { target: Expr, body: Vec<Stmt> },
    Switch { value: Expr, cases: Vec<SwitchCase> },
    TryCatch {
        try_body: Vec<Stmt>,
        catch: Option<(Option<String>, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    },
    /// Body of a `static` initializer; each assignment prints with `static`.
    Static(Vec<Stmt>),
    Break,
    Continue,
    Return(Expr),
    Exit,
    Throw(Expr),
}

impl Expr {
    pub fn new(kind: ExprKind, stack_type: DataType) -> Self {
        Self {
            kind,
            duplicated: false,
            stack_type,
        }
    }

    pub fn int16(value: i16) -> Self {
        Self::new(
            ExprKind::Int16 {
                value,
                regular_push: false,
            },
            DataType::Int16,
        )
    }

    pub fn variable(variable: Variable) -> Self {
        Self::new(ExprKind::Variable(variable), DataType::Variable)
    }

    /// Integer value of an integer literal.
    pub fn int_value(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Int16 { value, .. } => Some(value as i64),
            ExprKind::Int32(v) => Some(v as i64),
            ExprKind::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match &self.kind {
            ExprKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Structural equality ignoring the simulation flags.
    pub fn same_as(&self, other: &Expr) -> bool {
        use ExprKind as K;
        match (&self.kind, &other.kind) {
            (K::Int16 { value: a, .. }, K::Int16 { value: b, .. }) => a == b,
            (K::Variable(a), K::Variable(b)) => a.same_as(b),
            (
                K::Binary { op: o1, left: l1, right: r1 },
                K::Binary { op: o2, left: l2, right: r2 },
            ) => o1 == o2 && l1.same_as(l2) && r1.same_as(r2),
            (
                K::Compare { kind: k1, left: l1, right: r1 },
                K::Compare { kind: k2, left: l2, right: r2 },
            ) => k1 == k2 && l1.same_as(l2) && r1.same_as(r2),
            (K::Unary { op: o1, operand: a }, K::Unary { op: o2, operand: b }) => o1 == o2 && a.same_as(b),
            (K::Call { function: f1, args: a1 }, K::Call { function: f2, args: a2 }) => {
                f1 == f2 && a1.len() == a2.len() && a1.iter().zip(a2).all(|(a, b)| a.same_as(b))
            }
            (a, b) => a == b,
        }
    }

    /// Whether the expression is a `push.e 1`.
    pub fn is_regular_one(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int16 {
                value: 1,
                regular_push: true
            }
        )
    }

    /// Whether evaluating the expression as a statement has an effect.
    pub fn is_statement(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. }
                | ExprKind::VariableCall { .. }
                | ExprKind::New { .. }
                | ExprKind::IncDec { .. }
                | ExprKind::Function(_)
        )
    }

    /// Visit this expression and every expression below it, pre-order.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Variable(v) => walk_variable(v, f),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Nullish { left, right } => {
                left.walk(f);
                right.walk(f);
            }
            ExprKind::Unary { operand, .. } | ExprKind::Throw(operand) => operand.walk(f),
            ExprKind::Call { args, .. } | ExprKind::ArrayInit(args) => {
                args.iter().for_each(|a| a.walk(f));
            }
            ExprKind::VariableCall { function, instance, args } => {
                function.walk(f);
                instance.walk(f);
                args.iter().for_each(|a| a.walk(f));
            }
            ExprKind::New { constructor, args } => {
                constructor.walk(f);
                args.iter().for_each(|a| a.walk(f));
            }
            ExprKind::StructInit(fields) => fields.iter().for_each(|(_, v)| v.walk(f)),
            ExprKind::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                condition.walk(f);
                when_true.walk(f);
                when_false.walk(f);
            }
            ExprKind::ShortCircuit { conditions, .. } => conditions.iter().for_each(|c| c.walk(f)),
            ExprKind::IncDec { target, .. } => walk_variable(target, f),
            _ => {}
        }
    }

    /// Visit every expression below this one and then this one, post-order,
    /// allowing each to be replaced. Function bodies are not entered.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match &mut self.kind {
            ExprKind::Variable(v) | ExprKind::IncDec { target: v, .. } => walk_variable_mut(v, f),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Nullish { left, right } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            ExprKind::Unary { operand, .. } | ExprKind::Throw(operand) => operand.walk_mut(f),
            ExprKind::Call { args, .. } | ExprKind::ArrayInit(args) => {
                args.iter_mut().for_each(|a| a.walk_mut(f));
            }
            ExprKind::VariableCall { function, instance, args } => {
                function.walk_mut(f);
                instance.walk_mut(f);
                args.iter_mut().for_each(|a| a.walk_mut(f));
            }
            ExprKind::New { constructor, args } => {
                constructor.walk_mut(f);
                args.iter_mut().for_each(|a| a.walk_mut(f));
            }
            ExprKind::StructInit(fields) => fields.iter_mut().for_each(|(_, v)| v.walk_mut(f)),
            ExprKind::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                condition.walk_mut(f);
                when_true.walk_mut(f);
                when_false.walk_mut(f);
            }
            ExprKind::ShortCircuit { conditions, .. } => conditions.iter_mut().for_each(|c| c.walk_mut(f)),
            _ => {}
        }
        f(self);
    }

    /// Whether the expression reads `variable` anywhere.
    pub fn mentions(&self, variable: &Variable) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let ExprKind::Variable(v) = &e.kind {
                found |= v.same_as(variable);
            }
        });
        found
    }
}

fn walk_variable(variable: &Variable, f: &mut impl FnMut(&Expr)) {
    if let InstanceRef::Expr(e) = &variable.instance {
        e.walk(f);
    }
    for index in &variable.indices {
        index.walk(f);
    }
}

fn walk_variable_mut(variable: &mut Variable, f: &mut impl FnMut(&mut Expr)) {
    if let InstanceRef::Expr(e) = &mut variable.instance {
        e.walk_mut(f);
    }
    for index in &mut variable.indices {
        index.walk_mut(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_as_ignores_simulation_flags() {
        let a = Expr::variable(Variable::new("a", InstanceType::Own));
        let mut b = a.clone();
        b.duplicated = true;
        b.stack_type = DataType::Int32;
        assert!(a.same_as(&b));
        assert_ne!(a, b);

        let mut pushed = Expr::int16(1);
        pushed.kind = ExprKind::Int16 {
            value: 1,
            regular_push: true,
        };
        assert!(pushed.same_as(&Expr::int16(1)));
        assert!(pushed.is_regular_one());
        assert!(!Expr::int16(1).is_regular_one());
    }

    #[test]
    fn mentions_finds_nested_reads() {
        let i = Variable::new("i", InstanceType::Local);
        let cond = Expr::new(
            ExprKind::Compare {
                kind: ComparisonKind::Less,
                left: Box::new(Expr::variable(i.clone())),
                right: Box::new(Expr::int16(10)),
            },
            DataType::Bool,
        );
        assert!(cond.mentions(&i));
        assert!(!cond.mentions(&Variable::new("j", InstanceType::Local)));
    }
}
