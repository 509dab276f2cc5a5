//! GML source printer.
//!
//! Expressions print to strings with precedence-based parenthesization.
//! Statements print line by line at the current indent depth, using the
//! brace, indent and semicolon style from [`DecompileSettings`].

use std::fmt::Write;

use gmvm::{ComparisonKind, DataType, InstanceType};

use super::{
    AssignKind, BinaryOp, Expr, ExprKind, FunctionDecl, IncDecPosition, InstanceRef, MacroValue, Stmt, UnaryOp,
    Variable,
};
use crate::control_flow::fragment::function_name;
use crate::control_flow::ShortCircuitKind;
use crate::macros::EnumDeclarations;
use crate::settings::DecompileSettings;

/// Print a code entry: enum declarations first (when enabled), then the body.
pub fn print(body: &[Stmt], enums: &EnumDeclarations, settings: &DecompileSettings) -> String {
    let mut printer = Printer::new(settings);
    if settings.create_enum_declarations && !enums.is_empty() {
        printer.enums(enums);
    }
    printer.stmts(body);
    printer.finish()
}

pub struct Printer<'a> {
    settings: &'a DecompileSettings,
    out: String,
    depth: usize,
    /// Indent string per depth, built on first use.
    indents: Vec<String>,
    /// Inside a `static` initializer body.
    in_static: bool,
}

impl<'a> Printer<'a> {
    pub fn new(settings: &'a DecompileSettings) -> Self {
        Self {
            settings,
            out: String::new(),
            depth: 0,
            indents: Vec::new(),
            in_static: false,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn indent(&mut self) -> &str {
        while self.indents.len() <= self.depth {
            let next = self.settings.indent_string.repeat(self.indents.len());
            self.indents.push(next);
        }
        &self.indents[self.depth]
    }

    fn line(&mut self, text: &str) {
        self.indent();
        let _ = writeln!(self.out, "{}{text}", self.indents[self.depth]);
    }

    fn semicolon(&self) -> &'static str {
        if self.settings.use_semicolon {
            ";"
        } else {
            ""
        }
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    fn open(&mut self, header: &str) {
        if self.settings.open_block_braces_on_same_line {
            self.line(&format!("{header} {{"));
        } else {
            self.line(header);
            self.line("{");
        }
        self.depth += 1;
    }

    fn close(&mut self, trailer: &str) {
        self.depth -= 1;
        self.line(&format!("}}{trailer}"));
    }

    /// Close the current block and open the next clause of the same statement,
    /// like `else` or `catch`.
    fn reopen(&mut self, header: &str) {
        self.depth -= 1;
        if self.settings.open_block_braces_on_same_line {
            self.line(&format!("}} {header} {{"));
        } else {
            self.line("}");
            self.line(header);
            self.line("{");
        }
        self.depth += 1;
    }

    fn block(&mut self, header: &str, body: &[Stmt]) {
        self.open(header);
        self.stmts(body);
        self.close("");
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    pub fn enums(&mut self, enums: &EnumDeclarations) {
        for (name, values) in enums.iter() {
            self.open(&format!("enum {name}"));
            let count = values.len();
            for (i, (value, value_name)) in values.iter().enumerate() {
                let comma = if i + 1 < count { "," } else { "" };
                self.line(&format!("{value_name} = {value}{comma}"));
            }
            self.close("");
            self.out.push('\n');
        }
    }

    pub fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let end = self.semicolon();
        match stmt {
            Stmt::Assign { .. } | Stmt::Expr(_) => {
                let text = self.inline(stmt);
                self.line(&format!("{text}{end}"));
            }
            Stmt::FunctionDecl(decl) => {
                let name = decl.name.clone().unwrap_or_else(|| function_name(&decl.code_entry).to_string());
                self.block(&function_header(decl, Some(&name)), &decl.body);
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.open(&format!("if ({})", self.expr(condition)));
                self.stmts(then_body);
                let mut else_body = else_body.as_deref();
                while let Some(body) = else_body {
                    if let [Stmt::If {
                        condition,
                        then_body,
                        else_body: next,
                    }] = body
                    {
                        self.reopen(&format!("else if ({})", self.expr(condition)));
                        self.stmts(then_body);
                        else_body = next.as_deref();
                    } else {
                        self.reopen("else");
                        self.stmts(body);
                        else_body = None;
                    }
                }
                self.close("");
            }
            Stmt::While { condition, body, .. } => {
                let condition = condition.as_ref().map_or_else(|| "true".to_string(), |c| self.expr(c));
                self.block(&format!("while ({condition})"), body);
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                let init = init.as_deref().map(|s| self.inline(s)).unwrap_or_default();
                let header = format!("for ({init}; {}; {})", self.expr(condition), self.inline(step));
                self.block(&header, body);
            }
            Stmt::DoUntil { body, condition } => {
                self.open("do");
                self.stmts(body);
                self.close(&format!(" until ({}){end}", self.expr(condition)));
            }
            Stmt::Repeat { count, body } => self.block(&format!("repeat ({})", self.expr(count)), body),
            Stmt::With { target, body } => self.block(&format!("with ({})", self.expr(target)), body),
            Stmt::Switch { value, cases } => {
                self.open(&format!("switch ({})", self.expr(value)));
                for case in cases {
                    for label in &case.labels {
                        match label {
                            Some(label) => {
                                let text = format!("case {}:", self.expr(label));
                                self.line(&text);
                            }
                            None => self.line("default:"),
                        }
                    }
                    self.depth += 1;
                    self.stmts(&case.body);
                    self.depth -= 1;
                }
                self.close("");
            }
            Stmt::TryCatch {
                try_body,
                catch,
                finally,
            } => {
                self.open("try");
                self.stmts(try_body);
                if let Some((variable, body)) = catch {
                    match variable {
                        Some(name) => self.reopen(&format!("catch ({name})")),
                        None => self.reopen("catch"),
                    }
                    self.stmts(body);
                }
                if let Some(body) = finally {
                    self.reopen("finally");
                    self.stmts(body);
                }
                self.close("");
            }
            Stmt::Static(body) => {
                let outer = std::mem::replace(&mut self.in_static, true);
                self.stmts(body);
                self.in_static = outer;
            }
            Stmt::Break => self.line(&format!("break{end}")),
            Stmt::Continue => self.line(&format!("continue{end}")),
            Stmt::Exit => self.line(&format!("exit{end}")),
            Stmt::Return(value) => {
                let text = format!("return {}{end}", self.expr(value));
                self.line(&text);
            }
            Stmt::Throw(value) => {
                let text = format!("throw {}{end}", self.expr(value));
                self.line(&text);
            }
        }
    }

    /// A simple statement without indent or terminator, as used in `for`
    /// headers.
    fn inline(&self, stmt: &Stmt) -> String {
        match stmt {
            Stmt::Assign {
                target,
                value,
                kind,
                declare,
            } => {
                let target = self.variable(target);
                match kind {
                    AssignKind::Normal => {
                        let keyword = if self.in_static {
                            "static "
                        } else if *declare {
                            "var "
                        } else {
                            ""
                        };
                        format!("{keyword}{target} = {}", self.expr(value))
                    }
                    AssignKind::Compound(op) => {
                        format!("{target} {}= {}", binary_str(*op, false), self.expr(value))
                    }
                    AssignKind::Prefix { increment } => format!("{}{target}", step_str(*increment)),
                    AssignKind::Postfix { increment } => format!("{target}{}", step_str(*increment)),
                }
            }
            Stmt::Expr(e) => self.expr(e),
            _ => String::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub fn expr(&self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Int16 { value, .. } => value.to_string(),
            ExprKind::Int32(v) => v.to_string(),
            ExprKind::Int64(v) => v.to_string(),
            ExprKind::Double(v) => format_float(*v),
            ExprKind::String(s) => format!("\"{}\"", escape_string(s)),
            ExprKind::Bool(b) => b.to_string(),
            ExprKind::Variable(v) => self.variable(v),
            ExprKind::Binary { op, left, right } => {
                let prec = precedence(expr);
                let boolean = is_boolean(left) && is_boolean(right);
                format!(
                    "{} {} {}",
                    self.operand(left, prec),
                    binary_str(*op, boolean),
                    self.operand(right, prec + 1)
                )
            }
            ExprKind::Compare { kind, left, right } => {
                let prec = precedence(expr);
                format!(
                    "{} {} {}",
                    self.operand(left, prec),
                    compare_str(*kind),
                    self.operand(right, prec + 1)
                )
            }
            ExprKind::Unary { op, operand } => {
                let op = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitwiseNot => "~",
                };
                format!("{op}{}", self.operand(operand, PRIMARY))
            }
            ExprKind::Call { function, args } => format!("{}({})", function_name(function), self.list(args)),
            ExprKind::VariableCall { function, args, .. } => {
                format!("{}({})", self.operand(function, PRIMARY), self.list(args))
            }
            ExprKind::New { constructor, args } => {
                format!("new {}({})", self.operand(constructor, PRIMARY), self.list(args))
            }
            ExprKind::ArrayInit(items) => format!("[{}]", self.list(items)),
            ExprKind::StructInit(fields) if fields.is_empty() => "{}".to_string(),
            ExprKind::StructInit(fields) => {
                let fields: Vec<_> = fields
                    .iter()
                    .map(|(name, value)| format!("{name}: {}", self.expr(value)))
                    .collect();
                format!("{{ {} }}", fields.join(", "))
            }
            ExprKind::FunctionRef(name) => function_name(name).to_string(),
            ExprKind::Function(decl) => self.function_expr(decl),
            ExprKind::Ternary {
                condition,
                when_true,
                when_false,
            } => format!(
                "{} ? {} : {}",
                self.operand(condition, TERNARY + 1),
                self.operand(when_true, TERNARY),
                self.operand(when_false, TERNARY)
            ),
            ExprKind::ShortCircuit { kind, conditions } => {
                let prec = precedence(expr);
                let op = match kind {
                    ShortCircuitKind::And => " && ",
                    ShortCircuitKind::Or => " || ",
                };
                let parts: Vec<_> = conditions.iter().map(|c| self.operand(c, prec + 1)).collect();
                parts.join(op)
            }
            ExprKind::Nullish { left, right } => {
                format!("{} ?? {}", self.operand(left, NULLISH + 1), self.operand(right, NULLISH))
            }
            ExprKind::IncDec {
                target,
                position,
                increment,
            } => {
                let target = self.variable(target);
                match position {
                    IncDecPosition::Prefix => format!("{}{target}", step_str(*increment)),
                    IncDecPosition::Postfix => format!("{target}{}", step_str(*increment)),
                }
            }
            ExprKind::InstanceType(instance) => instance.keyword().to_string(),
            ExprKind::AssetRef { id, .. } => id.to_string(),
            ExprKind::Throw(value) => format!("throw {}", self.expr(value)),
            ExprKind::Macro(MacroValue::EnumValue {
                enum_name, value_name, ..
            }) => format!("{enum_name}.{value_name}"),
            ExprKind::Macro(MacroValue::Constant(name) | MacroValue::Asset(name)) => name.clone(),
        }
    }

    fn operand(&self, expr: &Expr, min: u8) -> String {
        if precedence(expr) < min {
            format!("({})", self.expr(expr))
        } else {
            self.expr(expr)
        }
    }

    fn list(&self, items: &[Expr]) -> String {
        items.iter().map(|e| self.expr(e)).collect::<Vec<_>>().join(", ")
    }

    fn variable(&self, variable: &Variable) -> String {
        let mut text = match &variable.instance {
            InstanceRef::Builtin(
                InstanceType::Own
                | InstanceType::Builtin
                | InstanceType::Local
                | InstanceType::Arg
                | InstanceType::Static
                | InstanceType::Stacktop,
            ) => variable.name.clone(),
            InstanceRef::Builtin(instance) => format!("{}.{}", instance.keyword(), variable.name),
            InstanceRef::Object { name: Some(name), .. } => format!("{name}.{}", variable.name),
            InstanceRef::Object { id, name: None } => format!("{id}.{}", variable.name),
            InstanceRef::Expr(instance) => format!("{}.{}", self.operand(instance, PRIMARY), variable.name),
        };
        if variable.legacy_2d {
            let _ = write!(text, "[{}]", self.list(&variable.indices));
        } else {
            for index in &variable.indices {
                let _ = write!(text, "[{}]", self.expr(index));
            }
        }
        text
    }

    /// `function(args) { ... }` printed inline, with its body one level
    /// deeper than the line it appears on.
    fn function_expr(&self, decl: &FunctionDecl) -> String {
        let mut inner = Printer {
            settings: self.settings,
            out: String::new(),
            depth: self.depth,
            indents: Vec::new(),
            in_static: false,
        };
        let outer_indent = inner.indent().to_string();
        inner.depth += 1;
        inner.stmts(&decl.body);

        let mut text = function_header(decl, None);
        if self.settings.open_block_braces_on_same_line {
            text.push_str(" {\n");
        } else {
            let _ = write!(text, "\n{outer_indent}{{\n");
        }
        text.push_str(&inner.out);
        text.push_str(&outer_indent);
        text.push('}');
        text
    }
}

fn function_header(decl: &FunctionDecl, name: Option<&str>) -> String {
    let mut header = String::from("function");
    if let Some(name) = name {
        header.push(' ');
        header.push_str(name);
    }
    let _ = write!(header, "({})", decl.arguments.join(", "));
    if decl.is_constructor {
        header.push_str(" constructor");
    }
    header
}

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

const TERNARY: u8 = 1;
const NULLISH: u8 = 2;
const PRIMARY: u8 = 15;

fn precedence(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Ternary { .. } | ExprKind::Throw(_) => TERNARY,
        ExprKind::Nullish { .. } => NULLISH,
        ExprKind::ShortCircuit {
            kind: ShortCircuitKind::Or,
            ..
        } => 3,
        ExprKind::ShortCircuit {
            kind: ShortCircuitKind::And,
            ..
        } => 5,
        ExprKind::Binary { op, left, right } => {
            let boolean = is_boolean(left) && is_boolean(right);
            match op {
                BinaryOp::Or if boolean => 3,
                BinaryOp::Xor if boolean => 4,
                BinaryOp::And if boolean => 5,
                BinaryOp::Or => 8,
                BinaryOp::Xor => 9,
                BinaryOp::And => 10,
                BinaryOp::Shl | BinaryOp::Shr => 11,
                BinaryOp::Add | BinaryOp::Sub => 12,
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem | BinaryOp::Mod => 13,
            }
        }
        ExprKind::Compare {
            kind: ComparisonKind::Equal | ComparisonKind::NotEqual,
            ..
        } => 6,
        ExprKind::Compare { .. } => 7,
        ExprKind::Unary { .. } => 14,
        ExprKind::IncDec {
            position: IncDecPosition::Prefix,
            ..
        } => 14,
        // Negative literals print with a sign.
        ExprKind::Int16 { value, .. } if *value < 0 => 14,
        ExprKind::Int32(v) if *v < 0 => 14,
        ExprKind::Int64(v) if *v < 0 => 14,
        ExprKind::Double(v) if *v < 0.0 => 14,
        _ => PRIMARY,
    }
}

fn is_boolean(expr: &Expr) -> bool {
    expr.stack_type == DataType::Bool
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn binary_str(op: BinaryOp, boolean: bool) -> &'static str {
    match op {
        BinaryOp::And if boolean => "&&",
        BinaryOp::Or if boolean => "||",
        BinaryOp::Xor if boolean => "^^",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "div",
        BinaryOp::Mod => "%",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
        BinaryOp::Xor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
    }
}

fn compare_str(kind: ComparisonKind) -> &'static str {
    match kind {
        ComparisonKind::Less => "<",
        ComparisonKind::LessEqual => "<=",
        ComparisonKind::Equal => "==",
        ComparisonKind::NotEqual => "!=",
        ComparisonKind::GreaterEqual => ">=",
        ComparisonKind::Greater => ">",
    }
}

fn step_str(increment: bool) -> &'static str {
    if increment {
        "++"
    } else {
        "--"
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
