//! Walks the structured control-flow graph and simulates each block into
//! statements.
//!
//! Composite nodes are handled by building their child chains in order: a
//! chain starts at a child slot and follows single successors until it runs
//! out, which is where folding cut the edges leaving the region.

use std::collections::HashSet;

use gmvm::DataType;

use super::simulate::FragmentContext;
use super::{Expr, ExprKind, FunctionDecl, Stmt, SwitchCase};
use crate::context::GameContext;
use crate::control_flow::{slot, CaseLabel, Graph, LoopInfo, LoopKind, NodeId, NodeKind};
use crate::error::{BuildError, DecompileWarning};
use crate::settings::DecompileSettings;

/// Call a constructor body starts with.
const COPY_STATIC: &str = "@@CopyStatic@@";

pub struct AstBuilder<'a> {
    graph: &'a Graph,
    game: &'a dyn GameContext,
    settings: &'a DecompileSettings,
    warnings: Vec<DecompileWarning>,
}

impl<'a> AstBuilder<'a> {
    pub fn new(graph: &'a Graph, game: &'a dyn GameContext, settings: &'a DecompileSettings) -> Self {
        Self {
            graph,
            game,
            settings,
            warnings: Vec::new(),
        }
    }

    /// Build the root fragment's statements, along with any warnings recorded
    /// on the way.
    pub fn build(mut self) -> Result<(Vec<Stmt>, Vec<DecompileWarning>), BuildError> {
        let root = self
            .graph
            .root()
            .ok_or_else(|| BuildError::Malformed("control-flow graph has no root fragment".into()))?;
        let NodeKind::Fragment {
            code_entry,
            argument_count,
            ..
        } = &self.graph[root].kind
        else {
            return Err(BuildError::Malformed("root node is not a fragment".into()));
        };
        let mut ctx = FragmentContext::new(code_entry.clone(), *argument_count);
        let mut body = Vec::new();
        self.build_chain(self.child(root, slot::HEAD), &mut ctx, &mut body)?;
        self.finish_fragment(&ctx)?;
        Ok((body, self.warnings))
    }

    fn child(&self, node: NodeId, slot: usize) -> Option<NodeId> {
        self.graph[node].children.get(slot).copied().flatten()
    }

    fn pop(&self, ctx: &mut FragmentContext, node: NodeId, what: &str) -> Result<Expr, BuildError> {
        ctx.stack.pop().ok_or_else(|| BuildError::StackUnderflow {
            address: self.graph[node].start,
            instruction: what.to_string(),
        })
    }

    /// The node a chain continues to after `node`.
    fn next(&self, node: NodeId) -> Result<Option<NodeId>, BuildError> {
        let successors = &self.graph[node].successors;
        match successors.as_slice() {
            [] => Ok(None),
            [next] => Ok(Some(*next)),
            _ => {
                let mut reachable = successors.iter().copied().filter(|&s| !self.graph[s].unreachable);
                match (reachable.next(), reachable.next()) {
                    (Some(next), None) => Ok(Some(next)),
                    _ => Err(BuildError::Branching {
                        address: self.graph[node].start,
                        count: successors.len(),
                    }),
                }
            }
        }
    }

    fn build_chain(
        &mut self,
        start: Option<NodeId>,
        ctx: &mut FragmentContext,
        out: &mut Vec<Stmt>,
    ) -> Result<(), BuildError> {
        let mut seen = HashSet::new();
        let mut current = start;
        while let Some(node) = current {
            // A case marker ends the previous case's body.
            if !seen.insert(node) || matches!(self.graph[node].kind, NodeKind::SwitchCase { .. }) {
                break;
            }
            self.build_node(node, ctx, out)?;
            current = self.next(node)?;
        }
        Ok(())
    }

    fn build_body(&mut self, start: Option<NodeId>, ctx: &mut FragmentContext) -> Result<Vec<Stmt>, BuildError> {
        let mut body = Vec::new();
        self.build_chain(start, ctx, &mut body)?;
        Ok(body)
    }

    fn build_node(&mut self, node: NodeId, ctx: &mut FragmentContext, out: &mut Vec<Stmt>) -> Result<(), BuildError> {
        let graph = self.graph;
        match &graph[node].kind {
            NodeKind::Block { instructions } => {
                for inst in instructions {
                    ctx.execute(inst, self.game, out)?;
                }
            }
            NodeKind::Fragment {
                code_entry,
                argument_count,
                ..
            } => {
                let decl = self.build_function(node, code_entry, *argument_count)?;
                ctx.functions.insert(code_entry.clone(), decl);
            }
            NodeKind::Loop(info) => {
                let stmt = self.build_loop(node, info, ctx, out)?;
                out.push(stmt);
            }
            NodeKind::BinaryBranch => self.build_branch(node, ctx, out)?,
            NodeKind::ShortCircuit(kind) => {
                let mut conditions = Vec::new();
                for child in graph[node].children.iter().copied().flatten() {
                    self.build_chain(Some(child), ctx, out)?;
                    conditions.push(self.pop(ctx, node, "short-circuit operand")?);
                }
                ctx.stack.push(Expr::new(
                    ExprKind::ShortCircuit {
                        kind: *kind,
                        conditions,
                    },
                    DataType::Bool,
                ));
            }
            NodeKind::StaticInit => {
                let body = self.build_body(self.child(node, slot::HEAD), ctx)?;
                if !body.is_empty() {
                    out.push(Stmt::Static(body));
                }
            }
            NodeKind::Nullish => {
                let left = self.pop(ctx, node, "nullish left operand")?;
                self.build_chain(self.child(node, slot::HEAD), ctx, out)?;
                let right = self.pop(ctx, node, "nullish right operand")?;
                ctx.stack.push(Expr::new(
                    ExprKind::Nullish {
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    DataType::Variable,
                ));
            }
            NodeKind::TryCatch { catch_variable } => {
                let try_body = self.build_body(self.child(node, slot::TRY), ctx)?;
                let catch = match self.child(node, slot::CATCH) {
                    Some(head) => Some((catch_variable.clone(), self.build_body(Some(head), ctx)?)),
                    None => None,
                };
                let finally = match self.child(node, slot::FINALLY) {
                    Some(head) => Some(self.build_body(Some(head), ctx)?),
                    None => None,
                };
                out.push(Stmt::TryCatch {
                    try_body,
                    catch,
                    finally,
                });
            }
            NodeKind::Switch { case_values } => {
                let value = self.pop(ctx, node, "switch value")?;
                let values = self.case_values(node, case_values, ctx)?;
                let mut cases = Vec::new();
                for marker in graph[node].children.iter().copied().flatten() {
                    let NodeKind::SwitchCase { labels } = &graph[marker].kind else {
                        return Err(BuildError::Malformed(format!(
                            "switch at {:#x} has a child that is not a case",
                            graph[node].start
                        )));
                    };
                    let labels = labels
                        .iter()
                        .map(|label| match label {
                            CaseLabel::Value(index) => values.get(*index).cloned().map(Some).ok_or_else(|| {
                                BuildError::Malformed(format!("case value {index} out of range"))
                            }),
                            CaseLabel::Default => Ok(None),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    let body = self.build_body(graph[marker].successors.first().copied(), ctx)?;
                    cases.push(SwitchCase { labels, body });
                }
                out.push(Stmt::Switch { value, cases });
            }
            NodeKind::Break => out.push(Stmt::Break),
            NodeKind::Continue => out.push(Stmt::Continue),
            NodeKind::SwitchCase { .. } | NodeKind::Empty => {}
        }
        Ok(())
    }

    /// Simulate each case value on a scratch stack.
    fn case_values(
        &mut self,
        node: NodeId,
        case_values: &[Vec<gmvm::Instruction>],
        ctx: &mut FragmentContext,
    ) -> Result<Vec<Expr>, BuildError> {
        let saved = std::mem::take(&mut ctx.stack);
        let mut values = Vec::with_capacity(case_values.len());
        let mut discarded = Vec::new();
        for instructions in case_values {
            for inst in instructions {
                ctx.execute(inst, self.game, &mut discarded)?;
            }
            values.push(self.pop(ctx, node, "case value")?);
            ctx.stack.clear();
        }
        ctx.stack = saved;
        Ok(values)
    }

    fn build_loop(
        &mut self,
        node: NodeId,
        info: &LoopInfo,
        ctx: &mut FragmentContext,
        out: &mut Vec<Stmt>,
    ) -> Result<Stmt, BuildError> {
        let head = self.child(node, slot::LOOP_HEAD);
        Ok(match info.kind {
            LoopKind::While if info.has_condition => {
                self.build_chain(head, ctx, out)?;
                let condition = self.pop(ctx, node, "while condition")?;
                let body = self.build_body(self.child(node, slot::LOOP_BODY), ctx)?;
                Stmt::While {
                    condition: Some(condition),
                    body,
                    continues_to_step: info.continues_to_step,
                }
            }
            LoopKind::While => Stmt::While {
                condition: None,
                body: self.build_body(head, ctx)?,
                continues_to_step: info.continues_to_step,
            },
            LoopKind::DoUntil => {
                let body = self.build_body(head, ctx)?;
                let condition = self.pop(ctx, node, "until condition")?;
                Stmt::DoUntil { body, condition }
            }
            LoopKind::Repeat => {
                let count = self.pop(ctx, node, "repeat count")?;
                Stmt::Repeat {
                    count,
                    body: self.build_body(head, ctx)?,
                }
            }
            LoopKind::With => {
                let target = self.pop(ctx, node, "with target")?;
                Stmt::With {
                    target,
                    body: self.build_body(head, ctx)?,
                }
            }
        })
    }

    /// An if statement, or a ternary when each branch only leaves one value.
    fn build_branch(&mut self, node: NodeId, ctx: &mut FragmentContext, out: &mut Vec<Stmt>) -> Result<(), BuildError> {
        self.build_chain(self.child(node, slot::CONDITION), ctx, out)?;
        let condition = self.pop(ctx, node, "if condition")?;
        let depth = ctx.stack.len();
        let then_body = self.build_body(self.child(node, slot::TRUE), ctx)?;
        let else_head = self.child(node, slot::ELSE);

        if then_body.is_empty() && ctx.stack.len() == depth + 1 {
            if let Some(else_head) = else_head {
                let when_true = self.pop(ctx, node, "ternary value")?;
                let else_body = self.build_body(Some(else_head), ctx)?;
                if !else_body.is_empty() || ctx.stack.len() != depth + 1 {
                    return Err(BuildError::Malformed(format!(
                        "conditional at {:#x}: branches leave different values",
                        self.graph[node].start
                    )));
                }
                let when_false = self.pop(ctx, node, "ternary value")?;
                ctx.stack.push(Expr::new(
                    ExprKind::Ternary {
                        condition: Box::new(condition),
                        when_true: Box::new(when_true),
                        when_false: Box::new(when_false),
                    },
                    DataType::Variable,
                ));
                return Ok(());
            }
        }

        let else_body = match else_head {
            Some(head) => Some(self.build_body(Some(head), ctx)?).filter(|b| !b.is_empty()),
            None => None,
        };
        out.push(Stmt::If {
            condition,
            then_body,
            else_body,
        });
        Ok(())
    }

    fn build_function(&mut self, node: NodeId, code_entry: &str, argument_count: u16) -> Result<FunctionDecl, BuildError> {
        let mut ctx = FragmentContext::new(code_entry, argument_count);
        let mut body = self.build_body(self.child(node, slot::HEAD), &mut ctx)?;
        self.finish_fragment(&ctx)?;

        let is_constructor = matches!(
            body.first(),
            Some(Stmt::Expr(Expr { kind: ExprKind::Call { function, .. }, .. })) if function == COPY_STATIC
        );
        if is_constructor {
            body.remove(0);
        }
        Ok(FunctionDecl {
            code_entry: code_entry.to_string(),
            name: None,
            arguments: (0..argument_count).map(|i| format!("argument{i}")).collect(),
            body,
            is_constructor,
        })
    }

    /// Check the stack is empty at the end of a fragment.
    fn finish_fragment(&mut self, ctx: &FragmentContext) -> Result<(), BuildError> {
        let count = ctx.leftover();
        if count == 0 {
            return Ok(());
        }
        if !self.settings.allow_leftover_data_on_stack {
            return Err(BuildError::LeftoverStack {
                count,
                code_entry: ctx.code_entry.clone(),
            });
        }
        let warning = DecompileWarning::DataLeftOnStack {
            count,
            code_entry: ctx.code_entry.clone(),
        };
        log::warn!("{warning}");
        self.warnings.push(warning);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignKind, InstanceRef};
    use crate::context::SimpleGameContext;
    use crate::control_flow::{analyze, ShortCircuitKind};
    use gmvm::asm::assemble;

    fn build_with(source: &str, settings: &DecompileSettings) -> Result<(Vec<Stmt>, Vec<DecompileWarning>), BuildError> {
        let code = assemble("gml_Object_obj_test_Create_0", source).unwrap();
        let game = SimpleGameContext::default();
        let graph = analyze(&code, &game).unwrap();
        AstBuilder::new(&graph, &game, settings).build()
    }

    fn build(source: &str) -> Vec<Stmt> {
        build_with(source, &DecompileSettings::default()).unwrap().0
    }

    #[test]
    fn if_else_with_ternary_inside() {
        // if (a) { x = b ? 1 : 2; } else { y = 3; }
        let body = build(
            "push.v self.a
conv.v.b
bf [else]
push.v self.b
conv.v.b
bf [two]
pushi.e 1
b [store]
:[two]
pushi.e 2
:[store]
pop.v.i self.x
b [end]
:[else]
pushi.e 3
pop.v.i self.y
:[end]
exit.i
",
        );
        assert_eq!(body.len(), 2);
        let Stmt::If {
            then_body, else_body, ..
        } = &body[0]
        else {
            panic!("expected if, got {:?}", body[0]);
        };
        let Stmt::Assign { target, value, .. } = &then_body[0] else {
            panic!("expected assignment");
        };
        assert_eq!(target.name, "x");
        assert!(matches!(value.kind, ExprKind::Ternary { .. }));
        assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
        assert_eq!(body[1], Stmt::Exit);
    }

    #[test]
    fn while_loop_with_break() {
        let body = build(
            "
:[head]
push.v self.i
pushi.e 10
cmp.i.v LT
bf [after]
push.v self.i
pushi.e 5
cmp.i.v EQ
bf [inc]
b [after]
:[inc]
push.v self.i
push.e 1
add.i.v
pop.v.v self.i
b [head]
:[after]
exit.i
",
        );
        let Stmt::While {
            condition: Some(condition),
            body: loop_body,
            ..
        } = &body[0]
        else {
            panic!("expected while, got {:?}", body[0]);
        };
        assert!(matches!(condition.kind, ExprKind::Compare { .. }));
        assert_eq!(loop_body.len(), 2);
        assert!(matches!(&loop_body[0], Stmt::If { then_body, .. } if then_body == &vec![Stmt::Break]));
        assert!(matches!(
            &loop_body[1],
            Stmt::Assign {
                kind: AssignKind::Postfix { increment: true },
                ..
            }
        ));
    }

    #[test]
    fn repeat_and_with_take_their_operand_from_the_stack() {
        let body = build(
            "pushi.e 3
dup.i 0
push.e 0
cmp.i.e LTE
bt [after]
:[head]
call.i foo 0
popz.v
push.e 1
sub.i.i
dup.i 0
conv.i.b
bt [head]
:[after]
popz.i
pushi.e -2
pushenv [tail]
:[body]
call.i bar 0
popz.v
:[tail]
popenv [body]
exit.i
",
        );
        assert!(matches!(&body[0], Stmt::Repeat { count, body } if count.int_value() == Some(3) && body.len() == 1));
        assert!(matches!(&body[1], Stmt::With { target, body } if target.int_value() == Some(-2) && body.len() == 1));
    }

    #[test]
    fn switch_cases_keep_fallthrough_and_default() {
        let body = build(
            "push.v self.x
dup.v 0
pushi.e 1
cmp.i.v EQ
bt [case1]
dup.v 0
pushi.e 2
cmp.i.v EQ
bt [case2]
b [default]
:[case1]
call.i a 0
popz.v
b [end]
:[case2]
call.i b 0
popz.v
:[default]
call.i c 0
popz.v
:[end]
popz.v
exit.i
",
        );
        let Stmt::Switch { value, cases } = &body[0] else {
            panic!("expected switch, got {:?}", body[0]);
        };
        assert!(value.as_variable().is_some_and(|v| v.name == "x"));
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].labels[0].as_ref().and_then(Expr::int_value), Some(1));
        assert_eq!(cases[0].body.last(), Some(&Stmt::Break));
        assert_eq!(cases[1].body.len(), 1, "case 2 falls through");
        assert_eq!(cases[2].labels, vec![None]);
    }

    #[test]
    fn short_circuit_and_nullish_expressions() {
        let body = build(
            "push.v self.a
conv.v.b
bf [false]
push.v self.b
conv.v.b
bf [false]
push.v self.c
conv.v.b
b [done]
:[false]
push.e 0
:[done]
pop.v.b self.x
push.v self.a
isnullish.e
bf [end]
popz.v
push.v self.b
:[end]
pop.v.v self.c
exit.i
",
        );
        let Stmt::Assign { value, .. } = &body[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(
            &value.kind,
            ExprKind::ShortCircuit { kind: ShortCircuitKind::And, conditions } if conditions.len() == 3
        ));
        let Stmt::Assign { value, .. } = &body[1] else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Nullish { .. }));
    }

    #[test]
    fn try_catch_names_the_exception() {
        let body = build(
            "push.i 96
conv.i.v
push.i 64
conv.i.v
call.i @@try_hook@@ 2
popz.v
call.i risky 0
popz.v
call.i @@try_unhook@@ 0
popz.v
b [fin]
:[catch]
pop.v.v local.err
call.i @@try_unhook@@ 0
popz.v
call.i recover 0
popz.v
:[fin]
exit.i
",
        );
        let Stmt::TryCatch {
            try_body,
            catch: Some((name, catch_body)),
            finally: None,
        } = &body[0]
        else {
            panic!("expected try, got {:?}", body[0]);
        };
        assert_eq!(try_body.len(), 1);
        assert_eq!(name.as_deref(), Some("err"));
        assert_eq!(catch_body.len(), 1);
    }

    #[test]
    fn named_function_declaration() {
        let body = build(
            "b [skip]
> gml_Script_foo (locals=0, args=1)
push.v arg.argument0
ret.v
exit.i
:[skip]
push.i [function]gml_Script_foo
conv.i.v
pushi.e -1
conv.i.v
call.i method 2
dup.v 0
pushi.e -1
pop.v.v [stacktop]self.foo
popz.v
exit.i
",
        );
        let Stmt::FunctionDecl(decl) = &body[0] else {
            panic!("expected function declaration, got {:?}", body[0]);
        };
        assert_eq!(decl.name.as_deref(), Some("foo"));
        assert_eq!(decl.arguments, vec!["argument0".to_string()]);
        assert!(matches!(&decl.body[0], Stmt::Return(_)));
    }

    #[test]
    fn struct_literal_substitutes_arguments() {
        // s = { hp: 10, name: n }
        let body = build(
            "b [skip]
> gml_Script____struct___1_gml_Object_obj_test_Create_0 (locals=0, args=1)
pushi.e 10
pop.v.i self.hp
push.v arg.argument0
pop.v.v self.name
exit.i
:[skip]
push.v self.n
push.i [function]gml_Script____struct___1_gml_Object_obj_test_Create_0
conv.i.v
call.i @@NullObject@@ 0
call.i method 2
call.i @@NewGMLObject@@ 2
pop.v.v self.s
exit.i
",
        );
        let Stmt::Assign { target, value, .. } = &body[0] else {
            panic!("expected assignment, got {:?}", body[0]);
        };
        assert_eq!(target.name, "s");
        let ExprKind::StructInit(fields) = &value.kind else {
            panic!("expected struct literal, got {:?}", value.kind);
        };
        assert_eq!(fields[0].0, "hp");
        assert_eq!(fields[1].0, "name");
        assert!(fields[1].1.as_variable().is_some_and(|v| v.name == "n"
            && v.instance == InstanceRef::Builtin(gmvm::InstanceType::Own)));
    }

    #[test]
    fn leftover_stack_is_an_error_or_a_warning() {
        let source = "pushi.e 1\nexit.i\n";
        let err = build_with(source, &DecompileSettings::default()).unwrap_err();
        assert!(matches!(err, BuildError::LeftoverStack { count: 1, .. }));

        let lenient = DecompileSettings {
            allow_leftover_data_on_stack: true,
            ..DecompileSettings::default()
        };
        let (body, warnings) = build_with(source, &lenient).unwrap();
        assert_eq!(body, vec![Stmt::Exit]);
        assert_eq!(
            warnings,
            vec![DecompileWarning::DataLeftOnStack {
                count: 1,
                code_entry: "gml_Object_obj_test_Create_0".into(),
            }]
        );
    }
}
