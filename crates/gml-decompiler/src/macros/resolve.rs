use gmvm::{AssetType, InstanceType};

use super::MacroType;
use crate::ast::{Expr, ExprKind, MacroValue};
use crate::context::GameContext;

const COLORS: &[(i64, &str)] = &[
    (0, "c_black"),
    (128, "c_maroon"),
    (255, "c_red"),
    (32768, "c_green"),
    (32896, "c_olive"),
    (65280, "c_lime"),
    (65535, "c_yellow"),
    (4210752, "c_dkgray"),
    (4235519, "c_orange"),
    (8388608, "c_navy"),
    (8388736, "c_purple"),
    (8421376, "c_teal"),
    (8421504, "c_gray"),
    (12632256, "c_ltgray"),
    (16711680, "c_blue"),
    (16711935, "c_fuchsia"),
    (16776960, "c_aqua"),
    (16777215, "c_white"),
];

/// The `(kind, value)` pair `Match` conditions test against.
fn condition_of(expr: &Expr) -> Option<(&'static str, String)> {
    match &expr.kind {
        ExprKind::Variable(v) => Some(("Variable", v.name.clone())),
        ExprKind::Call { function, .. } => Some(("Function", function.clone())),
        ExprKind::String(s) => Some(("String", s.clone())),
        _ => expr.int_value().map(|v| ("Integer", v.to_string())),
    }
}

fn matches_condition(expr: &Expr, condition_type: &Option<String>, condition_value: &Option<String>) -> bool {
    let Some((kind, value)) = condition_of(expr) else {
        return false;
    };
    condition_type.as_deref().map_or(true, |t| t == kind)
        && condition_value.as_deref().map_or(true, |v| v == value)
}

fn with_macro(expr: &Expr, value: MacroValue) -> Expr {
    Expr::new(ExprKind::Macro(value), expr.stack_type)
}

impl MacroType {
    /// Rewrite `expr` through this type, or `None` if it does not apply.
    ///
    /// Only integer literals (and calls or array literals holding them) are
    /// rewritten, so resolving an already resolved expression returns `None`.
    pub fn resolve(&self, expr: &Expr, game: &dyn GameContext) -> Option<Expr> {
        match self {
            Self::Union(members) => members.iter().find_map(|m| m.resolve(expr, game)),
            Self::Intersect(members) => {
                let mut result = None;
                for member in members {
                    if member.is_predicate() {
                        member.resolve(expr, game)?;
                    } else {
                        result = Some(member.resolve(expr, game)?);
                    }
                }
                result
            }
            // Predicates pass the expression through unchanged.
            Self::Match {
                condition_type,
                condition_value,
            } => matches_condition(expr, condition_type, condition_value).then(|| expr.clone()),
            Self::MatchNot {
                condition_type,
                condition_value,
            } => (!matches_condition(expr, condition_type, condition_value)).then(|| expr.clone()),
            Self::ArrayInit(element) => {
                let ExprKind::ArrayInit(items) = &expr.kind else {
                    return None;
                };
                let mut changed = false;
                let items = items
                    .iter()
                    .map(|item| match element.resolve(item, game) {
                        Some(resolved) => {
                            changed = true;
                            resolved
                        }
                        None => item.clone(),
                    })
                    .collect();
                changed.then(|| Expr::new(ExprKind::ArrayInit(items), expr.stack_type))
            }
            Self::FunctionArgs(types) => {
                let ExprKind::Call { function, args } = &expr.kind else {
                    return None;
                };
                let mut changed = false;
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| {
                        let resolved = types.get(i).and_then(Option::as_ref).and_then(|t| t.resolve(arg, game));
                        match resolved {
                            Some(resolved) => {
                                changed = true;
                                resolved
                            }
                            None => arg.clone(),
                        }
                    })
                    .collect();
                changed.then(|| {
                    Expr::new(
                        ExprKind::Call {
                            function: function.clone(),
                            args,
                        },
                        expr.stack_type,
                    )
                })
            }
            _ => self.resolve_literal(expr, game),
        }
    }

    fn resolve_literal(&self, expr: &Expr, game: &dyn GameContext) -> Option<Expr> {
        let value = expr.int_value()?;
        let resolved = match self {
            Self::Enum { name, values } => MacroValue::EnumValue {
                enum_name: name.clone(),
                value_name: values.get(&value)?.clone(),
                value,
            },
            Self::Constants(values) => MacroValue::Constant(values.get(&value)?.clone()),
            // With asset references, assets arrive as `pushref` and a bare integer is only a number.
            Self::Asset(asset_type) if !game.uses_asset_references() => {
                MacroValue::Asset(game.asset_name(*asset_type, value)?.to_string())
            }
            Self::Boolean => match value {
                0 => MacroValue::Constant("false".into()),
                1 => MacroValue::Constant("true".into()),
                _ => return None,
            },
            Self::InstanceType => {
                if value >= 0 {
                    if game.uses_asset_references() {
                        return None;
                    }
                    MacroValue::Asset(game.asset_name(AssetType::Object, value)?.to_string())
                } else {
                    let instance = InstanceType::from_i16(i16::try_from(value).ok()?)?;
                    match instance {
                        InstanceType::Own
                        | InstanceType::Other
                        | InstanceType::All
                        | InstanceType::Noone
                        | InstanceType::Global => MacroValue::Constant(instance.keyword().into()),
                        _ => return None,
                    }
                }
            }
            Self::Color => {
                let (_, name) = COLORS.iter().find(|(v, _)| *v == value)?;
                MacroValue::Constant((*name).into())
            }
            _ => return None,
        };
        Some(with_macro(expr, resolved))
    }
}
