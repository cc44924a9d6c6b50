//! Evaluate builtin calls whose arguments are all literals.
//!
//! Arithmetic follows the target semantics: integer results must fit their
//! declared width (overflow leaves the call alone), `mod` and `floordiv`
//! round towards negative infinity, and integer `divides` is never folded
//! since targets disagree on its rounding. Floating point results that are
//! not finite are not folded either.

use itir_common::ty::ScalarKind;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, Program};
use itir_ir::make::literal;
use itir_ir::pattern::called_builtin;

/// Fold constants in every expression of `program`.
pub fn constant_folding(program: Program) -> Program {
    program.map_exprs(fold_constants)
}

/// Fold literal calls and literal-condition `if_` in `expr`, bottom-up.
pub fn fold_constants(expr: Expr) -> Expr {
    expr.transform_up(&mut fold_node)
}

fn fold_node(expr: Expr) -> Expr {
    let Some(builtin) = called_builtin(&expr) else {
        return expr;
    };
    let Some((_, args)) = expr.as_fun_call() else {
        return expr;
    };

    let folded = match builtin {
        Builtin::If => return fold_if(expr),
        Builtin::Cast => fold_cast(args),
        b if b.is_arithmetic() => args
            .iter()
            .map(Const::from_expr)
            .collect::<Option<Vec<_>>>()
            .and_then(|consts| evaluate(b, &consts)),
        _ => None,
    };

    match folded.and_then(Const::into_expr) {
        Some(mut lit) => {
            lit.ty = expr.ty;
            lit.location = expr.location;
            lit
        }
        None => expr,
    }
}

fn fold_if(expr: Expr) -> Expr {
    let condition = match expr.as_fun_call() {
        Some((_, [cond, _, _])) => Const::from_expr(cond),
        _ => None,
    };
    let Some(Const::Bool(taken)) = condition else {
        return expr;
    };
    let Expr { kind, .. } = expr;
    let ExprKind::FunCall { args, .. } = kind else {
        unreachable!("checked by as_fun_call")
    };
    let mut branches = args.into_iter().skip(1);
    let (Some(then), Some(otherwise)) = (branches.next(), branches.next()) else {
        unreachable!("if_ has three arguments")
    };
    if taken {
        then
    } else {
        otherwise
    }
}

fn fold_cast(args: &[Expr]) -> Option<Const> {
    let [value, target] = args else {
        return None;
    };
    let target = target.as_sym_ref().and_then(ScalarKind::from_name)?;
    let value = Const::from_expr(value)?;
    let converted = match (value, target) {
        (Const::Bool(b), ScalarKind::Bool) => Const::Bool(b),
        (Const::Bool(b), kind) if kind.is_integral() => Const::Int(i64::from(b), kind),
        (Const::Bool(b), kind) => Const::Float(if b { 1.0 } else { 0.0 }, kind),
        (Const::Int(v, _), ScalarKind::Bool) => Const::Bool(v != 0),
        (Const::Int(v, _), kind) if kind.is_integral() => Const::Int(v, kind),
        (Const::Int(v, _), kind) => Const::Float(v as f64, kind),
        (Const::Float(v, _), ScalarKind::Bool) => Const::Bool(v != 0.0),
        (Const::Float(v, _), kind) if kind.is_integral() => {
            let t = v.trunc();
            if !t.is_finite() || t < i64::MIN as f64 || t > i64::MAX as f64 {
                return None;
            }
            Const::Int(t as i64, kind)
        }
        (Const::Float(v, _), kind) => Const::Float(v, kind),
    };
    Some(converted)
}

// ── Constant values ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Const {
    Bool(bool),
    Int(i64, ScalarKind),
    Float(f64, ScalarKind),
}

impl Const {
    fn from_expr(expr: &Expr) -> Option<Const> {
        let (value, kind) = expr.as_literal()?;
        match kind {
            ScalarKind::Bool => match value {
                "true" | "True" => Some(Const::Bool(true)),
                "false" | "False" => Some(Const::Bool(false)),
                _ => None,
            },
            ScalarKind::Int32 | ScalarKind::Int64 => value.parse().ok().map(|v| Const::Int(v, kind)),
            ScalarKind::Float32 | ScalarKind::Float64 => {
                value.parse().ok().map(|v| Const::Float(v, kind))
            }
        }
    }

    fn kind(self) -> ScalarKind {
        match self {
            Const::Bool(_) => ScalarKind::Bool,
            Const::Int(_, kind) | Const::Float(_, kind) => kind,
        }
    }

    /// The literal for this value, unless it does not fit its type.
    fn into_expr(self) -> Option<Expr> {
        match self {
            Const::Bool(b) => Some(literal(b.to_string(), ScalarKind::Bool)),
            Const::Int(v, ScalarKind::Int32) => {
                i32::try_from(v).ok()?;
                Some(literal(v.to_string(), ScalarKind::Int32))
            }
            Const::Int(v, kind) => Some(literal(v.to_string(), kind)),
            Const::Float(v, ScalarKind::Float32) => {
                let narrow = v as f32;
                narrow
                    .is_finite()
                    .then(|| literal(format!("{:?}", narrow), ScalarKind::Float32))
            }
            Const::Float(v, kind) => v.is_finite().then(|| literal(format!("{:?}", v), kind)),
        }
    }
}

fn evaluate(builtin: Builtin, args: &[Const]) -> Option<Const> {
    match args {
        [a] => evaluate_unary(builtin, *a),
        [a, b] if a.kind() == b.kind() => evaluate_binary(builtin, *a, *b),
        _ => None,
    }
}

fn evaluate_unary(builtin: Builtin, arg: Const) -> Option<Const> {
    match (builtin, arg) {
        (Builtin::Not, Const::Bool(b)) => Some(Const::Bool(!b)),
        (Builtin::Abs, Const::Int(v, kind)) => v.checked_abs().map(|v| Const::Int(v, kind)),
        (Builtin::Abs, Const::Float(v, kind)) => Some(Const::Float(v.abs(), kind)),
        (Builtin::Isfinite, Const::Float(v, _)) => Some(Const::Bool(v.is_finite())),
        (Builtin::Isinf, Const::Float(v, _)) => Some(Const::Bool(v.is_infinite())),
        (Builtin::Isnan, Const::Float(v, _)) => Some(Const::Bool(v.is_nan())),
        (b, Const::Float(v, kind)) if b.is_unary_math_fp() => {
            let result = match b {
                Builtin::Sin => v.sin(),
                Builtin::Cos => v.cos(),
                Builtin::Tan => v.tan(),
                Builtin::Arcsin => v.asin(),
                Builtin::Arccos => v.acos(),
                Builtin::Arctan => v.atan(),
                Builtin::Sinh => v.sinh(),
                Builtin::Cosh => v.cosh(),
                Builtin::Tanh => v.tanh(),
                Builtin::Arcsinh => v.asinh(),
                Builtin::Arccosh => v.acosh(),
                Builtin::Arctanh => v.atanh(),
                Builtin::Sqrt => v.sqrt(),
                Builtin::Exp => v.exp(),
                Builtin::Log => v.ln(),
                Builtin::Cbrt => v.cbrt(),
                Builtin::Floor => v.floor(),
                Builtin::Ceil => v.ceil(),
                Builtin::Trunc => v.trunc(),
                // gamma has no exact std counterpart
                _ => return None,
            };
            Some(Const::Float(result, kind))
        }
        _ => None,
    }
}

fn evaluate_binary(builtin: Builtin, a: Const, b: Const) -> Option<Const> {
    if builtin.is_comparison() {
        return compare(builtin, a, b).map(Const::Bool);
    }
    match (a, b) {
        (Const::Bool(x), Const::Bool(y)) => match builtin {
            Builtin::And => Some(Const::Bool(x && y)),
            Builtin::Or => Some(Const::Bool(x || y)),
            Builtin::Xor => Some(Const::Bool(x ^ y)),
            _ => None,
        },
        (Const::Int(x, kind), Const::Int(y, _)) => int_op(builtin, x, y).map(|v| Const::Int(v, kind)),
        (Const::Float(x, kind), Const::Float(y, _)) => {
            float_op(builtin, x, y).map(|v| Const::Float(v, kind))
        }
        _ => None,
    }
}

fn compare(builtin: Builtin, a: Const, b: Const) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (a, b) {
        (Const::Bool(x), Const::Bool(y)) => x.cmp(&y),
        (Const::Int(x, _), Const::Int(y, _)) => x.cmp(&y),
        (Const::Float(x, _), Const::Float(y, _)) => x.partial_cmp(&y)?,
        _ => return None,
    };
    Some(match builtin {
        Builtin::Eq => ordering == Ordering::Equal,
        Builtin::NotEq => ordering != Ordering::Equal,
        Builtin::Less => ordering == Ordering::Less,
        Builtin::LessEqual => ordering != Ordering::Greater,
        Builtin::Greater => ordering == Ordering::Greater,
        Builtin::GreaterEqual => ordering != Ordering::Less,
        _ => return None,
    })
}

fn int_op(builtin: Builtin, x: i64, y: i64) -> Option<i64> {
    match builtin {
        Builtin::Plus => x.checked_add(y),
        Builtin::Minus => x.checked_sub(y),
        Builtin::Multiplies => x.checked_mul(y),
        Builtin::Minimum => Some(x.min(y)),
        Builtin::Maximum => Some(x.max(y)),
        Builtin::Floordiv => {
            let q = x.checked_div(y)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q.checked_sub(1)
            } else {
                Some(q)
            }
        }
        Builtin::Mod => {
            let r = x.checked_rem(y)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                r.checked_add(y)
            } else {
                Some(r)
            }
        }
        Builtin::Power => {
            let exp = u32::try_from(y).ok()?;
            x.checked_pow(exp)
        }
        _ => None,
    }
}

fn float_op(builtin: Builtin, x: f64, y: f64) -> Option<f64> {
    let result = match builtin {
        Builtin::Plus => x + y,
        Builtin::Minus => x - y,
        Builtin::Multiplies => x * y,
        Builtin::Divides => x / y,
        Builtin::Minimum => x.min(y),
        Builtin::Maximum => x.max(y),
        Builtin::Fmod => x % y,
        Builtin::Floordiv => (x / y).floor(),
        Builtin::Mod => {
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        Builtin::Power => x.powf(y),
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_ir::make::*;

    #[test]
    fn folds_integer_addition() {
        assert_snapshot!(fold_constants(plus(int32(2), int32(3))), @"5");
    }

    #[test]
    fn folds_nested_calls() {
        let e = multiplies(plus(int32(1), int32(2)), minus(int32(10), int32(4)));
        assert_snapshot!(fold_constants(e), @"18");
    }

    #[test]
    fn folding_is_idempotent() {
        let e = plus(deref("x"), multiplies(float64(2.0), float64(0.5)));
        let once = fold_constants(e);
        assert_snapshot!(once, @"plus(deref(x), 1.0)");
        assert_eq!(fold_constants(once.clone()), once);
    }

    #[test]
    fn leaves_mixed_kinds_and_symbols() {
        let mixed = plus(int32(1), float64(1.0));
        assert_eq!(fold_constants(mixed.clone()), mixed);
        let symbolic = plus(int32(1), "n");
        assert_eq!(fold_constants(symbolic.clone()), symbolic);
    }

    #[test]
    fn int32_overflow_is_not_folded() {
        let e = plus(int32(i64::from(i32::MAX)), int32(1));
        assert_eq!(fold_constants(e.clone()), e);
        assert_snapshot!(fold_constants(plus(int64(i64::from(i32::MAX)), int64(1))), @"2147483648");
    }

    #[test]
    fn integer_division_rounds_down() {
        assert_snapshot!(fold_constants(call("floordiv", [int32(-7), int32(2)])), @"-4");
        assert_snapshot!(fold_constants(call("mod", [int32(-7), int32(2)])), @"1");
        let div = call("divides", [int32(7), int32(2)]);
        assert_eq!(fold_constants(div.clone()), div);
        let by_zero = call("mod", [int32(1), int32(0)]);
        assert_eq!(fold_constants(by_zero.clone()), by_zero);
    }

    #[test]
    fn comparisons_and_logic() {
        let e = call("and_", [call("less", [int32(1), int32(2)]), call("not_", [bool_(false)])]);
        assert_snapshot!(fold_constants(e), @"true");
        assert_snapshot!(fold_constants(call("greater_equal", [float64(0.5), float64(1.5)])), @"false");
    }

    #[test]
    fn non_finite_results_are_kept() {
        let e = call("divides", [float64(1.0), float64(0.0)]);
        assert_eq!(fold_constants(e.clone()), e);
    }

    #[test]
    fn folds_if_with_literal_condition() {
        let e = if_(bool_(true), deref("a"), deref("b"));
        assert_snapshot!(fold_constants(e), @"deref(a)");
        let e = if_(call("eq", [int32(1), int32(2)]), deref("a"), deref("b"));
        assert_snapshot!(fold_constants(e), @"deref(b)");
    }

    #[test]
    fn folds_casts() {
        assert_snapshot!(fold_constants(cast_(float64(2.7), ScalarKind::Int32)), @"2");
        assert_snapshot!(fold_constants(cast_(int32(3), ScalarKind::Float64)), @"3.0");
    }
}
