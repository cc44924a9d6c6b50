//! Resolve `list_get` with a literal index on lists of known origin.

use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, OffsetValue, Program};
use itir_ir::make::{deref, offset_int, shift};
use itir_ir::pattern::is_call_to;

/// Apply [`collapse_list_get_expr`] to every expression of `program`.
pub fn collapse_list_get(program: Program) -> Program {
    program.map_exprs(collapse_list_get_expr)
}

/// - `list_get(i, neighbors(o, it))` → `deref(shift(o, i)(it))`
/// - `list_get(i, make_const_list(x))` → `x`
pub fn collapse_list_get_expr(expr: Expr) -> Expr {
    expr.transform_up(&mut |e| {
        if !is_call_to(&e, Builtin::ListGet) {
            return e;
        }
        let Some((_, [index, list])) = e.as_fun_call() else {
            return e;
        };
        let Some(index) = constant_index(index) else {
            return e;
        };
        if is_call_to(list, Builtin::Neighbors) {
            if let Some((_, [offset, it])) = list.as_fun_call() {
                return deref(shift([offset.clone(), offset_int(index)], it.clone()));
            }
        }
        if is_call_to(list, Builtin::MakeConstList) {
            if let Some((_, [value])) = list.as_fun_call() {
                return value.clone();
            }
        }
        e
    })
}

/// A literal or integer offset literal index.
fn constant_index(index: &Expr) -> Option<i64> {
    match &index.kind {
        ExprKind::Literal { value, .. } => value.parse().ok(),
        ExprKind::OffsetLiteral {
            value: OffsetValue::Int(value),
        } => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_ir::make::*;

    #[test]
    fn neighbor_access_becomes_shift() {
        let e = list_get(int32(2), neighbors("V2E", "it"));
        assert_snapshot!(collapse_list_get_expr(e), @"deref(shift(V2Eₒ, 2ₒ)(it))");
    }

    #[test]
    fn constant_list_access() {
        let e = plus(list_get(int32(0), make_const_list(float64(1.5))), "x");
        assert_snapshot!(collapse_list_get_expr(e), @"plus(1.5, x)");
    }

    #[test]
    fn offset_literal_index() {
        let e = list_get(offset_int(1), neighbors("V2E", "it"));
        assert_snapshot!(collapse_list_get_expr(e), @"deref(shift(V2Eₒ, 1ₒ)(it))");
    }

    #[test]
    fn symbolic_index_is_kept() {
        let e = list_get("i", neighbors("V2E", "it"));
        assert_eq!(collapse_list_get_expr(e.clone()), e);
    }
}
