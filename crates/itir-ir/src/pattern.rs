//! Structural predicates for the canonical shapes every pass looks for.

use crate::builtins::Builtin;
use crate::ir::{Expr, ExprKind};

/// `(λ(...) → ...)(...)`
pub fn is_let(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::FunCall { fun, .. } if matches!(fun.kind, ExprKind::Lambda { .. }))
}

/// A call whose callee is a reference to `builtin`.
pub fn is_call_to(expr: &Expr, builtin: Builtin) -> bool {
    called_builtin(expr) == Some(builtin)
}

/// The builtin directly called by `expr`, if any.
pub fn called_builtin(expr: &Expr) -> Option<Builtin> {
    match &expr.kind {
        ExprKind::FunCall { fun, .. } => fun.as_builtin(),
        _ => None,
    }
}

/// `builtin(...)(...)`: a curried builtin applied to its second argument list.
fn is_applied(expr: &Expr, builtin: Builtin) -> bool {
    matches!(&expr.kind, ExprKind::FunCall { fun, .. } if is_call_to(fun, builtin))
}

/// `lift(λ(...) → ...)(...)`
pub fn is_applied_lift(expr: &Expr) -> bool {
    is_applied(expr, Builtin::Lift)
}

/// `shift(...)(it)`
pub fn is_applied_shift(expr: &Expr) -> bool {
    is_applied(expr, Builtin::Shift)
}

/// `map_(f)(...)`
pub fn is_applied_map(expr: &Expr) -> bool {
    is_applied(expr, Builtin::Map)
}

/// `reduce(f, init)(...)`
pub fn is_applied_reduce(expr: &Expr) -> bool {
    is_applied(expr, Builtin::Reduce)
}

/// `as_fieldop(stencil[, domain])(...)`
pub fn is_applied_as_fieldop(expr: &Expr) -> bool {
    is_applied(expr, Builtin::AsFieldop)
}

/// Split an applied curried builtin `b(inner...)(outer...)` into its two
/// argument lists.
pub fn applied_parts(expr: &Expr) -> Option<(&[Expr], &[Expr])> {
    let (fun, outer) = expr.as_fun_call()?;
    let (_, inner) = fun.as_fun_call()?;
    Some((inner, outer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make::*;

    #[test]
    fn recognizes_let() {
        assert!(is_let(&let_("x", "y", "x")));
        assert!(!is_let(&call("f", ["y"])));
    }

    #[test]
    fn recognizes_applied_lift() {
        let applied = applied_lift(lambda(["it"], deref("it")), ["inp"]);
        assert!(is_applied_lift(&applied));
        assert!(!is_applied_lift(&call("lift", [lambda(["it"], deref("it"))])));
        let (inner, outer) = applied_parts(&applied).unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(outer, &[Expr::from("inp")]);
    }

    #[test]
    fn call_to_matches_builtin_name() {
        let e = call("plus", ["a", "b"]);
        assert!(is_call_to(&e, Builtin::Plus));
        assert!(!is_call_to(&e, Builtin::Minus));
        assert!(is_applied_shift(&shift([offset("I"), offset_int(1)], "it")));
    }
}
