//! Eliminate `lift` where its iterator is consumed directly.
//!
//! - `deref(lift(f)(args))` → `f(args)`
//! - `shift(o)(lift(f)(args))` → `lift(f)(shift(o)(args)...)`
//! - `can_deref(lift(f)(args))` → `and_(can_deref(a0), can_deref(a1), ...)`

use itir_ir::builtins::Builtin;
use itir_ir::ir::Expr;
use itir_ir::make::{applied_lift, bool_, builtin, call, can_deref, shift};
use itir_ir::pattern::{applied_parts, is_applied_lift, is_applied_shift, is_call_to};

/// Inline lifts consumed by `deref`, `can_deref` and, when
/// `propagate_shift` is set, `shift`.
pub fn inline_lifts(expr: Expr, propagate_shift: bool) -> Expr {
    expr.transform_up(&mut |e| rewrite(e, propagate_shift))
}

fn rewrite(expr: Expr, propagate_shift: bool) -> Expr {
    if is_call_to(&expr, Builtin::Deref) {
        if let Some((_, [it])) = expr.as_fun_call() {
            if let Some(([stencil], args)) = lifted(it) {
                return call(stencil.clone(), args.to_vec());
            }
        }
    }

    if propagate_shift && is_applied_shift(&expr) {
        if let Some((offsets, [it])) = applied_parts(&expr) {
            if let Some(([stencil], args)) = lifted(it) {
                let shifted: Vec<Expr> = args
                    .iter()
                    .map(|arg| {
                        rewrite(shift(offsets.to_vec(), arg.clone()), propagate_shift)
                    })
                    .collect();
                return applied_lift(stencil.clone(), shifted);
            }
        }
    }

    if is_call_to(&expr, Builtin::CanDeref) {
        if let Some((_, [it])) = expr.as_fun_call() {
            if let Some((_, args)) = lifted(it) {
                let checks: Vec<Expr> = args
                    .iter()
                    .map(|arg| rewrite(can_deref(arg.clone()), propagate_shift))
                    .collect();
                return and_all(checks);
            }
        }
    }

    expr
}

/// The stencil and arguments of `lift(stencil)(args)`.
fn lifted(expr: &Expr) -> Option<(&[Expr], &[Expr])> {
    if is_applied_lift(expr) {
        applied_parts(expr)
    } else {
        None
    }
}

fn and_all(mut checks: Vec<Expr>) -> Expr {
    let Some(first) = checks.pop() else {
        return bool_(true);
    };
    checks
        .into_iter()
        .rev()
        .fold(first, |acc, check| call(builtin(Builtin::And), [check, acc]))
}
