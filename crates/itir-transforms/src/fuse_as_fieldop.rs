//! Fuse nested field operations into a single stencil.
//!
//! An argument of `as_fieldop(f)(...)` that is itself `as_fieldop(g)(xs)`
//! is replaced by its own arguments `xs`, and inside the new stencil `g`
//! is applied pointwise through `lift(g)`. Lifts are then inlined so the
//! fused stencil computes `g` in place.

use rustc_hash::FxHashSet;

use itir_common::uid::UidGenerator;
use itir_ir::ir::{Expr, Program};
use itir_ir::make::{applied_lift, as_fieldop, call, lambda, sym_ref};
use itir_ir::pattern::{applied_parts, is_applied_as_fieldop};
use itir_ir::symbols::{bound_symbols, referenced_symbols};

use crate::inline_lambdas::{inline_lambdas, InlineOptions};
use crate::inline_lifts::inline_lifts;

/// Fuse nested field operations in every expression of `program`.
pub fn fuse_as_fieldop(program: Program, uids: &mut UidGenerator, propagate_shift: bool) -> Program {
    program.map_exprs(|e| fuse_as_fieldop_expr(e, uids, propagate_shift))
}

/// Fuse `as_fieldop` arguments of `as_fieldop` calls in `expr`. Fresh
/// parameter names come from `uids`.
pub fn fuse_as_fieldop_expr(expr: Expr, uids: &mut UidGenerator, propagate_shift: bool) -> Expr {
    let fused = expr.transform_up(&mut |e| fuse_node(e, uids, propagate_shift));
    inline_lifts(fused, propagate_shift)
}

fn fuse_node(expr: Expr, uids: &mut UidGenerator, propagate_shift: bool) -> Expr {
    if !is_applied_as_fieldop(&expr) {
        return expr;
    }
    let Some(([stencil, domain @ ..], args)) = applied_parts(&expr) else {
        return expr;
    };
    if !args.iter().any(is_applied_as_fieldop) {
        return expr;
    }

    let mut taken = referenced_symbols(&expr);
    taken.extend(bound_symbols(&expr));
    let mut params: Vec<String> = Vec::new();
    let mut new_args: Vec<Expr> = Vec::new();
    let mut stencil_args: Vec<Expr> = Vec::new();

    for arg in args {
        match applied_parts(arg) {
            Some(([inner_stencil, ..], inner_args)) if is_applied_as_fieldop(arg) => {
                let mut lift_args = Vec::with_capacity(inner_args.len());
                for inner_arg in inner_args {
                    let param = fresh_param(uids, &mut taken);
                    lift_args.push(sym_ref(param.as_str()));
                    params.push(param);
                    new_args.push(inner_arg.clone());
                }
                stencil_args.push(applied_lift(inner_stencil.clone(), lift_args));
            }
            _ => {
                let param = fresh_param(uids, &mut taken);
                stencil_args.push(sym_ref(param.as_str()));
                params.push(param);
                new_args.push(arg.clone());
            }
        }
    }

    let options = InlineOptions {
        opcount_preserving: true,
        force_inline_lift: true,
        force_inline_lambda_args: false,
    };
    let body = inline_lambdas(call(stencil.clone(), stencil_args), &options);
    let body = inline_lifts(body, propagate_shift);
    let body = inline_lambdas(body, &options);

    let mut fused = call(as_fieldop(lambda(params, body), domain.first().cloned()), new_args);
    fused.ty = expr.ty;
    fused.location = expr.location;
    fused
}

fn fresh_param(uids: &mut UidGenerator, taken: &mut FxHashSet<String>) -> String {
    let id = uids.fresh_id(|n| taken.contains(n));
    taken.insert(id.clone());
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_ir::make::*;

    fn run(e: Expr, propagate_shift: bool) -> Expr {
        fuse_as_fieldop_expr(e, &mut UidGenerator::new("__arg"), propagate_shift)
    }

    fn squared(field: &str) -> Expr {
        call(
            as_fieldop(lambda(["x"], multiplies(deref("x"), deref("x"))), None),
            [field],
        )
    }

    #[test]
    fn fuses_nested_field_operation() {
        let e = call(
            as_fieldop(lambda(["a", "b"], plus(deref("a"), deref("b"))), None),
            [squared("inp"), sym_ref("other")],
        );
        assert_snapshot!(
            run(e, true),
            @"as_fieldop(λ(__arg_0, __arg_1) → plus(multiplies(deref(__arg_0), deref(__arg_0)), deref(__arg_1)))(inp, other)"
        );
    }

    #[test]
    fn unfusable_operation_is_unchanged() {
        let e = call(as_fieldop(lambda(["a"], deref("a")), None), ["inp"]);
        assert_eq!(run(e.clone(), true), e);
    }

    #[test]
    fn shifted_access_keeps_lift_without_propagation() {
        let inner = call(as_fieldop(lambda(["x"], deref("x")), None), ["inp"]);
        let e = call(
            as_fieldop(lambda(["a"], deref(shift([offset("I"), offset_int(1)], "a"))), None),
            [inner],
        );
        assert_snapshot!(
            run(e.clone(), false),
            @"as_fieldop(λ(__arg_0) → deref(shift(Iₒ, 1ₒ)(lift(λ(x) → deref(x))(__arg_0))))(inp)"
        );
        assert_snapshot!(run(e, true), @"as_fieldop(λ(__arg_0) → deref(shift(Iₒ, 1ₒ)(__arg_0)))(inp)");
    }

    #[test]
    fn outer_domain_is_kept() {
        let domain = cartesian_domain([named_range("IDim", int32(0), "n")]);
        let e = call(as_fieldop(lambda(["a"], deref("a")), Some(domain)), [squared("inp")]);
        assert_snapshot!(
            run(e, true),
            @"as_fieldop(λ(__arg_0) → multiplies(deref(__arg_0), deref(__arg_0)), cartesian_domain(named_range(IDimₐ, 0, n)))(inp)"
        );
    }
}
