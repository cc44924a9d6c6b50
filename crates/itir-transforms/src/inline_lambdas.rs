//! Inline applied lambdas by substituting their arguments.
//!
//! `(λ(x) → x)(y)` becomes `y`. Under the opcount-preserving policy an
//! argument is only substituted when its parameter is used at most once or
//! when the argument is a reference or a literal; the remaining parameters
//! stay bound by a smaller let around the partially substituted body.

use rustc_hash::{FxHashMap, FxHashSet};

use itir_ir::ir::{Expr, ExprKind, Program, Sym};
use itir_ir::pattern::{is_applied_lift, is_let};
use itir_ir::symbols::{bound_symbols, count_symbol_refs, free_symbols, fresh_name, substitute};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineOptions {
    /// Never duplicate a non-trivial argument.
    pub opcount_preserving: bool,
    /// Always inline arguments of the form `lift(f)(args)`.
    pub force_inline_lift: bool,
    /// Always inline arguments that are lambdas.
    pub force_inline_lambda_args: bool,
}

impl InlineOptions {
    /// Only the opcount-preserving policy, no forced inlining.
    pub fn opcount_preserving() -> Self {
        InlineOptions {
            opcount_preserving: true,
            ..Default::default()
        }
    }
}

/// Inline every applied lambda in `expr`, innermost first.
pub fn inline_lambdas(expr: Expr, options: &InlineOptions) -> Expr {
    expr.transform_up(&mut |e| inline_lambda(e, options))
}

/// Apply [`inline_lambdas`] to every expression of `program`.
pub fn inline_lambdas_program(program: Program, options: &InlineOptions) -> Program {
    program.map_exprs(|e| inline_lambdas(e, options))
}

/// Inline a single `(λ(params) → body)(args)` node. Anything else is
/// returned unchanged.
pub fn inline_lambda(call: Expr, options: &InlineOptions) -> Expr {
    if !is_let(&call) {
        return call;
    }
    let Expr { kind, ty, location } = call;
    let ExprKind::FunCall { fun, args } = kind else {
        unreachable!("checked by is_let")
    };
    let Expr {
        kind: fun_kind,
        ty: fun_ty,
        location: fun_location,
    } = *fun;
    let ExprKind::Lambda { params, body } = fun_kind else {
        unreachable!("checked by is_let")
    };

    let eligible = if params.len() == args.len() {
        eligible_params(&params, &body, &args, options)
    } else {
        vec![false; params.len()]
    };
    if !eligible.is_empty() && !eligible.iter().any(|&e| e) {
        let lambda = Expr {
            kind: ExprKind::Lambda { params, body },
            ty: fun_ty,
            location: fun_location,
        };
        return Expr {
            kind: ExprKind::FunCall {
                fun: Box::new(lambda),
                args,
            },
            ty,
            location,
        };
    }

    let mut map: FxHashMap<String, Expr> = FxHashMap::default();
    let mut kept_params = Vec::new();
    let mut kept_args = Vec::new();
    for ((param, arg), inline) in params.into_iter().zip(args).zip(&eligible) {
        if *inline {
            map.insert(param.id, arg);
        } else {
            kept_params.push(param);
            kept_args.push(arg);
        }
    }
    let kept_params = rename_capturing_params(kept_params, &body, &mut map);

    let mut result = substitute(*body, &map);
    if kept_params.is_empty() {
        if result.ty.is_none() {
            result.ty = ty;
        }
        return result;
    }
    Expr {
        kind: ExprKind::FunCall {
            fun: Box::new(Expr::new(ExprKind::Lambda {
                params: kept_params,
                body: Box::new(result),
            })),
            args: kept_args,
        },
        ty,
        location,
    }
}

fn eligible_params(params: &[Sym], body: &Expr, args: &[Expr], options: &InlineOptions) -> Vec<bool> {
    let mut eligible = vec![true; params.len()];
    if options.opcount_preserving {
        let names: Vec<&str> = params.iter().map(|p| p.id.as_str()).collect();
        let counts = count_symbol_refs(body, &names);
        for (i, (param, arg)) in params.iter().zip(args).enumerate() {
            let uses = counts.get(&param.id).copied().unwrap_or(0);
            if uses > 1 && !(arg.is_sym_ref() || arg.is_literal()) {
                eligible[i] = false;
            }
        }
    }
    for (i, arg) in args.iter().enumerate() {
        if options.force_inline_lift && is_applied_lift(arg) {
            eligible[i] = true;
        }
        if options.force_inline_lambda_args && matches!(arg.kind, ExprKind::Lambda { .. }) {
            eligible[i] = true;
        }
    }
    eligible
}

/// Kept parameters end up binding around the substituted body, so any of
/// them named like a free symbol of an inlined argument would capture it.
/// Rename those and extend `map` with the renaming.
fn rename_capturing_params(
    mut kept: Vec<Sym>,
    body: &Expr,
    map: &mut FxHashMap<String, Expr>,
) -> Vec<Sym> {
    let arg_free: FxHashSet<String> = map.values().flat_map(free_symbols).collect();
    if !kept.iter().any(|p| arg_free.contains(&p.id)) {
        return kept;
    }
    let mut taken = arg_free.clone();
    taken.extend(free_symbols(body));
    taken.extend(bound_symbols(body));
    taken.extend(kept.iter().map(|p| p.id.clone()));
    taken.extend(map.keys().cloned());

    for param in &mut kept {
        if arg_free.contains(&param.id) {
            let new_id = fresh_name(&param.id, |n| taken.contains(n));
            taken.insert(new_id.clone());
            map.insert(param.id.clone(), Expr::from(new_id.as_str()));
            param.id = new_id;
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_ir::make::*;

    fn opcount() -> InlineOptions {
        InlineOptions::opcount_preserving()
    }

    #[test]
    fn identity() {
        let e = call(lambda(["x"], "x"), ["y"]);
        assert_snapshot!(inline_lambdas(e, &InlineOptions::default()), @"y");
    }

    #[test]
    fn duplicates_without_opcount_policy() {
        let e = call(lambda(["x"], plus("x", "x")), [plus("y", "y")]);
        assert_snapshot!(
            inline_lambdas(e, &InlineOptions::default()),
            @"plus(plus(y, y), plus(y, y))"
        );
    }

    #[test]
    fn opcount_policy_keeps_shared_argument() {
        let e = call(lambda(["x"], plus("x", "x")), [plus("y", "y")]);
        assert_eq!(inline_lambdas(e.clone(), &opcount()), e);
    }

    #[test]
    fn unused_parameter_is_dropped() {
        let e = call(lambda(["x"], "a"), [deref("b")]);
        assert_snapshot!(inline_lambdas(e, &opcount()), @"a");
    }

    #[test]
    fn partial_inlining() {
        let e = call(
            lambda(["x", "y"], plus("x", plus("y", "y"))),
            [sym_ref("a"), deref("b")],
        );
        assert_snapshot!(inline_lambdas(e, &opcount()), @"(λ(y) → plus(a, plus(y, y)))(deref(b))");
    }

    #[test]
    fn kept_parameter_does_not_capture() {
        let e = call(
            lambda(["x", "y"], plus("x", plus("y", "y"))),
            [sym_ref("y"), deref("b")],
        );
        assert_snapshot!(
            inline_lambdas(e, &opcount()),
            @"(λ(y_) → plus(y, plus(y_, y_)))(deref(b))"
        );
    }

    #[test]
    fn inner_binder_does_not_capture() {
        let e = call(lambda(["x"], lambda(["y"], plus("x", "y"))), ["y"]);
        assert_snapshot!(inline_lambdas(e, &opcount()), @"λ(y_) → plus(y, y_)");
    }

    #[test]
    fn forced_lift_inlining() {
        let lifted = applied_lift(lambda(["it"], deref("it")), ["inp"]);
        let e = call(lambda(["x"], plus(deref("x"), deref("x"))), [lifted]);
        let options = InlineOptions {
            force_inline_lift: true,
            ..opcount()
        };
        assert_snapshot!(
            inline_lambdas(e, &options),
            @"plus(deref(lift(λ(it) → deref(it))(inp)), deref(lift(λ(it) → deref(it))(inp)))"
        );
    }

    #[test]
    fn forced_lambda_argument_inlining() {
        let e = call(
            lambda(["f"], plus(call("f", ["a"]), call("f", ["b"]))),
            [lambda(["v"], deref("v"))],
        );
        let options = InlineOptions {
            force_inline_lambda_args: true,
            ..opcount()
        };
        assert_snapshot!(
            inline_lambdas(e, &options),
            @"plus((λ(v) → deref(v))(a), (λ(v) → deref(v))(b))"
        );
    }

    #[test]
    fn opcount_inlining_never_grows_the_tree() {
        let e = call(
            lambda(["x", "y"], multiplies(plus("x", "x"), "y")),
            [minus("a", "b"), deref("c")],
        );
        let before = e.node_count();
        assert!(inline_lambdas(e, &opcount()).node_count() <= before);
    }
}
