//! Common subexpression elimination.
//!
//! Every lambda body, and every computation root, is a scope. Within a
//! scope, calls that occur at least twice are bound once by a `let` at the
//! top of the scope and the occurrences replaced by a fresh `_cs_N`
//! reference. Scopes never look into nested lambdas, and only the
//! condition of an `if_` is searched since its branches are evaluated
//! conditionally.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use itir_common::ty::TypeSpec;
use itir_common::uid::UidGenerator;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, Program};
use itir_ir::make::{let_, sym_ref};
use itir_ir::pattern::{called_builtin, is_call_to};
use itir_ir::symbols::{bound_symbols, referenced_symbols};

/// Calls to these builtins produce functions, not values.
const FUNCTION_PRODUCING: &[Builtin] = &[
    Builtin::Shift,
    Builtin::Lift,
    Builtin::Reduce,
    Builtin::Map,
    Builtin::Scan,
    Builtin::AsFieldop,
];

/// Eliminate common subexpressions in every expression of `program`.
pub fn cse(program: Program, uids: &mut UidGenerator) -> Program {
    let mut taken: FxHashSet<String> = FxHashSet::default();
    program.walk_exprs(&mut |e| match &e.kind {
        ExprKind::SymRef { id } => {
            taken.insert(id.clone());
        }
        ExprKind::Lambda { params, .. } => {
            taken.extend(params.iter().map(|p| p.id.clone()));
        }
        _ => {}
    });
    program.map_exprs(|e| eliminate_in(e, uids, &mut taken))
}

/// Eliminate common subexpressions in `expr` and in every lambda nested in it.
pub fn cse_expr(expr: Expr, uids: &mut UidGenerator) -> Expr {
    let mut taken = referenced_symbols(&expr);
    taken.extend(bound_symbols(&expr));
    eliminate_in(expr, uids, &mut taken)
}

fn eliminate_in(expr: Expr, uids: &mut UidGenerator, taken: &mut FxHashSet<String>) -> Expr {
    let expr = expr.transform_up(&mut |e| match e.kind {
        ExprKind::Lambda { params, body } => Expr {
            kind: ExprKind::Lambda {
                params,
                body: Box::new(eliminate_scope(*body, uids, taken)),
            },
            ty: e.ty,
            location: e.location,
        },
        kind => Expr {
            kind,
            ty: e.ty,
            location: e.location,
        },
    });
    eliminate_scope(expr, uids, taken)
}

struct Candidate {
    expr: Expr,
    count: usize,
    types: Vec<TypeSpec>,
}

fn eliminate_scope(mut scope: Expr, uids: &mut UidGenerator, taken: &mut FxHashSet<String>) -> Expr {
    let mut bindings: Vec<(String, Expr)> = Vec::new();
    loop {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut index: FxHashMap<Expr, usize> = FxHashMap::default();
        collect(&scope, &mut candidates, &mut index);

        let best = candidates
            .into_iter()
            .filter(|c| c.count >= 2 && c.types.windows(2).all(|w| w[0] == w[1]))
            .fold(None::<(usize, Candidate)>, |best, c| {
                let size = c.expr.node_count();
                match best {
                    Some((best_size, _)) if best_size >= size => best,
                    _ => Some((size, c)),
                }
            });
        let Some((_, candidate)) = best else {
            break;
        };

        let name = uids.fresh_id(|n| taken.contains(n));
        taken.insert(name.clone());
        trace!(%name, expr = %candidate.expr, occurrences = candidate.count, "extracting common subexpression");
        scope = replace(scope, &candidate.expr, &name);
        let mut value = candidate.expr;
        if value.ty.is_none() {
            value.ty = candidate.types.into_iter().next();
        }
        bindings.push((name, value));
    }

    bindings
        .into_iter()
        .rev()
        .fold(scope, |body, (name, value)| let_(name, value, body))
}

fn is_candidate(expr: &Expr) -> bool {
    let ExprKind::FunCall { .. } = &expr.kind else {
        return false;
    };
    !called_builtin(expr).is_some_and(|b| FUNCTION_PRODUCING.contains(&b))
}

/// Count candidate occurrences in pre-order, first occurrence first.
fn collect(expr: &Expr, candidates: &mut Vec<Candidate>, index: &mut FxHashMap<Expr, usize>) {
    if is_candidate(expr) {
        let slot = *index.entry(expr.clone()).or_insert_with(|| {
            candidates.push(Candidate {
                expr: expr.clone(),
                count: 0,
                types: Vec::new(),
            });
            candidates.len() - 1
        });
        let candidate = &mut candidates[slot];
        candidate.count += 1;
        if let Some(ty) = &expr.ty {
            candidate.types.push(ty.clone());
        }
    }
    match &expr.kind {
        ExprKind::Lambda { .. } => {}
        ExprKind::FunCall { fun, args } => {
            if is_call_to(expr, Builtin::If) {
                if let Some(cond) = args.first() {
                    collect(cond, candidates, index);
                }
                return;
            }
            collect(fun, candidates, index);
            for arg in args {
                collect(arg, candidates, index);
            }
        }
        ExprKind::Literal { .. }
        | ExprKind::OffsetLiteral { .. }
        | ExprKind::AxisLiteral { .. }
        | ExprKind::SymRef { .. } => {}
    }
}

fn replace(expr: Expr, target: &Expr, name: &str) -> Expr {
    if expr == *target {
        let mut reference = sym_ref(name);
        reference.ty = expr.ty;
        return reference;
    }
    match expr.kind {
        ExprKind::Lambda { .. } => expr,
        ExprKind::FunCall { .. } if is_call_to(&expr, Builtin::If) => {
            let Expr { kind, ty, location } = expr;
            let ExprKind::FunCall { fun, mut args } = kind else {
                unreachable!("matched above")
            };
            if let Some(cond) = args.first_mut() {
                let taken_cond = std::mem::replace(cond, Expr::from(""));
                *cond = replace(taken_cond, target, name);
            }
            Expr {
                kind: ExprKind::FunCall { fun, args },
                ty,
                location,
            }
        }
        _ => expr.map_children(|child| replace(child, target, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_ir::make::*;

    fn run(e: Expr) -> Expr {
        cse_expr(e, &mut UidGenerator::new("_cs"))
    }

    fn shifted(it: &str) -> Expr {
        deref(shift([offset("I"), offset_int(1)], it))
    }

    #[test]
    fn extracts_repeated_call() {
        let e = plus(shifted("x"), shifted("x"));
        assert_snapshot!(run(e), @"(λ(_cs_0) → plus(_cs_0, _cs_0))(deref(shift(Iₒ, 1ₒ)(x)))");
    }

    #[test]
    fn lambda_bodies_are_scopes() {
        let e = lambda(["a"], plus(deref("a"), deref("a")));
        assert_snapshot!(run(e), @"λ(a) → (λ(_cs_0) → plus(_cs_0, _cs_0))(deref(a))");
    }

    #[test]
    fn does_not_look_into_nested_lambdas() {
        let e = plus(deref("a"), call(lambda(["a"], deref("a")), ["b"]));
        assert_eq!(run(e.clone()), e);
    }

    #[test]
    fn branches_are_not_hoisted() {
        let e = if_("c", deref("a"), deref("a"));
        assert_eq!(run(e.clone()), e);
    }

    #[test]
    fn disagreeing_types_are_not_merged() {
        let e = make_tuple([
            plus("a", "b").with_type(TypeSpec::int32()),
            plus("a", "b").with_type(TypeSpec::float64()),
        ]);
        assert_eq!(run(e.clone()), e);
    }

    #[test]
    fn largest_expression_first() {
        let sum = plus(deref("a"), deref("b"));
        let e = make_tuple([multiplies(sum.clone(), deref("a")), sum]);
        assert_snapshot!(
            run(e),
            @"(λ(_cs_0) → make_tuple(multiplies(_cs_0, deref(a)), _cs_0))(plus(deref(a), deref(b)))"
        );
    }

    #[test]
    fn fresh_names_avoid_existing_symbols() {
        let e = plus(call("f", ["_cs_0"]), call("f", ["_cs_0"]));
        assert_snapshot!(run(e), @"(λ(_cs_1) → plus(_cs_1, _cs_1))(f(_cs_0))");
    }
}
