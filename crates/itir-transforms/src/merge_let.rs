//! Merge directly nested `let`s into one.
//!
//! `(λ(a) → (λ(b) → body)(vb))(va)` becomes `(λ(a, b) → body)(va, vb)`
//! when `vb` does not read `a` and the parameter names are distinct.

use itir_ir::ir::{Expr, ExprKind, Program};
use itir_ir::symbols::free_symbols;

/// Merge nested lets in every expression of `program`.
pub fn merge_let(program: Program) -> Program {
    program.map_exprs(merge_let_expr)
}

/// Merge nested lets in `expr`, bottom-up.
pub fn merge_let_expr(expr: Expr) -> Expr {
    expr.transform_up(&mut merge_node)
}

fn merge_node(expr: Expr) -> Expr {
    if !can_merge(&expr) {
        return expr;
    }
    let Expr { kind, ty, location } = expr;
    let ExprKind::FunCall { fun, args: mut outer_args } = kind else {
        unreachable!("checked by can_merge")
    };
    let ExprKind::Lambda { params: mut outer_params, body } = fun.kind else {
        unreachable!("checked by can_merge")
    };
    let ExprKind::FunCall { fun: inner_fun, args: inner_args } = body.kind else {
        unreachable!("checked by can_merge")
    };
    let ExprKind::Lambda { params: inner_params, body: inner_body } = inner_fun.kind else {
        unreachable!("checked by can_merge")
    };

    outer_params.extend(inner_params);
    outer_args.extend(inner_args);
    Expr {
        kind: ExprKind::FunCall {
            fun: Box::new(Expr::new(ExprKind::Lambda {
                params: outer_params,
                body: inner_body,
            })),
            args: outer_args,
        },
        ty,
        location,
    }
}

fn can_merge(expr: &Expr) -> bool {
    let Some((fun, _)) = expr.as_fun_call() else {
        return false;
    };
    let Some((outer_params, body)) = fun.as_lambda() else {
        return false;
    };
    let Some((inner_fun, inner_args)) = body.as_fun_call() else {
        return false;
    };
    let Some((inner_params, _)) = inner_fun.as_lambda() else {
        return false;
    };
    if inner_params.iter().any(|p| outer_params.contains(p)) {
        return false;
    }
    !inner_args.iter().any(|arg| {
        let free = free_symbols(arg);
        outer_params.iter().any(|p| free.contains(&p.id))
    })
}
