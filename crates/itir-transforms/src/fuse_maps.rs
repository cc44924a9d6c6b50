//! Fuse `map_` arguments into the `map_` or `reduce` consuming them.
//!
//! `map_(f)(a, map_(g)(b))` becomes `map_(λ(x, y) → f(x, g(y)))(a, b)` and
//! `reduce(f, init)(map_(g)(b))` becomes `reduce(λ(acc, y) → f(acc, g(y)), init)(b)`.

use rustc_hash::FxHashSet;

use itir_common::uid::UidGenerator;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, Program};
use itir_ir::make::{builtin, call, lambda, sym_ref};
use itir_ir::pattern::{applied_parts, is_applied_map, is_applied_reduce};
use itir_ir::symbols::{bound_symbols, referenced_symbols};

use crate::inline_lambdas::{inline_lambdas, InlineOptions};

/// Fuse maps in every expression of `program`.
pub fn fuse_maps(program: Program, uids: &mut UidGenerator) -> Program {
    program.map_exprs(|e| fuse_maps_expr(e, uids))
}

/// Fuse nested `map_` calls in `expr`, bottom-up.
pub fn fuse_maps_expr(expr: Expr, uids: &mut UidGenerator) -> Expr {
    expr.transform_up(&mut |e| fuse_node(e, uids))
}

fn fuse_node(expr: Expr, uids: &mut UidGenerator) -> Expr {
    let is_map = is_applied_map(&expr);
    if !is_map && !is_applied_reduce(&expr) {
        return expr;
    }
    let Some((inner, args)) = applied_parts(&expr) else {
        return expr;
    };
    if !args.iter().any(is_applied_map) {
        return expr;
    }
    let Some(fun) = inner.first() else {
        return expr;
    };

    let mut taken = referenced_symbols(&expr);
    taken.extend(bound_symbols(&expr));
    let mut params = Vec::new();
    let mut fun_args = Vec::new();
    if !is_map {
        let acc = fresh_param(uids, &mut taken);
        fun_args.push(sym_ref(acc.as_str()));
        params.push(acc);
    }
    let mut new_args = Vec::new();
    for arg in args {
        match applied_parts(arg) {
            Some(([mapped], mapped_args)) if is_applied_map(arg) => {
                let mut elems = Vec::with_capacity(mapped_args.len());
                for mapped_arg in mapped_args {
                    let param = fresh_param(uids, &mut taken);
                    elems.push(sym_ref(param.as_str()));
                    params.push(param);
                    new_args.push(mapped_arg.clone());
                }
                fun_args.push(call(mapped.clone(), elems));
            }
            _ => {
                let param = fresh_param(uids, &mut taken);
                fun_args.push(sym_ref(param.as_str()));
                params.push(param);
                new_args.push(arg.clone());
            }
        }
    }

    let body = inline_lambdas(call(fun.clone(), fun_args), &InlineOptions::opcount_preserving());
    let mut head_args = vec![lambda(params, body)];
    head_args.extend(inner.iter().skip(1).cloned());
    let head = if is_map { Builtin::Map } else { Builtin::Reduce };
    let mut fused = call(call(builtin(head), head_args), new_args);
    fused.ty = expr.ty;
    fused.location = expr.location;
    fused
}

fn fresh_param(uids: &mut UidGenerator, taken: &mut FxHashSet<String>) -> String {
    let id = uids.fresh_id(|n| taken.contains(n));
    taken.insert(id.clone());
    id
}
