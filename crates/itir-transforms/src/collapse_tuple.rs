//! Simplify tuple construction followed by component access.
//!
//! - `tuple_get(i, make_tuple(e0, ..., en))` → `ei`
//! - `make_tuple(tuple_get(0, t), ..., tuple_get(n-1, t))` → `t`, provided
//!   `t` has exactly `n` components (or `ignore_tuple_size` is set)
//! - `tuple_get(i, let x = v in body)` → `let x = v in tuple_get(i, body)`
//! - `tuple_get(i, if_(c, a, b))` → `if_(c, tuple_get(i, a), tuple_get(i, b))`

use rustc_hash::FxHashMap;

use itir_common::dimension::OffsetProvider;
use itir_common::ty::TypeSpec;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, Program};
use itir_ir::make::{call, if_, tuple_get};
use itir_ir::pattern::{is_call_to, is_let};
use itir_typeck::{infer_expr, InferError};

/// Collapse tuples in every expression of `program`. Tuple arity is
/// learned by type inference unless `ignore_tuple_size` is set.
pub fn collapse_tuple(
    program: Program,
    offset_provider: &OffsetProvider,
    ignore_tuple_size: bool,
) -> Result<Program, InferError> {
    program.try_map_exprs(|e| collapse_tuple_expr(e, offset_provider, ignore_tuple_size))
}

/// Collapse tuple construction and access in `expr`, bottom-up.
pub fn collapse_tuple_expr(
    expr: Expr,
    offset_provider: &OffsetProvider,
    ignore_tuple_size: bool,
) -> Result<Expr, InferError> {
    let ctx = Collapser {
        offset_provider,
        ignore_tuple_size,
    };
    expr.try_transform_up(&mut |e| ctx.collapse(e))
}

struct Collapser<'a> {
    offset_provider: &'a OffsetProvider,
    ignore_tuple_size: bool,
}

impl Collapser<'_> {
    fn collapse(&self, expr: Expr) -> Result<Expr, InferError> {
        if let Some((index, tuple)) = tuple_access(&expr) {
            if is_call_to(tuple, Builtin::MakeTuple) {
                if let Some(elem) = tuple.as_fun_call().and_then(|(_, elems)| elems.get(index)) {
                    return Ok(elem.clone());
                }
            }
            if is_let(tuple) {
                if let Some((fun, args)) = tuple.as_fun_call() {
                    if let Some((params, body)) = fun.as_lambda() {
                        let inner = self.collapse(tuple_get(index, body.clone()))?;
                        let lambda = Expr::new(ExprKind::Lambda {
                            params: params.to_vec(),
                            body: Box::new(inner),
                        });
                        return Ok(call(lambda, args.to_vec()));
                    }
                }
            }
            if is_call_to(tuple, Builtin::If) {
                if let Some((_, [cond, then, otherwise])) = tuple.as_fun_call() {
                    let then = self.collapse(tuple_get(index, then.clone()))?;
                    let otherwise = self.collapse(tuple_get(index, otherwise.clone()))?;
                    return Ok(if_(cond.clone(), then, otherwise));
                }
            }
        }

        if is_call_to(&expr, Builtin::MakeTuple) {
            if let Some(source) = expr.as_fun_call().and_then(|(_, elems)| common_source(elems)) {
                let arity = expr.as_fun_call().map_or(0, |(_, elems)| elems.len());
                if self.ignore_tuple_size || self.tuple_arity(source)? == Some(arity) {
                    return Ok(source.clone());
                }
            }
        }

        Ok(expr)
    }

    fn tuple_arity(&self, tuple: &Expr) -> Result<Option<usize>, InferError> {
        let ty = match &tuple.ty {
            Some(ty) => ty.clone(),
            None => {
                let typed = infer_expr(tuple, self.offset_provider, &FxHashMap::default(), true)?;
                typed.ty.unwrap_or(TypeSpec::Deferred)
            }
        };
        Ok(match ty {
            TypeSpec::Tuple(elems) => Some(elems.len()),
            _ => None,
        })
    }
}

/// `tuple_get(i, t)` with a literal index.
fn tuple_access(expr: &Expr) -> Option<(usize, &Expr)> {
    if !is_call_to(expr, Builtin::TupleGet) {
        return None;
    }
    let (_, [index, tuple]) = expr.as_fun_call()? else {
        return None;
    };
    let (value, _) = index.as_literal()?;
    Some((value.parse().ok()?, tuple))
}

/// `t` when `elems` is `tuple_get(0, t), tuple_get(1, t), ...`.
fn common_source(elems: &[Expr]) -> Option<&Expr> {
    let mut source: Option<&Expr> = None;
    for (i, elem) in elems.iter().enumerate() {
        let (index, tuple) = tuple_access(elem)?;
        if index != i {
            return None;
        }
        match source {
            Some(s) if s != tuple => return None,
            _ => source = Some(tuple),
        }
    }
    source
}
