//! Symbol utilities: free/bound symbol collection, reference counting and
//! capture-avoiding substitution.
//!
//! Scoping is strictly lexical. A lambda parameter shadows every outer
//! binding of the same name for the whole lambda body.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{Expr, ExprKind, Sym};

/// Symbols referenced in `expr` that no enclosing lambda inside `expr` binds.
pub fn free_symbols(expr: &Expr) -> FxHashSet<String> {
    let mut out = FxHashSet::default();
    collect_free(expr, &mut Vec::new(), &mut out);
    out
}

fn collect_free<'e>(expr: &'e Expr, bound: &mut Vec<&'e str>, out: &mut FxHashSet<String>) {
    match &expr.kind {
        ExprKind::SymRef { id } => {
            if !bound.contains(&id.as_str()) {
                out.insert(id.clone());
            }
        }
        ExprKind::Lambda { params, body } => {
            let depth = bound.len();
            bound.extend(params.iter().map(|p| p.id.as_str()));
            collect_free(body, bound, out);
            bound.truncate(depth);
        }
        ExprKind::FunCall { fun, args } => {
            collect_free(fun, bound, out);
            for arg in args {
                collect_free(arg, bound, out);
            }
        }
        ExprKind::Literal { .. } | ExprKind::OffsetLiteral { .. } | ExprKind::AxisLiteral { .. } => {}
    }
}

/// Every symbol declared by a lambda somewhere inside `expr`.
pub fn bound_symbols(expr: &Expr) -> FxHashSet<String> {
    let mut out = FxHashSet::default();
    expr.walk(&mut |e| {
        if let ExprKind::Lambda { params, .. } = &e.kind {
            out.extend(params.iter().map(|p| p.id.clone()));
        }
    });
    out
}

/// Every symbol referenced anywhere inside `expr`, bound or free.
pub fn referenced_symbols(expr: &Expr) -> FxHashSet<String> {
    let mut out = FxHashSet::default();
    expr.walk(&mut |e| {
        if let Some(id) = e.as_sym_ref() {
            out.insert(id.to_string());
        }
    });
    out
}

/// Count references to each of `names` that resolve to the binding visible
/// at the root of `expr` (references under a shadowing lambda do not count).
pub fn count_symbol_refs(expr: &Expr, names: &[&str]) -> FxHashMap<String, usize> {
    fn go(expr: &Expr, active: &FxHashSet<&str>, counts: &mut FxHashMap<String, usize>) {
        match &expr.kind {
            ExprKind::SymRef { id } => {
                if active.contains(id.as_str()) {
                    *counts.entry(id.clone()).or_insert(0) += 1;
                }
            }
            ExprKind::Lambda { params, body } => {
                if params.iter().any(|p| active.contains(p.id.as_str())) {
                    let mut inner = active.clone();
                    for p in params {
                        inner.remove(p.id.as_str());
                    }
                    go(body, &inner, counts);
                } else {
                    go(body, active, counts);
                }
            }
            ExprKind::FunCall { fun, args } => {
                go(fun, active, counts);
                for arg in args {
                    go(arg, active, counts);
                }
            }
            ExprKind::Literal { .. } | ExprKind::OffsetLiteral { .. } | ExprKind::AxisLiteral { .. } => {}
        }
    }

    let mut counts: FxHashMap<String, usize> = names.iter().map(|n| (n.to_string(), 0)).collect();
    let active: FxHashSet<&str> = names.iter().copied().collect();
    go(expr, &active, &mut counts);
    counts
}

/// Append `_` to `base` until `taken` no longer rejects it.
pub fn fresh_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut name = base.to_string();
    while taken(&name) {
        name.push('_');
    }
    name
}

/// Replace free references to the keys of `map` by the mapped expressions.
///
/// Substitution never captures: when a lambda inside `expr` binds a name
/// that occurs free in a replacement, that parameter is renamed first.
pub fn substitute(expr: Expr, map: &FxHashMap<String, Expr>) -> Expr {
    if map.is_empty() {
        return expr;
    }
    match expr.kind {
        ExprKind::SymRef { ref id } => match map.get(id) {
            Some(replacement) => replacement.clone(),
            None => expr,
        },
        ExprKind::Lambda { params, body } => {
            let inner: FxHashMap<String, Expr> = map
                .iter()
                .filter(|(name, _)| !params.iter().any(|p| &p.id == *name))
                .map(|(name, e)| (name.clone(), e.clone()))
                .collect();
            let (params, body) = avoid_capture(params, *body, &inner);
            Expr {
                kind: ExprKind::Lambda {
                    params,
                    body: Box::new(substitute(body, &inner)),
                },
                ty: expr.ty,
                location: expr.location,
            }
        }
        _ => expr.map_children(|child| substitute(child, map)),
    }
}

/// Rename the parameters of `λ(params) → body` that would capture a free
/// symbol of one of the replacements in `map`.
fn avoid_capture(
    mut params: Vec<Sym>,
    body: Expr,
    map: &FxHashMap<String, Expr>,
) -> (Vec<Sym>, Expr) {
    let body_free = free_symbols(&body);
    let live: Vec<&Expr> = map
        .iter()
        .filter(|(name, _)| body_free.contains(*name))
        .map(|(_, e)| e)
        .collect();
    if live.is_empty() {
        return (params, body);
    }
    let replacement_free: FxHashSet<String> = live.iter().flat_map(|e| free_symbols(e)).collect();
    if !params.iter().any(|p| replacement_free.contains(&p.id)) {
        return (params, body);
    }

    let mut taken: FxHashSet<String> = replacement_free.clone();
    taken.extend(body_free);
    taken.extend(bound_symbols(&body));
    taken.extend(params.iter().map(|p| p.id.clone()));
    taken.extend(map.keys().cloned());

    let mut renames: FxHashMap<String, Expr> = FxHashMap::default();
    for param in &mut params {
        if replacement_free.contains(&param.id) {
            let new_id = fresh_name(&param.id, |n| taken.contains(n));
            taken.insert(new_id.clone());
            renames.insert(param.id.clone(), Expr::from(new_id.as_str()));
            param.id = new_id;
        }
    }
    (params, substitute(body, &renames))
}
