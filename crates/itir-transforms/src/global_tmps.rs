//! Temporary extraction: materialize applied lifts into global fields.
//!
//! A lift read at several positions is recomputed once per read. Extraction
//! moves `lift(f)(args)` into a closure of its own writing a new temporary
//! `__tmp_N`, and the original stencil reads the temporary instead:
//!
//! ```text
//! out ← (λ(a) → g(shift(I, -1)(lift(f)(a)), shift(I, 1)(lift(f)(a))))(inp)
//! ```
//!
//! becomes
//!
//! ```text
//! __tmp_0 ← (λ(a) → f(a))(inp) @ <domain displaced by ±1>;
//! out ← (λ(a, __tmp_0) → g(shift(I, -1)(__tmp_0), shift(I, 1)(__tmp_0)))(inp, __tmp_0)
//! ```
//!
//! Requires a typed program: the temporary's dtype is the element type of
//! the lift's iterator type.

use rustc_hash::FxHashSet;
use tracing::debug;

use itir_common::ty::TypeSpec;
use itir_common::uid::UidGenerator;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, Program, StencilClosure, Sym, Temporary};
use itir_ir::make::{call, lambda, sym_ref};
use itir_ir::pattern::{applied_parts, is_applied_lift};
use itir_ir::symbols::free_symbols;

use crate::error::PipelineError;
use crate::infer_domain::{accessed_domain, DomainContext};
use crate::inline_lambdas::{inline_lambdas, InlineOptions};
use crate::options::TemporaryHeuristic;
use crate::trace_shifts::{trace_stencil, TracedOffset};

/// Extract a lift when it is read at more than one position, or at every
/// neighbor of a connectivity.
pub fn default_heuristic(shifts: &[Vec<TracedOffset>]) -> bool {
    let distinct: FxHashSet<&Vec<TracedOffset>> = shifts.iter().collect();
    distinct.len() > 1 || shifts.iter().flatten().any(|o| *o == TracedOffset::AllNeighbors)
}

/// Extract the lifts of every closure that the heuristic (or
/// [`default_heuristic`]) accepts into temporaries.
pub fn create_global_tmps(
    mut program: Program,
    ctx: DomainContext<'_>,
    heuristic: Option<&TemporaryHeuristic>,
    uids: &mut UidGenerator,
) -> Result<Program, PipelineError> {
    let mut taken = program_symbols(&program);
    let mut i = 0;
    while i < program.closures.len() {
        let extracted = extract_one(&program.closures[i], ctx, heuristic, uids, &mut taken)?;
        match extracted {
            Some(Extraction {
                rewritten,
                closure,
                temporary,
            }) => {
                debug!(temporary = %temporary.id, "extracted temporary");
                program.closures[i] = rewritten;
                program.closures.insert(i, closure);
                program.temporaries.push(temporary);
            }
            None => i += 1,
        }
    }
    Ok(program)
}

struct Extraction {
    rewritten: StencilClosure,
    closure: StencilClosure,
    temporary: Temporary,
}

fn program_symbols(program: &Program) -> FxHashSet<String> {
    let mut taken: FxHashSet<String> = program.params.iter().map(|p| p.id.clone()).collect();
    taken.extend(program.temporaries.iter().map(|t| t.id.clone()));
    taken.extend(program.function_definitions.iter().map(|d| d.id.clone()));
    program.walk_exprs(&mut |e| match &e.kind {
        ExprKind::SymRef { id } => {
            taken.insert(id.clone());
        }
        ExprKind::Lambda { params, .. } => taken.extend(params.iter().map(|p| p.id.clone())),
        _ => {}
    });
    taken
}

fn extract_one(
    closure: &StencilClosure,
    ctx: DomainContext<'_>,
    heuristic: Option<&TemporaryHeuristic>,
    uids: &mut UidGenerator,
    taken: &mut FxHashSet<String>,
) -> Result<Option<Extraction>, PipelineError> {
    let Some((params, body)) = closure.stencil.as_lambda() else {
        return Ok(None);
    };
    let param_names: Vec<&str> = params.iter().map(|p| p.id.as_str()).collect();
    let mut candidates = Vec::new();
    collect_candidates(body, &param_names, &mut Vec::new(), &mut candidates);

    for lift in candidates {
        let mut probe = uids.clone();
        let tmp = probe.fresh_id(|n| taken.contains(n));
        let lift_free = free_symbols(lift);
        let new_body = replace_occurrences(body.clone(), lift, &sym_ref(tmp.as_str()), &lift_free);
        let mut new_params = params.to_vec();
        new_params.push(Sym::new(tmp.as_str()));
        let new_stencil = Expr::new(ExprKind::Lambda {
            params: new_params,
            body: Box::new(new_body),
        });
        let traces = trace_stencil(&new_stencil, params.len() + 1)?;
        let shifts = &traces[params.len()];

        let accepted = match heuristic {
            Some(h) => h.should_extract(closure, lift),
            None => default_heuristic(shifts),
        };
        if !accepted {
            continue;
        }
        *uids = probe;
        taken.insert(tmp.clone());

        let dtype = match &lift.ty {
            Some(TypeSpec::Iterator(it)) => (*it.element_type).clone(),
            _ => {
                return Err(PipelineError::Invariant(format!(
                    "temporary extraction needs the type of `{}`",
                    lift
                )))
            }
        };
        let domain = accessed_domain(&closure.domain, shifts, ctx)?;

        // The new closure takes exactly the stencil parameters the lift reads.
        let Some(([stencil], lift_args)) = applied_parts(lift) else {
            continue;
        };
        let used: Vec<usize> = (0..params.len())
            .filter(|&j| lift_free.contains(&params[j].id))
            .collect();
        let tmp_body = inline_lambdas(
            call(stencil.clone(), lift_args.to_vec()),
            &InlineOptions::opcount_preserving(),
        );
        let tmp_closure = StencilClosure {
            domain: domain.clone(),
            stencil: lambda(used.iter().map(|&j| params[j].id.clone()), tmp_body),
            output: sym_ref(tmp.as_str()),
            inputs: used.iter().map(|&j| closure.inputs[j].clone()).collect(),
            ty: None,
            location: closure.location.clone(),
        };

        let mut inputs = closure.inputs.clone();
        inputs.push(sym_ref(tmp.as_str()));
        let rewritten = StencilClosure {
            stencil: new_stencil,
            inputs,
            ..closure.clone()
        };
        return Ok(Some(Extraction {
            rewritten,
            closure: tmp_closure,
            temporary: Temporary { id: tmp, domain, dtype },
        }));
    }
    Ok(None)
}

/// Applied lifts, outermost first, that only read stencil parameters.
fn collect_candidates<'e>(
    expr: &'e Expr,
    params: &[&str],
    shadowed: &mut Vec<&'e str>,
    out: &mut Vec<&'e Expr>,
) {
    if is_applied_lift(expr) && !out.contains(&expr) {
        let readable = free_symbols(expr).iter().all(|s| {
            !shadowed.iter().any(|b| b == s)
                && (params.iter().any(|p| p == s) || Builtin::from_name(s).is_some())
        });
        if readable {
            out.push(expr);
            return;
        }
    }
    match &expr.kind {
        ExprKind::Lambda { params: inner, body } => {
            let depth = shadowed.len();
            shadowed.extend(inner.iter().map(|p| p.id.as_str()));
            collect_candidates(body, params, shadowed, out);
            shadowed.truncate(depth);
        }
        ExprKind::FunCall { fun, args } => {
            collect_candidates(fun, params, shadowed, out);
            for arg in args {
                collect_candidates(arg, params, shadowed, out);
            }
        }
        _ => {}
    }
}

/// Replace every occurrence of `target` with `with`, except under lambdas
/// rebinding one of `target`'s free symbols.
fn replace_occurrences(expr: Expr, target: &Expr, with: &Expr, target_free: &FxHashSet<String>) -> Expr {
    if expr == *target {
        return with.clone();
    }
    if let Some((params, _)) = expr.as_lambda() {
        if params.iter().any(|p| target_free.contains(&p.id)) {
            return expr;
        }
    }
    expr.map_children(|child| replace_occurrences(child, target, with, target_free))
}
