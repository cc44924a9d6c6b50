//! Domain inference for field operations.
//!
//! A closure input that is an applied `as_fieldop` without an explicit
//! domain must be computed on every point the closure's stencil reads from
//! it: the closure domain displaced by each traced shift. Nested field
//! operations get their domain from the one enclosing them in the same way.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use itir_common::dimension::OffsetProvider;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, OffsetValue, Program};
use itir_ir::make::{as_fieldop, builtin, call, int32, literal, minus, named_range, plus, sym_ref};
use itir_ir::pattern::{applied_parts, called_builtin, is_applied_as_fieldop};

use crate::error::PipelineError;
use crate::trace_shifts::{trace_stencil, TracedOffset};

/// Offset provider plus the sizes of dimensions only reachable through a
/// connectivity.
#[derive(Clone, Copy)]
pub struct DomainContext<'a> {
    pub offset_provider: &'a OffsetProvider,
    pub symbolic_domain_sizes: Option<&'a BTreeMap<String, String>>,
}

/// Give every applied `as_fieldop` closure input an explicit domain.
pub fn infer_domain(
    mut program: Program,
    offset_provider: &OffsetProvider,
    symbolic_domain_sizes: Option<&BTreeMap<String, String>>,
) -> Result<Program, PipelineError> {
    let ctx = DomainContext {
        offset_provider,
        symbolic_domain_sizes,
    };
    for closure in &mut program.closures {
        if !closure.inputs.iter().any(is_applied_as_fieldop) {
            continue;
        }
        let traces = trace_stencil(&closure.stencil, closure.inputs.len())?;
        let inputs = std::mem::take(&mut closure.inputs);
        closure.inputs = inputs
            .into_iter()
            .zip(&traces)
            .map(|(input, shifts)| {
                if !is_applied_as_fieldop(&input) {
                    return Ok(input);
                }
                let domain = accessed_domain(&closure.domain, shifts, ctx)?;
                infer_as_fieldop_domain(input, &domain, ctx)
            })
            .collect::<Result<_, PipelineError>>()?;
    }
    Ok(program)
}

/// Give `expr`, an applied `as_fieldop`, the domain `domain` unless it
/// already has one, then recurse into its field-operation arguments.
pub fn infer_as_fieldop_domain(expr: Expr, domain: &Expr, ctx: DomainContext<'_>) -> Result<Expr, PipelineError> {
    let Some(([stencil, explicit @ ..], args)) = applied_parts(&expr) else {
        return Ok(expr);
    };
    if !is_applied_as_fieldop(&expr) {
        return Ok(expr);
    }
    let domain = explicit.first().unwrap_or(domain).clone();
    let traces = trace_stencil(stencil, args.len())?;
    let args = args
        .iter()
        .zip(&traces)
        .map(|(arg, shifts)| {
            if !is_applied_as_fieldop(arg) {
                return Ok(arg.clone());
            }
            let arg_domain = accessed_domain(&domain, shifts, ctx)?;
            infer_as_fieldop_domain(arg.clone(), &arg_domain, ctx)
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    let mut result = call(as_fieldop(stencil.clone(), Some(domain)), args);
    result.ty = expr.ty;
    result.location = expr.location;
    Ok(result)
}

// ── Domains ────────────────────────────────────────────────────────────

struct Range {
    dim: String,
    start: Expr,
    stop: Expr,
}

struct Domain {
    unstructured: bool,
    ranges: Vec<Range>,
}

impl Domain {
    fn parse(expr: &Expr) -> Option<Domain> {
        let unstructured = match called_builtin(expr)? {
            Builtin::CartesianDomain => false,
            Builtin::UnstructuredDomain => true,
            _ => return None,
        };
        let (_, args) = expr.as_fun_call()?;
        let ranges = args
            .iter()
            .map(|range| {
                if called_builtin(range)? != Builtin::NamedRange {
                    return None;
                }
                let (_, [dim, start, stop]) = range.as_fun_call()? else {
                    return None;
                };
                let ExprKind::AxisLiteral { value } = &dim.kind else {
                    return None;
                };
                Some(Range {
                    dim: value.clone(),
                    start: start.clone(),
                    stop: stop.clone(),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Domain { unstructured, ranges })
    }

    fn into_expr(self) -> Expr {
        let head = if self.unstructured {
            Builtin::UnstructuredDomain
        } else {
            Builtin::CartesianDomain
        };
        call(
            builtin(head),
            self.ranges
                .into_iter()
                .map(|r| named_range(r.dim, r.start, r.stop)),
        )
    }
}

/// Where one traced access lands relative to the domain it starts from.
struct Access {
    /// Dimensions of the accessed position, in domain order.
    dims: Vec<String>,
    displacement: FxHashMap<String, i64>,
}

fn domain_error(message: impl Into<String>) -> PipelineError {
    PipelineError::TemporaryDomain(message.into())
}

fn trace_access(dims: &[String], shifts: &[TracedOffset], ctx: DomainContext<'_>) -> Result<Access, PipelineError> {
    let mut access = Access {
        dims: dims.to_vec(),
        displacement: FxHashMap::default(),
    };
    for pair in shifts.chunks(2) {
        let (tag, index) = match pair {
            [TracedOffset::Offset(OffsetValue::Name(tag)), index] => (tag, index),
            // a reduction over a local dimension without a connectivity
            [TracedOffset::AllNeighbors] => continue,
            _ => {
                return Err(PipelineError::Invariant(format!(
                    "malformed shift sequence {:?}",
                    shifts
                )))
            }
        };
        if let Some(dim) = ctx.offset_provider.cartesian_dimension(tag) {
            let TracedOffset::Offset(OffsetValue::Int(k)) = index else {
                return Err(domain_error(format!("non-constant shift along `{}`", tag)));
            };
            *access.displacement.entry(dim.value.clone()).or_default() += k;
        } else if let Some(conn) = ctx.offset_provider.connectivity(tag) {
            let Some(slot) = access.dims.iter().position(|d| *d == conn.origin_axis.value) else {
                return Err(domain_error(format!(
                    "shift by `{}` from a position without dimension `{}`",
                    tag, conn.origin_axis.value
                )));
            };
            access.displacement.remove(&conn.origin_axis.value);
            access.dims[slot] = conn.neighbor_axis.value.clone();
        } else {
            return Err(domain_error(format!("unknown offset `{}`", tag)));
        }
    }
    Ok(access)
}

/// `bound + k`, folded when `bound` is an integer literal.
fn displaced(bound: Expr, k: i64) -> Expr {
    if k == 0 {
        return bound;
    }
    if let Some((value, kind)) = bound.as_literal() {
        if let Ok(v) = value.parse::<i64>() {
            if let Some(sum) = v.checked_add(k) {
                return literal(sum.to_string(), kind);
            }
        }
    }
    if k < 0 {
        minus(bound, int32(-k))
    } else {
        plus(bound, int32(k))
    }
}

/// The domain covering every point `shifts` reads when iterating `domain`.
pub fn accessed_domain(
    domain: &Expr,
    shifts: &[Vec<TracedOffset>],
    ctx: DomainContext<'_>,
) -> Result<Expr, PipelineError> {
    if shifts.iter().all(Vec::is_empty) {
        return Ok(domain.clone());
    }
    let Some(parsed) = Domain::parse(domain) else {
        return Err(domain_error(format!("cannot displace domain `{}`", domain)));
    };
    let dims: Vec<String> = parsed.ranges.iter().map(|r| r.dim.clone()).collect();
    let accesses = shifts
        .iter()
        .map(|s| trace_access(&dims, s, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    let target = &accesses[0].dims;
    if accesses.iter().any(|a| a.dims != *target) {
        return Err(domain_error(format!(
            "accesses from `{}` land on different dimensions",
            domain
        )));
    }

    let mut ranges = Vec::with_capacity(target.len());
    let mut unstructured = parsed.unstructured;
    for (slot, dim) in target.iter().enumerate() {
        let offsets = accesses.iter().map(|a| a.displacement.get(dim).copied().unwrap_or(0));
        let low = offsets.clone().min().unwrap_or(0);
        let high = offsets.max().unwrap_or(0);
        let (start, stop) = if *dim == dims[slot] {
            let range = &parsed.ranges[slot];
            (range.start.clone(), range.stop.clone())
        } else {
            unstructured = true;
            let size = ctx
                .symbolic_domain_sizes
                .and_then(|sizes| sizes.get(dim))
                .ok_or_else(|| domain_error(format!("no size known for dimension `{}`", dim)))?;
            let stop = match size.parse::<i64>() {
                Ok(n) => int32(n),
                Err(_) => sym_ref(size.as_str()),
            };
            (int32(0), stop)
        };
        ranges.push(Range {
            dim: dim.clone(),
            start: displaced(start, low),
            stop: displaced(stop, high),
        });
    }
    Ok(Domain { unstructured, ranges }.into_expr())
}
