//! The pass pipeline.
//!
//! [`apply_common_transforms`] runs the passes in a fixed order. Loops that
//! repeat until the program stops changing are bounded by
//! [`PipelineOptions::max_fixpoint_iterations`] and fail with
//! [`PipelineError::NonConvergence`] when the bound is hit.

use tracing::{debug, instrument, trace};

use itir_common::dimension::OffsetProvider;
use itir_common::uid::UidGenerator;
use itir_ir::ir::Program;

use crate::collapse_list_get::collapse_list_get;
use crate::collapse_tuple::collapse_tuple;
use crate::constant_folding::constant_folding;
use crate::cse::cse;
use crate::error::PipelineError;
use crate::fuse_as_fieldop::fuse_as_fieldop;
use crate::fuse_maps::fuse_maps;
use crate::global_tmps::create_global_tmps;
use crate::infer_domain::{infer_domain, DomainContext};
use crate::inline_fundefs::{inline_fundefs, prune_unreferenced_fundefs};
use crate::inline_lambdas::{inline_lambdas_program, InlineOptions};
use crate::merge_let::merge_let;
use crate::normalize_shifts::normalize_shifts;
use crate::options::PipelineOptions;
use crate::unroll_reduce::unroll_reduce;

/// Apply `step` until the program no longer changes.
///
/// Fails with [`PipelineError::NonConvergence`] when `max_iterations`
/// applications still produce a change.
pub fn run_to_fixpoint<F>(
    stage: &'static str,
    max_iterations: usize,
    mut program: Program,
    mut step: F,
) -> Result<Program, PipelineError>
where
    F: FnMut(Program) -> Result<Program, PipelineError>,
{
    for iteration in 0..max_iterations {
        let next = step(program.clone())?;
        if next == program {
            debug!(stage, iterations = iteration + 1, "fixpoint reached");
            return Ok(next);
        }
        trace!(stage, iteration, "program changed");
        program = next;
    }
    Err(PipelineError::NonConvergence {
        stage,
        iterations: max_iterations,
        last_program: program.to_string(),
    })
}

/// Run the full rewrite pipeline on `program`.
#[instrument(skip_all, fields(program = %program.id))]
pub fn apply_common_transforms(
    program: Program,
    offset_provider: &OffsetProvider,
    options: &PipelineOptions,
) -> Result<Program, PipelineError> {
    let cap = options.max_fixpoint_iterations;
    let mut tmp_uids = UidGenerator::new("__tmp");
    let mut fieldop_uids = UidGenerator::new("__arg");
    let mut cse_uids = UidGenerator::new("_cs");
    let mut map_uids = UidGenerator::new("__map");
    let domain_ctx = DomainContext {
        offset_provider,
        symbolic_domain_sizes: options.symbolic_domain_sizes.as_ref(),
    };

    let mut ir = merge_let(program);
    ir = inline_fundefs(ir);
    ir = prune_unreferenced_fundefs(ir);
    ir = normalize_shifts(ir);
    debug!(functions = ir.function_definitions.len(), "function definitions inlined");

    // Domain inference cannot see through `let`-bound functions.
    ir = inline_lambdas_program(
        ir,
        &InlineOptions {
            opcount_preserving: true,
            force_inline_lift: true,
            force_inline_lambda_args: true,
        },
    );
    ir = infer_domain(ir, offset_provider, options.symbolic_domain_sizes.as_ref())?;

    let propagate_shift = !options.extract_temporaries;
    ir = run_to_fixpoint("inlining", cap, ir, |p| {
        let p = inline_lambdas_program(p, &InlineOptions::opcount_preserving());
        let p = constant_folding(p);
        // after `if_` folding, the surrounding `tuple_get`s can collapse
        let p = collapse_tuple(p, offset_provider, false)?;
        Ok(fuse_as_fieldop(p, &mut fieldop_uids, propagate_shift))
    })?;

    if options.common_subexpression_elimination {
        ir = cse(ir, &mut cse_uids);
        ir = merge_let(ir);
        ir = inline_lambdas_program(ir, &InlineOptions::opcount_preserving());
        debug!("common subexpressions eliminated");
    }

    if options.extract_temporaries {
        ir = itir_typeck::infer(&ir, offset_provider, false)?;
        ir = create_global_tmps(
            ir,
            domain_ctx,
            options.temporary_extraction_heuristic.as_ref(),
            &mut tmp_uids,
        )?;
        debug!(temporaries = ir.temporaries.len(), "temporaries extracted");
    }

    if options.unconditionally_collapse_tuples {
        ir = collapse_tuple(ir, offset_provider, true)?;
    }

    ir = normalize_shifts(ir);
    ir = fuse_maps(ir, &mut map_uids);
    ir = collapse_list_get(ir);

    if options.unroll_reduce {
        ir = run_to_fixpoint("reduce unrolling", cap, ir, |p| {
            let p = unroll_reduce(p, offset_provider)?;
            Ok(normalize_shifts(collapse_list_get(p)))
        })?;
    }

    Ok(inline_lambdas_program(
        ir,
        &InlineOptions {
            opcount_preserving: true,
            force_inline_lift: false,
            force_inline_lambda_args: options.force_inline_lambda_args,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use itir_ir::ir::{StencilClosure, Sym};
    use itir_ir::make::*;

    fn program(stencil: itir_ir::ir::Expr) -> Program {
        let closure = StencilClosure::new(
            cartesian_domain([named_range("IDim", int32(0), "n")]),
            stencil,
            sym_ref("out"),
            vec![sym_ref("inp")],
        )
        .unwrap();
        Program::new("p", vec![Sym::new("inp"), Sym::new("out"), Sym::new("n")], vec![closure])
    }

    #[test]
    fn fixpoint_stops_when_unchanged() {
        let p = program(sym_ref("deref"));
        let mut calls = 0;
        let result = run_to_fixpoint("noop", 5, p.clone(), |p| {
            calls += 1;
            Ok(p)
        })
        .unwrap();
        assert_eq!(result, p);
        assert_eq!(calls, 1);
    }

    #[test]
    fn fixpoint_reports_non_convergence() {
        let p = program(sym_ref("deref"));
        let err = run_to_fixpoint("growing", 3, p, |mut p| {
            p.closures[0].stencil = lambda(["x"], call(p.closures[0].stencil.clone(), ["x"]));
            Ok(p)
        })
        .unwrap_err();
        match err {
            PipelineError::NonConvergence {
                stage,
                iterations,
                last_program,
            } => {
                assert_eq!(stage, "growing");
                assert_eq!(iterations, 3);
                assert!(last_program.starts_with("p(inp, out, n) {"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn step_errors_propagate() {
        let p = program(sym_ref("deref"));
        let err = run_to_fixpoint("failing", 3, p, |_| Err(PipelineError::Invariant("boom".into())))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Invariant(_)));
    }

    #[test]
    fn trivial_program_is_unchanged() {
        let p = program(sym_ref("deref"));
        let result = apply_common_transforms(p.clone(), &OffsetProvider::new(), &PipelineOptions::default()).unwrap();
        assert_eq!(result, p);
    }
}
