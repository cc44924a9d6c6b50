//! Unroll reductions over neighbor lists of statically known length.
//!
//! `reduce(f, init)(neighbors(o, it))` over a connectivity with `n`
//! neighbors becomes
//!
//! ```text
//! (λ(step) → step(...step(step(init, 0ₒ), 1ₒ)..., (n-1)ₒ))(
//!     λ(acc, i) → f(acc, list_get(i, neighbors(o, it))))
//! ```
//!
//! When the connectivity has missing neighbors each step is guarded by
//! `can_deref(shift(o, i)(it))` and keeps the accumulator otherwise.

use rustc_hash::FxHashSet;

use itir_common::dimension::{Connectivity, OffsetProvider};
use itir_common::uid::UidGenerator;
use itir_ir::builtins::Builtin;
use itir_ir::ir::{Expr, ExprKind, OffsetValue, Program};
use itir_ir::make::{call, can_deref, if_, lambda, list_get, offset_int, shift, sym_ref};
use itir_ir::pattern::{applied_parts, is_applied_reduce, is_call_to};

use crate::error::PipelineError;

struct Unroller<'a> {
    offset_provider: &'a OffsetProvider,
    taken: FxHashSet<String>,
    acc: UidGenerator,
    index: UidGenerator,
    step: UidGenerator,
}

/// Unroll every reduction over a connectivity in `program`. Fails when
/// one reduction reads neighbor lists of different connectivities.
pub fn unroll_reduce(program: Program, offset_provider: &OffsetProvider) -> Result<Program, PipelineError> {
    let mut taken = FxHashSet::default();
    program.walk_exprs(&mut |e| {
        if let Some(id) = e.as_sym_ref() {
            taken.insert(id.to_string());
        }
        if let Some((params, _)) = e.as_lambda() {
            taken.extend(params.iter().map(|p| p.id.clone()));
        }
    });
    let mut unroller = Unroller {
        offset_provider,
        taken,
        acc: UidGenerator::new("_acc"),
        index: UidGenerator::new("_i"),
        step: UidGenerator::new("_step"),
    };
    program.try_map_exprs(|e| e.try_transform_up(&mut |node| unroller.unroll(node)))
}

fn fresh(uids: &mut UidGenerator, taken: &mut FxHashSet<String>) -> String {
    let id = uids.fresh_id(|n| taken.contains(n));
    taken.insert(id.clone());
    id
}

impl Unroller<'_> {
    fn unroll(&mut self, expr: Expr) -> Result<Expr, PipelineError> {
        if !is_applied_reduce(&expr) {
            return Ok(expr);
        }
        let Some(([fun, init], args)) = applied_parts(&expr) else {
            return Ok(expr);
        };
        let Some((connectivity, neighbors_offset, neighbors_it)) = self.connectivity(args)? else {
            return Ok(expr);
        };

        let acc = fresh(&mut self.acc, &mut self.taken);
        let index = fresh(&mut self.index, &mut self.taken);
        let step = fresh(&mut self.step, &mut self.taken);

        let mut step_args = vec![sym_ref(acc.as_str())];
        step_args.extend(args.iter().map(|arg| list_get(sym_ref(index.as_str()), arg.clone())));
        let mut step_body = call(fun.clone(), step_args);
        if connectivity.has_skip_values {
            let present = can_deref(shift(
                [neighbors_offset.clone(), sym_ref(index.as_str())],
                neighbors_it.clone(),
            ));
            step_body = if_(present, step_body, sym_ref(acc.as_str()));
        }
        let step_fun = lambda([acc, index], step_body);

        let unrolled = (0..connectivity.max_neighbors).fold(init.clone(), |acc, i| {
            call(sym_ref(step.as_str()), [acc, offset_int(i as i64)])
        });
        let mut result = call(lambda([step], unrolled), [step_fun]);
        result.ty = expr.ty.clone();
        Ok(result)
    }

    /// The connectivity shared by every `neighbors` argument, with the
    /// offset and iterator of the first one.
    fn connectivity<'e>(
        &self,
        args: &'e [Expr],
    ) -> Result<Option<(Connectivity, &'e Expr, &'e Expr)>, PipelineError> {
        let mut found: Option<(Connectivity, &'e Expr, &'e Expr)> = None;
        for arg in args {
            if !is_call_to(arg, Builtin::Neighbors) {
                continue;
            }
            let Some((_, [offset, it])) = arg.as_fun_call() else {
                continue;
            };
            let ExprKind::OffsetLiteral {
                value: OffsetValue::Name(name),
            } = &offset.kind
            else {
                continue;
            };
            let Some(conn) = self.offset_provider.connectivity(name) else {
                continue;
            };
            match &found {
                Some((first, _, _)) if first != conn => {
                    return Err(PipelineError::Invariant(format!(
                        "reduce over neighbor lists of different connectivities: `{}`",
                        args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                    )));
                }
                Some(_) => {}
                None => found = Some((conn.clone(), offset, it)),
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use itir_common::dimension::Dimension;
    use itir_ir::ir::{StencilClosure, Sym};
    use itir_ir::make::*;

    fn provider(has_skip_values: bool) -> OffsetProvider {
        OffsetProvider::new().with_connectivity(
            "V2E",
            Connectivity {
                origin_axis: Dimension::horizontal("Vertex"),
                neighbor_axis: Dimension::horizontal("Edge"),
                max_neighbors: 2,
                has_skip_values,
            },
        )
    }

    fn program(stencil: Expr) -> Program {
        let closure = StencilClosure::new(
            unstructured_domain([named_range("Vertex", int32(0), "n")]),
            stencil,
            sym_ref("out"),
            vec![sym_ref("inp")],
        )
        .unwrap();
        Program::new("p", vec![Sym::new("inp"), Sym::new("out"), Sym::new("n")], vec![closure])
    }

    fn sum_over_neighbors() -> Expr {
        lambda(
            ["it"],
            call(
                reduce(lambda(["acc", "x"], plus("acc", "x")), float64(0.0)),
                [neighbors("V2E", "it")],
            ),
        )
    }

    #[test]
    fn unrolls_into_step_chain() {
        let p = unroll_reduce(program(sum_over_neighbors()), &provider(false)).unwrap();
        assert_snapshot!(
            p.closures[0].stencil,
            @"λ(it) → (λ(_step_0) → _step_0(_step_0(0.0, 0ₒ), 1ₒ))(λ(_acc_0, _i_0) → (λ(acc, x) → plus(acc, x))(_acc_0, list_get(_i_0, neighbors(V2Eₒ, it))))"
        );
    }

    #[test]
    fn guards_missing_neighbors() {
        let p = unroll_reduce(program(sum_over_neighbors()), &provider(true)).unwrap();
        assert_snapshot!(
            p.closures[0].stencil,
            @"λ(it) → (λ(_step_0) → _step_0(_step_0(0.0, 0ₒ), 1ₒ))(λ(_acc_0, _i_0) → if_(can_deref(shift(V2Eₒ, _i_0)(it)), (λ(acc, x) → plus(acc, x))(_acc_0, list_get(_i_0, neighbors(V2Eₒ, it))), _acc_0))"
        );
    }

    #[test]
    fn reduce_without_neighbors_is_kept() {
        let stencil = lambda(
            ["xs"],
            call(reduce(lambda(["acc", "x"], plus("acc", "x")), float64(0.0)), ["xs"]),
        );
        let p = program(stencil.clone());
        let unrolled = unroll_reduce(p, &provider(false)).unwrap();
        assert_eq!(unrolled.closures[0].stencil, stencil);
    }
}
