use std::collections::BTreeMap;

use insta::assert_snapshot;

use itir_common::dimension::{Connectivity, Dimension, OffsetProvider};
use itir_common::ty::{ScalarKind, TypeSpec};
use itir_common::uid::UidGenerator;
use itir_ir::ir::{Expr, FunctionDefinition, Program, StencilClosure, Sym};
use itir_ir::make::*;
use itir_transforms::collapse_tuple::collapse_tuple_expr;
use itir_transforms::constant_folding::fold_constants;
use itir_transforms::inline_lambdas::{inline_lambdas, InlineOptions};
use itir_transforms::trace_shifts::{trace_shifts, TracedOffset};
use itir_transforms::{apply_common_transforms, run_to_fixpoint, PipelineError, PipelineOptions};

// ── Helpers ──────────────────────────────────────────────────────────────

fn idim() -> Dimension {
    Dimension::horizontal("IDim")
}

fn cartesian() -> OffsetProvider {
    OffsetProvider::new().with_dimension("I", idim())
}

fn mesh() -> OffsetProvider {
    OffsetProvider::new().with_connectivity(
        "V2E",
        Connectivity {
            origin_axis: Dimension::horizontal("Vertex"),
            neighbor_axis: Dimension::horizontal("Edge"),
            max_neighbors: 3,
            has_skip_values: false,
        },
    )
}

fn typed_params() -> Vec<Sym> {
    let field = TypeSpec::field(vec![idim()], ScalarKind::Float64);
    vec![
        Sym::typed("inp", field.clone()),
        Sym::typed("out", field),
        Sym::typed("n", TypeSpec::int32()),
    ]
}

fn closure(stencil: Expr) -> StencilClosure {
    StencilClosure::new(
        cartesian_domain([named_range("IDim", int32(0), "n")]),
        stencil,
        sym_ref("out"),
        vec![sym_ref("inp")],
    )
    .unwrap()
}

fn program(stencil: Expr) -> Program {
    Program::new("prog", typed_params(), vec![closure(stencil)])
}

fn shifted(it: impl Into<Expr>, by: i64) -> Expr {
    shift([offset("I"), offset_int(by)], it)
}

fn options() -> PipelineOptions {
    PipelineOptions::default()
}

// ── Concrete scenarios ───────────────────────────────────────────────────

#[test]
fn identity_lambda_inlines_to_argument() {
    let e = call(lambda(["x"], "x"), ["y"]);
    assert_snapshot!(inline_lambdas(e, &InlineOptions::default()), @"y");
}

#[test]
fn opcount_policy_decides_duplication() {
    let e = call(lambda(["x"], plus("x", "x")), [plus("y", "y")]);
    assert_snapshot!(
        inline_lambdas(e.clone(), &InlineOptions::default()),
        @"plus(plus(y, y), plus(y, y))"
    );
    assert_eq!(inline_lambdas(e.clone(), &InlineOptions::opcount_preserving()), e);
}

#[test]
fn tuple_get_of_make_tuple_collapses() {
    let e = tuple_get(0, make_tuple(["a", "b"]));
    let collapsed = collapse_tuple_expr(e, &cartesian(), false).unwrap();
    assert_snapshot!(collapsed, @"a");
}

#[test]
fn deref_stencil_reads_input_unshifted() {
    let trace = trace_shifts(&closure(sym_ref("deref"))).unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace["inp"], vec![Vec::<TracedOffset>::new()]);
}

#[test]
fn reduce_over_neighbors_reads_all_neighbors() {
    let stencil = lambda(["it"], call(reduce("plus", float64(0.0)), [neighbors("V2E", "it")]));
    let trace = trace_shifts(&closure(stencil)).unwrap();
    let [access] = trace["inp"].as_slice() else {
        panic!("expected one access, got {:?}", trace["inp"]);
    };
    assert_eq!(access.last(), Some(&TracedOffset::AllNeighbors));
}

#[test]
fn non_terminating_rewrite_hits_the_cap() {
    let cap = options().max_fixpoint_iterations;
    let mut applications = 0;
    let err = run_to_fixpoint("expanding", cap, program(sym_ref("deref")), |mut p| {
        applications += 1;
        let stencil = p.closures[0].stencil.clone();
        p.closures[0].stencil = lambda(["x"], call(stencil, ["x"]));
        Ok(p)
    })
    .unwrap_err();
    assert_eq!(applications, cap);
    assert!(matches!(
        err,
        PipelineError::NonConvergence { stage: "expanding", iterations, .. } if iterations == cap
    ));
}

// ── Properties ───────────────────────────────────────────────────────────

#[test]
fn inlining_avoids_capture() {
    let e = call(lambda(["x"], lambda(["y"], plus("x", "y"))), ["y"]);
    let inlined = inline_lambdas(e, &InlineOptions::default());
    assert_snapshot!(inlined, @"λ(y_) → plus(y, y_)");
}

#[test]
fn folding_is_idempotent() {
    let e = plus(int32(2), int32(3));
    let once = fold_constants(e);
    assert_snapshot!(once, @"5");
    assert_eq!(fold_constants(once.clone()), once);

    let mixed = multiplies(plus(int32(1), int32(1)), "x");
    let once = fold_constants(mixed);
    assert_eq!(fold_constants(once.clone()), once);
}

// ── Pipeline ─────────────────────────────────────────────────────────────

fn laplacian_like() -> Program {
    let diff = FunctionDefinition::new(
        "diff",
        vec![Sym::new("x")],
        minus(deref(shifted("x", 1)), deref("x")),
    );
    let unused = FunctionDefinition::new("unused", vec![Sym::new("z")], deref("z"));
    program(lambda(["it"], call("diff", ["it"]))).with_function_definitions(vec![diff, unused])
}

#[test]
fn function_definitions_are_inlined_and_pruned() {
    let result = apply_common_transforms(laplacian_like(), &cartesian(), &options()).unwrap();
    assert_snapshot!(result, @r"
    prog(inp, out, n) {
      out ← (λ(it) → minus(deref(shift(Iₒ, 1ₒ)(it)), deref(it)))(inp) @ cartesian_domain(named_range(IDimₐ, 0, n));
    }
    ");
}

#[test]
fn pipeline_is_idempotent() {
    let once = apply_common_transforms(laplacian_like(), &cartesian(), &options()).unwrap();
    let twice = apply_common_transforms(once.clone(), &cartesian(), &options()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn repeated_reads_are_shared() {
    let stencil = lambda(["it"], plus(deref(shifted("it", 1)), deref(shifted("it", 1))));
    let result = apply_common_transforms(program(stencil), &cartesian(), &options()).unwrap();
    assert_snapshot!(
        result.closures[0].stencil,
        @"λ(it) → (λ(_cs_0) → plus(_cs_0, _cs_0))(deref(shift(Iₒ, 1ₒ)(it)))"
    );

    let without = PipelineOptions {
        common_subexpression_elimination: false,
        ..options()
    };
    let stencil = lambda(["it"], plus(deref(shifted("it", 1)), deref(shifted("it", 1))));
    let result = apply_common_transforms(program(stencil.clone()), &cartesian(), &without).unwrap();
    assert_eq!(result.closures[0].stencil, stencil);
}

#[test]
fn constants_fold_inside_stencils() {
    let stencil = lambda(["it"], multiplies(deref("it"), plus(float64(1.0), float64(1.0))));
    let result = apply_common_transforms(program(stencil), &cartesian(), &options()).unwrap();
    assert_snapshot!(result.closures[0].stencil, @"λ(it) → multiplies(deref(it), 2.0)");
}

#[test]
fn field_operation_inputs_get_domains_and_fuse() {
    let square = as_fieldop(lambda(["x"], multiplies(deref("x"), deref("x"))), None);
    let negate = as_fieldop(lambda(["y"], minus(float64(0.0), deref("y"))), None);
    let input = call(negate, [call(square, ["inp"])]);
    let p = Program::new(
        "prog",
        typed_params(),
        vec![StencilClosure::new(
            cartesian_domain([named_range("IDim", int32(0), "n")]),
            lambda(["a"], deref(shifted("a", 1))),
            sym_ref("out"),
            vec![input],
        )
        .unwrap()],
    );
    let result = apply_common_transforms(p, &cartesian(), &options()).unwrap();
    assert_snapshot!(
        result.closures[0].inputs[0],
        @"as_fieldop(λ(__arg_0) → (λ(_cs_0) → minus(0.0, multiplies(_cs_0, _cs_0)))(deref(__arg_0)), cartesian_domain(named_range(IDimₐ, 1, plus(n, 1))))(inp)"
    );
}

#[test]
fn reductions_unroll_when_requested() {
    let params = vec![
        Sym::typed(
            "inp",
            TypeSpec::field(vec![Dimension::horizontal("Edge")], ScalarKind::Float64),
        ),
        Sym::typed(
            "out",
            TypeSpec::field(vec![Dimension::horizontal("Vertex")], ScalarKind::Float64),
        ),
        Sym::typed("n", TypeSpec::int32()),
    ];
    let stencil = lambda(
        ["it"],
        call(reduce(lambda(["acc", "v"], plus("acc", "v")), float64(0.0)), [neighbors("V2E", "it")]),
    );
    let p = Program::new(
        "prog",
        params,
        vec![StencilClosure::new(
            unstructured_domain([named_range("Vertex", int32(0), "n")]),
            stencil,
            sym_ref("out"),
            vec![sym_ref("inp")],
        )
        .unwrap()],
    );
    let unrolled = PipelineOptions {
        unroll_reduce: true,
        ..options()
    };
    let result = apply_common_transforms(p, &mesh(), &unrolled).unwrap();
    assert_snapshot!(
        result.closures[0].stencil,
        @"λ(it) → (λ(_step_0) → _step_0(_step_0(_step_0(0.0, 0ₒ), 1ₒ), 2ₒ))(λ(_acc_0, _i_0) → plus(_acc_0, list_get(_i_0, neighbors(V2Eₒ, it))))"
    );
}

#[test]
fn temporaries_are_extracted_from_typed_programs() {
    let square = lambda(["x"], multiplies(deref("x"), deref("x")));
    let stencil = lambda(
        ["a"],
        plus(
            deref(shifted(applied_lift(square.clone(), ["a"]), -1)),
            deref(shifted(applied_lift(square, ["a"]), 1)),
        ),
    );
    let with_temporaries = PipelineOptions {
        extract_temporaries: true,
        common_subexpression_elimination: false,
        ..options()
    };
    let result = apply_common_transforms(program(stencil), &cartesian(), &with_temporaries).unwrap();

    assert_eq!(result.temporaries.len(), 1);
    let tmp = &result.temporaries[0];
    assert_eq!(tmp.id, "__tmp_0");
    assert_eq!(tmp.dtype, TypeSpec::float64());
    assert_snapshot!(tmp.domain, @"cartesian_domain(named_range(IDimₐ, -1, plus(n, 1)))");

    assert_eq!(result.closures.len(), 2);
    assert_eq!(result.closures[0].output, sym_ref("__tmp_0"));
    assert_eq!(result.closures[1].inputs, vec![sym_ref("inp"), sym_ref("__tmp_0")]);
    assert!(!result.closures[1].stencil.to_string().contains("lift"));
}

#[test]
fn unknown_connectivity_size_fails_domain_inference() {
    let copy = as_fieldop(lambda(["x"], deref("x")), None);
    let p = Program::new(
        "prog",
        typed_params(),
        vec![StencilClosure::new(
            unstructured_domain([named_range("Vertex", int32(0), "n")]),
            lambda(["a"], call(reduce("plus", float64(0.0)), [neighbors("V2E", "a")])),
            sym_ref("out"),
            vec![call(copy, ["inp"])],
        )
        .unwrap()],
    );
    let err = apply_common_transforms(p.clone(), &mesh(), &options()).unwrap_err();
    assert!(matches!(err, PipelineError::TemporaryDomain(_)));

    let sized = PipelineOptions {
        symbolic_domain_sizes: Some(BTreeMap::from([("Edge".to_string(), "n_edges".to_string())])),
        ..options()
    };
    let result = apply_common_transforms(p, &mesh(), &sized).unwrap();
    assert_snapshot!(
        result.closures[0].inputs[0],
        @"as_fieldop(λ(x) → deref(x), unstructured_domain(named_range(Edgeₐ, 0, n_edges)))(inp)"
    );
}

#[test]
fn names_are_deterministic() {
    let mut a = UidGenerator::new("_cs");
    let mut b = UidGenerator::new("_cs");
    let stencil = lambda(["it"], plus(deref(shifted("it", 1)), deref(shifted("it", 1))));
    let p = program(stencil);
    let left = itir_transforms::cse::cse(p.clone(), &mut a);
    let right = itir_transforms::cse::cse(p, &mut b);
    assert_eq!(left.to_string(), right.to_string());
}
