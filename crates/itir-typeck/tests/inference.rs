use insta::assert_snapshot;
use rustc_hash::FxHashMap;

use itir_common::dimension::{Connectivity, Dimension, OffsetProvider};
use itir_common::ty::{PositionDims, ScalarKind, TypeSpec};
use itir_ir::ir::{Expr, FunctionDefinition, Program, StencilClosure, Sym};
use itir_ir::make::*;
use itir_typeck::{infer, infer_expr, InferError, InvariantViolation, TypeErrorKind};

// ── Helpers ──────────────────────────────────────────────────────────────

fn idim() -> Dimension {
    Dimension::horizontal("IDim")
}

fn vertex() -> Dimension {
    Dimension::horizontal("Vertex")
}

fn edge() -> Dimension {
    Dimension::horizontal("Edge")
}

fn float_field(dim: Dimension) -> TypeSpec {
    TypeSpec::field(vec![dim], ScalarKind::Float64)
}

fn cartesian() -> OffsetProvider {
    OffsetProvider::new().with_dimension("I", idim())
}

fn mesh() -> OffsetProvider {
    OffsetProvider::new().with_connectivity(
        "V2E",
        Connectivity {
            origin_axis: vertex(),
            neighbor_axis: edge(),
            max_neighbors: 4,
            has_skip_values: false,
        },
    )
}

fn single_closure(stencil: Expr, domain: Expr, params: Vec<Sym>) -> Program {
    let closure =
        StencilClosure::new(domain, stencil, sym_ref("out"), vec![sym_ref("inp")]).unwrap();
    Program::new("prog", params, vec![closure])
}

fn cartesian_program(stencil: Expr) -> Program {
    single_closure(
        stencil,
        cartesian_domain([named_range("IDim", int32(0), "n")]),
        vec![
            Sym::typed("inp", float_field(idim())),
            Sym::typed("out", float_field(idim())),
            Sym::typed("n", TypeSpec::int32()),
        ],
    )
}

fn bindings(items: &[(&str, TypeSpec)]) -> FxHashMap<String, TypeSpec> {
    items
        .iter()
        .map(|(name, ty)| (name.to_string(), ty.clone()))
        .collect()
}

fn type_of(expr: &Expr) -> String {
    expr.ty
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<untyped>".to_string())
}

fn lambda_body(expr: &Expr) -> &Expr {
    expr.as_lambda().unwrap().1
}

fn error_kind(err: InferError) -> TypeErrorKind {
    err.as_type_error().unwrap().kind.clone()
}

fn infer_alone(expr: &Expr, env: &[(&str, TypeSpec)]) -> Result<Expr, InferError> {
    infer_expr(expr, &mesh(), &bindings(env), false)
}

// ── Programs ─────────────────────────────────────────────────────────────

#[test]
fn deref_stencil_closure() {
    let program = cartesian_program(lambda(["it"], deref("it")));
    let typed = infer(&program, &cartesian(), false).unwrap();

    let stencil = &typed.closures[0].stencil;
    assert_snapshot!(type_of(stencil), @"(It[[IDim], [IDim], float64]) -> float64");
    assert_snapshot!(type_of(lambda_body(stencil)), @"float64");
    assert_snapshot!(type_of(&typed.closures[0].domain), @"Domain[IDim]");
    assert!(matches!(typed.ty, Some(TypeSpec::Program(_))));
    assert!(matches!(typed.closures[0].ty, Some(TypeSpec::StencilClosure(_))));
}

#[test]
fn parameters_receive_iterator_types() {
    let program = cartesian_program(lambda(["it"], deref("it")));
    let typed = infer(&program, &cartesian(), false).unwrap();

    let (params, _) = typed.closures[0].stencil.as_lambda().unwrap();
    assert_snapshot!(params[0].ty.as_ref().unwrap().to_string(), @"It[[IDim], [IDim], float64]");
}

#[test]
fn function_definition_typed_at_first_call() {
    let program = cartesian_program(lambda(
        ["it"],
        call("f", [shift([offset("I"), offset_int(1)], "it")]),
    ))
    .with_function_definitions(vec![FunctionDefinition::new(
        "f",
        vec![Sym::new("x")],
        deref("x"),
    )]);
    let typed = infer(&program, &cartesian(), false).unwrap();

    let def = &typed.function_definitions[0];
    assert_snapshot!(
        def.ty.as_ref().unwrap().to_string(),
        @"(It[[IDim], [IDim], float64]) -> float64"
    );
    assert_snapshot!(type_of(&def.body), @"float64");
}

#[test]
fn connectivity_shift_moves_position() {
    let program = single_closure(
        lambda(["it"], deref(shift([offset("V2E"), offset_int(0)], "it"))),
        unstructured_domain([named_range("Vertex", int32(0), "n")]),
        vec![
            Sym::typed("inp", float_field(edge())),
            Sym::typed("out", float_field(vertex())),
            Sym::typed("n", TypeSpec::int32()),
        ],
    );
    let typed = infer(&program, &mesh(), false).unwrap();

    let (_, shifted) = lambda_body(&typed.closures[0].stencil).as_fun_call().unwrap();
    assert_snapshot!(type_of(&shifted[0]), @"It[[Edge], [Edge], float64]");
}

#[test]
fn inference_is_idempotent() {
    let program = cartesian_program(lambda(
        ["it"],
        plus(deref("it"), deref(shift([offset("I"), offset_int(1)], "it"))),
    ));
    let once = infer(&program, &cartesian(), false).unwrap();
    let twice = infer(&once, &cartesian(), false).unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.closures[0].stencil.ty, twice.closures[0].stencil.ty);
    assert_eq!(once.closures[0].ty, twice.closures[0].ty);
}

#[test]
fn untyped_program_parameter_is_rejected() {
    let program = single_closure(
        lambda(["it"], deref("it")),
        cartesian_domain([named_range("IDim", int32(0), int32(10))]),
        vec![Sym::new("inp"), Sym::typed("out", float_field(idim()))],
    );
    let err = infer(&program, &cartesian(), false).unwrap_err();
    assert_eq!(error_kind(err), TypeErrorKind::UntypedParameter("inp".to_string()));
}

// ── Expressions ──────────────────────────────────────────────────────────

#[test]
fn non_boolean_condition() {
    let err = infer_alone(&if_(int32(1), int32(2), int32(3)), &[]).unwrap_err();
    assert_eq!(error_kind(err), TypeErrorKind::NonBooleanCondition(TypeSpec::int32()));
}

#[test]
fn tuple_index_out_of_range() {
    let expr = tuple_get(2, make_tuple([int32(1), int32(2)]));
    let err = infer_alone(&expr, &[]).unwrap_err();
    assert_eq!(
        error_kind(err),
        TypeErrorKind::TupleIndexOutOfRange { index: 2, len: 2 }
    );
}

#[test]
fn retyping_a_node_is_an_invariant_violation() {
    let expr = plus(int32(1).with_type(TypeSpec::float64()), int32(2));
    let err = infer_alone(&expr, &[]).unwrap_err();
    assert!(matches!(
        err,
        InferError::Invariant(InvariantViolation::IncompatibleRetype { .. })
    ));
}

#[test]
fn let_bound_lambda_is_polymorphic() {
    let expr = let_(
        "f",
        lambda(["x"], "x"),
        make_tuple([call("f", [int32(1)]), call("f", [float64(1.0)])]),
    );
    let typed = infer_alone(&expr, &[]).unwrap();
    assert_snapshot!(type_of(&typed), @"tuple[int32, float64]");
}

#[test]
fn lambda_first_called_from_reinstantiated_body_is_typed() {
    // `f` is only ever called inside the second instantiation of `g`
    let expr = let_(
        "g",
        lambda(["h", "y"], call("h", ["y"])),
        let_(
            "f",
            lambda(["z"], deref("z")),
            make_tuple([
                call("g", [lambda(["w"], deref("w")), sym_ref("a")]),
                call("g", [sym_ref("f"), sym_ref("b")]),
            ]),
        ),
    );
    let it = TypeSpec::iterator(PositionDims::Known(vec![vertex()]), vec![vertex()], TypeSpec::float64());
    let typed = infer_alone(&expr, &[("a", it.clone()), ("b", it)]).unwrap();

    let (outer, _) = typed.as_fun_call().unwrap();
    let (_, f_args) = lambda_body(outer).as_fun_call().unwrap();
    let f = &f_args[0];
    assert_snapshot!(type_of(f), @"(It[[Vertex], [Vertex], float64]) -> float64");
    assert_snapshot!(type_of(lambda_body(f)), @"float64");
    let (params, _) = f.as_lambda().unwrap();
    assert_snapshot!(params[0].ty.as_ref().unwrap().to_string(), @"It[[Vertex], [Vertex], float64]");
}

#[test]
fn operand_types_must_agree() {
    let expr = plus("a", "b");
    let typed = infer_alone(&expr, &[("a", TypeSpec::int32()), ("b", TypeSpec::int32())]).unwrap();
    assert_snapshot!(type_of(&typed), @"int32");

    let err = infer_alone(&expr, &[("a", TypeSpec::int32()), ("b", TypeSpec::float64())])
        .unwrap_err();
    assert!(matches!(error_kind(err), TypeErrorKind::OperandMismatch { op: "plus", .. }));
}

#[test]
fn applied_lift_keeps_position() {
    let it = TypeSpec::iterator(
        PositionDims::Known(vec![vertex()]),
        vec![vertex()],
        TypeSpec::float64(),
    );
    let expr = applied_lift(lambda(["x"], deref("x")), ["it"]);
    let typed = infer_alone(&expr, &[("it", it)]).unwrap();
    assert_snapshot!(type_of(&typed), @"It[[Vertex], [Vertex], float64]");
}

#[test]
fn reduce_over_neighbors() {
    let it = TypeSpec::iterator(
        PositionDims::Known(vec![vertex()]),
        vec![edge()],
        TypeSpec::float64(),
    );
    let nbs = neighbors("V2E", "it");
    let expr = call(reduce("plus", float64(0.0)), [nbs]);
    let typed = infer_alone(&expr, &[("it", it)]).unwrap();

    assert_snapshot!(type_of(&typed), @"float64");
    let (_, args) = typed.as_fun_call().unwrap();
    assert_snapshot!(type_of(&args[0]), @"list[float64]");
}

#[test]
fn neighbors_requires_origin_position() {
    let it = TypeSpec::iterator(PositionDims::Known(vec![edge()]), vec![edge()], TypeSpec::float64());
    let err = infer_alone(&neighbors("V2E", "it"), &[("it", it)]).unwrap_err();
    assert!(matches!(error_kind(err), TypeErrorKind::InvalidShift { .. }));
}

#[test]
fn reduce_result_must_match_init() {
    let it = TypeSpec::iterator(PositionDims::Known(vec![vertex()]), vec![edge()], TypeSpec::float64());
    let expr = call(
        reduce(lambda(["acc", "x"], call("less", ["acc", "x"])), float64(0.0)),
        [neighbors("V2E", "it")],
    );
    let err = infer_alone(&expr, &[("it", it)]).unwrap_err();
    assert_eq!(
        error_kind(err),
        TypeErrorKind::ReduceMismatch {
            init: TypeSpec::float64(),
            result: TypeSpec::bool()
        }
    );
}

#[test]
fn as_fieldop_produces_field() {
    let expr = call(
        as_fieldop(
            lambda(["x"], deref("x")),
            Some(unstructured_domain([named_range("Edge", int32(0), int32(10))])),
        ),
        ["inp"],
    );
    let typed = infer_alone(&expr, &[("inp", float_field(edge()))]).unwrap();
    assert_snapshot!(type_of(&typed), @"Field[[Edge], float64]");
}

#[test]
fn unpaired_shift_offsets() {
    let it = TypeSpec::iterator(PositionDims::Known(vec![vertex()]), vec![], TypeSpec::float64());
    let err = infer_alone(&shift([offset("V2E")], "it"), &[("it", it)]).unwrap_err();
    assert_eq!(error_kind(err), TypeErrorKind::UnpairedShift(1));
}

#[test]
fn undeclared_symbols() {
    let expr = plus("a", int32(1));
    let err = infer_alone(&expr, &[]).unwrap_err();
    assert_eq!(error_kind(err), TypeErrorKind::UndeclaredSymbol("a".to_string()));

    let typed = infer_expr(&expr, &mesh(), &FxHashMap::default(), true).unwrap();
    assert_eq!(typed.ty, None);
}

#[test]
fn cast_uses_type_constructor() {
    let typed = infer_alone(&cast_(int32(1), ScalarKind::Float64), &[]).unwrap();
    assert_snapshot!(type_of(&typed), @"float64");
}
