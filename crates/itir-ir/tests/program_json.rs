use insta::assert_snapshot;
use rustc_hash::FxHashMap;

use itir_ir::ir::{Expr, Program};
use itir_ir::make::*;
use itir_ir::symbols::{count_symbol_refs, free_symbols, substitute};

// ── Helpers ──────────────────────────────────────────────────────────────

const LAPLACE_JSON: &str = r#"{
    "id": "lap",
    "params": [
        {"id": "inp", "ty": {"field": {"dims": [{"value": "IDim"}], "dtype": "float64"}}},
        {"id": "out", "ty": {"field": {"dims": [{"value": "IDim"}], "dtype": "float64"}}},
        {"id": "n", "ty": {"scalar": "int32"}}
    ],
    "function_definitions": [
        {
            "id": "diff",
            "params": [{"id": "x"}],
            "body": {
                "node": "fun_call",
                "fun": {"node": "sym_ref", "id": "minus"},
                "args": [
                    {
                        "node": "fun_call",
                        "fun": {"node": "sym_ref", "id": "deref"},
                        "args": [
                            {
                                "node": "fun_call",
                                "fun": {
                                    "node": "fun_call",
                                    "fun": {"node": "sym_ref", "id": "shift"},
                                    "args": [
                                        {"node": "offset_literal", "value": "I"},
                                        {"node": "offset_literal", "value": 1}
                                    ]
                                },
                                "args": [{"node": "sym_ref", "id": "x"}]
                            }
                        ]
                    },
                    {
                        "node": "fun_call",
                        "fun": {"node": "sym_ref", "id": "deref"},
                        "args": [{"node": "sym_ref", "id": "x"}]
                    }
                ]
            }
        }
    ],
    "closures": [
        {
            "domain": {
                "node": "fun_call",
                "fun": {"node": "sym_ref", "id": "cartesian_domain"},
                "args": [
                    {
                        "node": "fun_call",
                        "fun": {"node": "sym_ref", "id": "named_range"},
                        "args": [
                            {"node": "axis_literal", "value": "IDim"},
                            {"node": "literal", "value": "0", "kind": "int32"},
                            {"node": "sym_ref", "id": "n"}
                        ]
                    }
                ]
            },
            "stencil": {"node": "sym_ref", "id": "diff"},
            "output": {"node": "sym_ref", "id": "out"},
            "inputs": [{"node": "sym_ref", "id": "inp"}]
        }
    ]
}"#;

fn laplace() -> Program {
    serde_json::from_str(LAPLACE_JSON).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[test]
fn program_from_json() {
    assert_snapshot!(laplace(), @r"
    lap(inp, out, n) {
      diff = λ(x) → minus(deref(shift(Iₒ, 1ₒ)(x)), deref(x));
      out ← (diff)(inp) @ cartesian_domain(named_range(IDimₐ, 0, n));
    }
    ");
}

#[test]
fn json_round_trip_preserves_structure() {
    let program = laplace();
    let json = serde_json::to_string(&program).unwrap();
    let back: Program = serde_json::from_str(&json).unwrap();
    assert_eq!(program, back);
    assert_eq!(program.params[2].ty, back.params[2].ty);
}

#[test]
fn fundef_body_free_symbols() {
    let program = laplace();
    let body = &program.function_definition("diff").unwrap().body;
    let mut free: Vec<_> = free_symbols(body).into_iter().collect();
    free.sort();
    assert_eq!(free, ["deref", "minus", "shift", "x"]);
}

#[test]
fn substitution_respects_shadowing() {
    // x is rebound by the inner lambda, so only the outer reference changes
    let expr = plus("x", call(lambda(["x"], "x"), [int32(1)]));
    let map: FxHashMap<String, Expr> = [("x".to_string(), sym_ref("y"))].into_iter().collect();
    assert_snapshot!(substitute(expr, &map), @"plus(y, (λ(x) → x)(1))");
}

#[test]
fn reference_counts_skip_shadowed_uses() {
    let expr = plus("a", call(lambda(["a"], plus("a", "b")), ["a"]));
    let counts = count_symbol_refs(&expr, &["a", "b"]);
    assert_eq!(counts["a"], 2);
    assert_eq!(counts["b"], 1);
}
