//! End-to-end tests for the `itirc` binary.

use std::path::Path;
use std::process::{Command, Output};

const PROGRAM_JSON: &str = r#"{
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

const OFFSET_PROVIDER_JSON: &str = r#"{"I": {"dimension": {"value": "IDim"}}}"#;

// ── Helpers ──────────────────────────────────────────────────────────────

fn itirc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_itirc"))
        .args(args)
        .output()
        .expect("failed to run itirc")
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[test]
fn transform_prints_rewritten_program() {
    let dir = tempfile::tempdir().unwrap();
    let program = write(dir.path(), "lap.json", PROGRAM_JSON);
    let provider = write(dir.path(), "offsets.json", OFFSET_PROVIDER_JSON);

    let output = itirc(&["transform", &program, "--offset-provider", &provider]);
    assert!(
        output.status.success(),
        "itirc transform failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim_end(),
        "lap(inp, out, n) {\n  out ← (λ(x) → minus(deref(shift(Iₒ, 1ₒ)(x)), deref(x)))(inp) @ cartesian_domain(named_range(IDimₐ, 0, n));\n}"
    );
}

#[test]
fn transform_json_output_parses_back() {
    let dir = tempfile::tempdir().unwrap();
    let program = write(dir.path(), "lap.json", PROGRAM_JSON);
    let provider = write(dir.path(), "offsets.json", OFFSET_PROVIDER_JSON);

    let output = itirc(&["transform", &program, "--offset-provider", &provider, "--json"]);
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["id"], "lap");
    assert_eq!(value["function_definitions"].as_array().map(Vec::len), Some(0));
}

#[test]
fn options_file_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let program = write(dir.path(), "lap.json", PROGRAM_JSON);
    let options = write(dir.path(), "options.toml", "lift_mode = \"force\"\n");

    let output = itirc(&["transform", &program, "--options", &options]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid options"));
}

#[test]
fn infer_reports_type_errors() {
    let dir = tempfile::tempdir().unwrap();
    let program = write(dir.path(), "lap.json", PROGRAM_JSON);

    // without an offset provider, `I` names no dimension
    let output = itirc(&["infer", &program]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error:"));
}

#[test]
fn missing_program_fails() {
    let output = itirc(&["transform", "/nonexistent/program.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read"));
}
