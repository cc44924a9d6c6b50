//! Inline top-level function definitions and drop the ones nobody uses.

use rustc_hash::{FxHashMap, FxHashSet};

use itir_ir::ir::{Expr, Program};
use itir_ir::symbols::{free_symbols, substitute};

/// Replace every reference to a function definition by its lambda.
///
/// Definitions may use earlier definitions; those uses are inlined first,
/// so the substituted lambdas are closed over builtins only.
pub fn inline_fundefs(mut program: Program) -> Program {
    let mut lambdas: FxHashMap<String, Expr> = FxHashMap::default();
    for def in &mut program.function_definitions {
        let body = std::mem::replace(&mut def.body, Expr::from(""));
        def.body = substitute(body, &lambdas);
        lambdas.insert(def.id.clone(), def.to_lambda());
    }

    let defs = std::mem::take(&mut program.function_definitions);
    let mut program = program.map_exprs(|e| substitute(e, &lambdas));
    program.function_definitions = defs;
    program
}

/// Remove function definitions not reachable from any closure or temporary.
pub fn prune_unreferenced_fundefs(mut program: Program) -> Program {
    let mut live: FxHashSet<String> = FxHashSet::default();
    let mut worklist: Vec<String> = Vec::new();
    let mut roots = Vec::new();
    for tmp in &program.temporaries {
        roots.push(&tmp.domain);
    }
    for closure in &program.closures {
        roots.push(&closure.domain);
        roots.push(&closure.stencil);
        roots.extend(&closure.inputs);
    }
    for root in roots {
        worklist.extend(free_symbols(root));
    }

    while let Some(name) = worklist.pop() {
        if !live.insert(name.clone()) {
            continue;
        }
        if let Some(def) = program.function_definition(&name) {
            let mut free = free_symbols(&def.body);
            for param in &def.params {
                free.remove(&param.id);
            }
            worklist.extend(free.into_iter().filter(|n| !live.contains(n)));
        }
    }

    program
        .function_definitions
        .retain(|def| live.contains(&def.id));
    program
}
