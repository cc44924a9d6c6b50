//! Pipeline configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use itir_ir::ir::{Expr, StencilClosure};

/// Decides whether an applied `lift` inside a closure is materialized into
/// a temporary. Receives the closure and the candidate lift expression.
#[derive(Clone)]
pub struct TemporaryHeuristic(pub Rc<dyn Fn(&StencilClosure, &Expr) -> bool>);

impl TemporaryHeuristic {
    pub fn new(f: impl Fn(&StencilClosure, &Expr) -> bool + 'static) -> Self {
        TemporaryHeuristic(Rc::new(f))
    }

    /// Whether `lift` should become a temporary.
    pub fn should_extract(&self, closure: &StencilClosure, lift: &Expr) -> bool {
        (self.0)(closure, lift)
    }
}

impl fmt::Debug for TemporaryHeuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TemporaryHeuristic(..)")
    }
}

/// Knobs of [`apply_common_transforms`](crate::apply_common_transforms).
///
/// Deserializes from a flat table; missing keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    pub extract_temporaries: bool,
    pub unroll_reduce: bool,
    pub common_subexpression_elimination: bool,
    pub force_inline_lambda_args: bool,
    pub unconditionally_collapse_tuples: bool,
    /// Size expressions for dimensions whose extent domain inference cannot
    /// derive, e.g. `Edge = "num_edges"`.
    pub symbolic_domain_sizes: Option<BTreeMap<String, String>>,
    pub max_fixpoint_iterations: usize,
    #[serde(skip)]
    pub temporary_extraction_heuristic: Option<TemporaryHeuristic>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            extract_temporaries: false,
            unroll_reduce: false,
            common_subexpression_elimination: true,
            force_inline_lambda_args: false,
            unconditionally_collapse_tuples: false,
            symbolic_domain_sizes: None,
            max_fixpoint_iterations: 10,
            temporary_extraction_heuristic: None,
        }
    }
}
