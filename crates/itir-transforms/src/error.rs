//! Pipeline errors.

use itir_typeck::InferError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Infer(#[from] InferError),
    /// A bounded fixpoint loop used up its iteration budget.
    #[error("{stage} did not converge within {iterations} iterations; last program:\n{last_program}")]
    NonConvergence {
        stage: &'static str,
        iterations: usize,
        /// The program produced by the last iteration, pretty-printed.
        last_program: String,
    },
    /// A pass found a tree an earlier pass should never have produced.
    #[error("internal error: {0}")]
    Invariant(String),
    #[error("cannot infer domain: {0}")]
    TemporaryDomain(String),
}
