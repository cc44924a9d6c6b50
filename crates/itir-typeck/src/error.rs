//! Type inference errors.
//!
//! Two classes: [`TypeError`] for programs that do not type-check (a user
//! mistake surfaced with the offending node), and [`InvariantViolation`]
//! for states an earlier compiler pass should never have produced.

use itir_common::span::SourceLocation;
use itir_common::ty::TypeSpec;

/// What went wrong in a [`TypeError`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeErrorKind {
    #[error("symbol `{0}` is not declared")]
    UndeclaredSymbol(String),
    #[error("dimension `{0}` not present in offset provider")]
    DimensionNotFound(String),
    #[error("offset `{0}` not present in offset provider")]
    OffsetNotFound(String),
    #[error("expected {expected}, found `{found}`")]
    Expected { expected: &'static str, found: TypeSpec },
    #[error("expected a value, found a function")]
    FunctionAsValue,
    #[error("`{0}` is not callable")]
    NotCallable(TypeSpec),
    #[error("expected {expected} argument(s), found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("mismatched operand types for `{op}`: `{left}` and `{right}`")]
    OperandMismatch {
        op: &'static str,
        left: TypeSpec,
        right: TypeSpec,
    },
    #[error("condition must be `bool`, found `{0}`")]
    NonBooleanCondition(TypeSpec),
    #[error("branches have different types: `{then}` and `{otherwise}`")]
    BranchMismatch { then: TypeSpec, otherwise: TypeSpec },
    #[error("tuple index {index} out of range for tuple of size {len}")]
    TupleIndexOutOfRange { index: usize, len: usize },
    #[error("tuple index must be an integer literal")]
    TupleIndexNotLiteral,
    #[error("`{0}` is not a type builtin")]
    UnknownTypeBuiltin(String),
    #[error("shift offsets must come in tag/index pairs, found {0} offset(s)")]
    UnpairedShift(usize),
    #[error("cannot shift by `{offset}` from position [{position}]")]
    InvalidShift { offset: String, position: String },
    #[error("reduction returns `{result}` but its initial value is `{init}`")]
    ReduceMismatch { init: TypeSpec, result: TypeSpec },
    #[error("program parameter `{0}` has no declared type")]
    UntypedParameter(String),
    #[error("closure field `{0}` must be a field type")]
    ExpectedField(TypeSpec),
    #[error("fields with several local dimensions are not supported: `{0}`")]
    MultipleLocalDimensions(TypeSpec),
    #[error("tuple fields must share their dimensions: `{0}`")]
    MismatchedTupleDimensions(TypeSpec),
}

/// A program that does not type-check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}{kind} in `{node}`", .location.as_ref().map(|l| format!("{}: ", l)).unwrap_or_default())]
pub struct TypeError {
    pub kind: TypeErrorKind,
    /// The offending node, pretty-printed.
    pub node: String,
    pub location: Option<SourceLocation>,
}

/// An internal-consistency failure: a bug in the pass that produced the tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("node `{node}` already has type `{existing}`, cannot retype it to `{proposed}`")]
    IncompatibleRetype {
        node: String,
        existing: TypeSpec,
        proposed: TypeSpec,
    },
    #[error("cyclic type dependency through `{node}`")]
    CyclicDependency { node: String },
    #[error(transparent)]
    MalformedClosure(#[from] itir_ir::MalformedClosure),
    #[error("function definition `{0}` must be inlined before this stage")]
    UninlinedFunctionDefinition(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferError {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("internal error: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl InferError {
    pub fn as_type_error(&self) -> Option<&TypeError> {
        match self {
            InferError::Type(err) => Some(err),
            InferError::Invariant(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_error_display_with_location() {
        let err = TypeError {
            kind: TypeErrorKind::NonBooleanCondition(TypeSpec::int32()),
            node: "if_(a, b, c)".to_string(),
            location: Some(SourceLocation::new("k.py", 4, 9)),
        };
        assert_eq!(
            err.to_string(),
            "k.py:4:9: condition must be `bool`, found `int32` in `if_(a, b, c)`"
        );
    }

    #[test]
    fn type_error_display_without_location() {
        let err = TypeError {
            kind: TypeErrorKind::TupleIndexOutOfRange { index: 2, len: 2 },
            node: "tuple_get(2, t)".to_string(),
            location: None,
        };
        assert_eq!(
            err.to_string(),
            "tuple index 2 out of range for tuple of size 2 in `tuple_get(2, t)`"
        );
    }
}
