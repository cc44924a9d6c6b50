//! Type inference for iterator IR programs.
//!
//! [`infer`] annotates every node of a program with its [`TypeSpec`]:
//! literals, references, lambdas and their parameters, calls, function
//! definitions and stencil closures. Function values are typed lazily
//! (see [`cell`]): a lambda gets the signature of its first call whose
//! argument and result types are all known.
//!
//! [`TypeSpec`]: itir_common::ty::TypeSpec

pub mod cell;
pub mod error;
mod infer;
mod rules;

pub use error::{InferError, InvariantViolation, TypeError, TypeErrorKind};
pub use infer::{infer, infer_expr};
