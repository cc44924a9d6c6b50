//! The iterator IR: a point-free functional representation of stencil
//! programs.
//!
//! - [`ir`]: the node model
//! - [`builtins`]: the implicitly declared builtin functions
//! - [`pattern`]: structural predicates for canonical shapes
//! - [`symbols`]: free symbols, reference counting, substitution
//! - [`make`]: terse constructors
//! - [`visit`]: traversal helpers
//! - [`pretty`]: `Display` implementations

pub mod builtins;
pub mod ir;
pub mod make;
pub mod pattern;
pub mod pretty;
pub mod symbols;
pub mod visit;

pub use builtins::Builtin;
pub use ir::{
    Expr, ExprKind, FunctionDefinition, MalformedClosure, OffsetValue, Program, StencilClosure,
    Sym, Temporary,
};
