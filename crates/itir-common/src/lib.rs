//! Shared leaf types for the iterator IR compiler.
//!
//! Everything here is plain data: source locations, dimensions and the
//! offset provider, the resolved type specifications, and the fresh-name
//! generator. The IR, the type checker, and the passes all build on it.

pub mod dimension;
pub mod span;
pub mod ty;
pub mod uid;

pub use dimension::{Connectivity, Dimension, DimensionKind, OffsetProvider, OffsetProviderEntry};
pub use span::SourceLocation;
pub use ty::{
    DomainType, FieldType, FunctionType, IteratorType, OffsetLiteralType, PositionDims,
    ProgramType, ScalarKind, StencilClosureType, TypeSpec,
};
pub use uid::UidGenerator;
