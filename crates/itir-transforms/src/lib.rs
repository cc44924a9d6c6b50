//! Rewrite passes over the iterator IR and the pipeline that drives them.
//!
//! Every pass is a pure function from a tree to a tree. Passes that invent
//! names take a [`UidGenerator`](itir_common::uid::UidGenerator), and passes
//! that need to know what an offset means take the
//! [`OffsetProvider`](itir_common::dimension::OffsetProvider).
//!
//! [`apply_common_transforms`] is the entry point used by the compiler
//! driver; the individual passes are public for testing and for backends
//! that assemble their own pipeline.

pub mod collapse_list_get;
pub mod collapse_tuple;
pub mod constant_folding;
pub mod cse;
pub mod error;
pub mod fuse_as_fieldop;
pub mod fuse_maps;
pub mod global_tmps;
pub mod infer_domain;
pub mod inline_fundefs;
pub mod inline_lambdas;
pub mod inline_lifts;
pub mod merge_let;
pub mod normalize_shifts;
pub mod options;
pub mod pass_manager;
pub mod trace_shifts;
pub mod unroll_reduce;

pub use error::PipelineError;
pub use options::{PipelineOptions, TemporaryHeuristic};
pub use pass_manager::{apply_common_transforms, run_to_fixpoint};
