//! Operator entry points built on the concat compiler.

pub mod concat;

pub use concat::{concat_nhwc_reference, ConcatOp, Element};
