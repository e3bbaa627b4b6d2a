//! Provenance graph construction and hint projection.

pub mod hints;
pub mod inference;

pub use hints::{merge, AnnotatedGraph};
pub use inference::infer;
