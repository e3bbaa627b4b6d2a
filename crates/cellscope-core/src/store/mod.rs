//! Persistence for caller-reviewed hints.

pub mod hints;
pub mod schema;

pub use hints::{HintStore, MemoryHintStore, SqliteHintStore};
