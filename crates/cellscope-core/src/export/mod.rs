//! RO-Crate bundle export: metadata, graph exchange, and graph view.

pub mod crate_builder;
pub mod graphml;
pub mod jsonld;
pub mod sidecar;
pub mod validate;
pub mod visualize;

pub use crate_builder::{open_bundle, Bundle, CrateBuilder, VisualizationStatus};
pub use sidecar::{load_sidecars, validate_sidecars, Sidecar};
pub use validate::{validate_crate, ValidationReport};
