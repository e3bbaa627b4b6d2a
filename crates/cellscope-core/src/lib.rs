//! CellScope core library: cell-level provenance for computational notebooks.
//!
//! The pipeline analyzes each code cell for the names and files it defines
//! and consumes, infers a dependency graph across cells, and exports the
//! graph as an RO-Crate bundle plus a SPARQL `INSERT DATA` delta that can be
//! pushed to a triple store. With the `python` feature the crate also builds
//! as the `_cellscope_core` extension module.

pub mod analyzer;
pub mod config;
pub mod errors;
pub mod export;
pub mod graph;
pub mod index;
pub mod models;
pub mod notebook;
pub mod pipeline;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use analyzer::{CellAnalyzer, KernelParser, KernelRegistry};
pub use config::{Credential, ExportOptions, PushConfig};
pub use errors::{AnalysisError, CellscopeError, CellscopeResult};
pub use export::{
    load_sidecars, open_bundle, validate_crate, Bundle, CrateBuilder, Sidecar, ValidationReport,
    VisualizationStatus,
};
pub use graph::{infer, merge, AnnotatedGraph};
pub use index::{index_bundle, DeltaPusher, IndexReport, Triple};
pub use models::{Cell, CellFacts, Edge, EdgeKind, Graph, PushErrorKind, PushResult, ReviewHints};
pub use notebook::{load_notebook, parse_notebook, Notebook};
pub use pipeline::{analyze, analyze_source, export, index_crate, ExportReport};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _cellscope_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)
}
