//! End-to-end orchestration: analyze → infer → merge → build → flatten → push.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::analyzer::CellAnalyzer;
use crate::config::ExportOptions;
use crate::errors::CellscopeResult;
use crate::export::{open_bundle, validate_sidecars, CrateBuilder, VisualizationStatus};
use crate::graph::{infer, merge};
use crate::index::{index_bundle_with, DeltaPusher, IndexReport};
use crate::models::{Graph, ReviewHints};
use crate::notebook::{load_notebook, parse_notebook, Notebook};
use crate::store::HintStore;

/// Result of one `export` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportReport {
    #[serde(rename = "crate")]
    pub crate_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexReport>,
    pub visualization: VisualizationStatus,
}

impl ExportReport {
    pub fn to_json(&self) -> CellscopeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn analyze_notebook(notebook: &Notebook, analyzer: &CellAnalyzer) -> Graph {
    infer(analyzer.analyze_cells(&notebook.cells))
}

/// Analyze the notebook at `path` into its dependency graph.
pub fn analyze(path: &Path) -> CellscopeResult<Graph> {
    let started = Instant::now();
    let notebook = load_notebook(path)?;
    let graph = analyze_notebook(&notebook, &CellAnalyzer::new());
    info!(
        notebook = %path.display(),
        cells = graph.cells().len(),
        edges = graph.edges().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analyzed notebook"
    );
    Ok(graph)
}

/// Analyze notebook JSON held in memory.
pub fn analyze_source(payload: &str) -> CellscopeResult<Graph> {
    let notebook = parse_notebook(payload)?;
    Ok(analyze_notebook(&notebook, &CellAnalyzer::new()))
}

/// Export a notebook as a provenance bundle and index it.
pub fn export(
    path: &Path,
    out_dir: &Path,
    hints: Option<&str>,
    options: &ExportOptions,
) -> CellscopeResult<ExportReport> {
    export_with_pusher(path, out_dir, hints, options, &DeltaPusher::default())
}

pub fn export_with_pusher(
    path: &Path,
    out_dir: &Path,
    hints: Option<&str>,
    options: &ExportOptions,
    pusher: &DeltaPusher,
) -> CellscopeResult<ExportReport> {
    let started = Instant::now();

    // Inputs are checked before anything touches the output directory.
    let hints = match hints {
        Some(payload) => ReviewHints::from_json(payload)?,
        None => ReviewHints::default(),
    };
    options.push.validate()?;
    validate_sidecars(&options.sidecars)?;
    let notebook = load_notebook(path)?;

    let analyzer = CellAnalyzer::new().with_aliases(options.aliases.clone());
    let graph = analyze_notebook(&notebook, &analyzer);
    let annotated = merge(&graph, &hints);

    let mut builder = CrateBuilder::new()
        .with_notebook_dir(notebook.directory().map(Path::to_path_buf))
        .with_name(notebook.name())
        .with_sidecars(options.sidecars.clone());
    if !options.visualize {
        builder = builder.with_renderer(None);
    }
    let bundle = builder.build(&annotated, out_dir)?;

    let index = if options.skip_index {
        None
    } else {
        Some(index_bundle_with(&bundle, options, pusher)?)
    };

    info!(
        notebook = %path.display(),
        crate_dir = %bundle.crate_dir.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "export complete"
    );
    Ok(ExportReport {
        crate_dir: bundle.crate_dir,
        index,
        visualization: bundle.visualization,
    })
}

/// Re-run the index stage over a bundle written earlier.
pub fn index_crate(crate_dir: &Path, options: &ExportOptions) -> CellscopeResult<IndexReport> {
    options.push.validate()?;
    let bundle = open_bundle(crate_dir)?;
    index_bundle_with(&bundle, options, &DeltaPusher::default())
}

/// Hints for `notebook`: a provided payload is validated and saved,
/// otherwise whatever the store holds (or none).
pub fn resolve_hints(
    store: &dyn HintStore,
    notebook: &str,
    provided: Option<&str>,
) -> CellscopeResult<ReviewHints> {
    match provided {
        Some(payload) => {
            let hints = ReviewHints::from_json(payload)?;
            store.save(notebook, &hints)?;
            Ok(hints)
        }
        None => Ok(store.load(notebook)?.unwrap_or_default()),
    }
}
