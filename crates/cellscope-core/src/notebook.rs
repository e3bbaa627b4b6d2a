//! Notebook (`.ipynb`, nbformat 4) loading.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{CellscopeError, CellscopeResult};

/// Kernel tag used when neither the cell nor the notebook names one.
pub const DEFAULT_KERNEL: &str = "python3";

/// One code cell as stored in the notebook, before analysis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotebookCell {
    pub index: usize,
    pub kernel: String,
    pub source: String,
}

/// The executable part of a notebook: its code cells in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notebook {
    pub path: Option<PathBuf>,
    pub cells: Vec<NotebookCell>,
}

impl Notebook {
    /// File stem of the notebook, used to name the exported bundle.
    pub fn name(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
    }

    /// Directory the notebook lives in; relative file paths resolve here.
    pub fn directory(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }
}

#[derive(Deserialize)]
struct RawNotebook {
    cells: Vec<RawCell>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(default)]
    source: RawSource,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSource {
    Text(String),
    Lines(Vec<String>),
}

impl Default for RawSource {
    fn default() -> Self {
        RawSource::Text(String::new())
    }
}

impl RawSource {
    fn into_text(self) -> String {
        match self {
            RawSource::Text(t) => t,
            RawSource::Lines(lines) => lines.concat(),
        }
    }
}

fn string_at<'a>(value: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().filter(|s| !s.trim().is_empty())
}

/// Parse notebook JSON already held in memory.
pub fn parse_notebook(payload: &str) -> CellscopeResult<Notebook> {
    let raw: RawNotebook = serde_json::from_str(payload)
        .map_err(|e| CellscopeError::Validation(format!("not a notebook document: {e}")))?;

    let notebook_kernel = string_at(&raw.metadata, &["kernelspec", "name"])
        .unwrap_or(DEFAULT_KERNEL)
        .to_string();

    let cells = raw
        .cells
        .into_iter()
        .filter(|c| c.cell_type == "code")
        .enumerate()
        .map(|(index, cell)| {
            // SoS notebooks tag each cell with its own kernel.
            let kernel = string_at(&cell.metadata, &["kernel"])
                .map(str::to_string)
                .unwrap_or_else(|| notebook_kernel.clone());
            NotebookCell {
                index,
                kernel,
                source: cell.source.into_text(),
            }
        })
        .collect();

    Ok(Notebook { path: None, cells })
}

/// Read and parse a notebook from disk.
pub fn load_notebook(path: &Path) -> CellscopeResult<Notebook> {
    let payload = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            CellscopeError::NotFound(format!("notebook {}", path.display()))
        }
        _ => CellscopeError::NotFound(format!("notebook {} is unreadable: {e}", path.display())),
    })?;
    let mut notebook = parse_notebook(&payload)?;
    notebook.path = Some(path.to_path_buf());
    Ok(notebook)
}
