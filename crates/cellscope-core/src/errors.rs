//! Error types for the CellScope core library.

#[cfg(feature = "python")]
use pyo3::exceptions::{PyFileNotFoundError, PyIOError, PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;

/// Top-level error enum for the CellScope core library.
#[derive(Debug, thiserror::Error)]
pub enum CellscopeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Push error: {0}")]
    Push(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[cfg(feature = "python")]
impl From<CellscopeError> for PyErr {
    fn from(err: CellscopeError) -> PyErr {
        match &err {
            CellscopeError::NotFound(_) => PyFileNotFoundError::new_err(err.to_string()),
            CellscopeError::Validation(_) | CellscopeError::Parse(_) | CellscopeError::Json(_) => {
                PyValueError::new_err(err.to_string())
            }
            CellscopeError::Io(_) => PyIOError::new_err(err.to_string()),
            CellscopeError::Export(_) | CellscopeError::Push(_) | CellscopeError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

pub type CellscopeResult<T> = Result<T, CellscopeError>;

/// Failure to extract facts from a single cell.
///
/// Never aborts a notebook run: the analyzer records the message on the
/// cell and continues with empty facts.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    #[error("parser initialisation failed: {0}")]
    ParserInit(String),

    #[error("detector failed: {0}")]
    Detector(String),
}
