//! Python bindings consumed by the notebook-server extension.

use std::path::PathBuf;

use pyo3::prelude::*;

use crate::config::{ExportOptions, PushConfig};
use crate::export::load_sidecars;
use crate::pipeline;

fn to_py(py: Python<'_>, json_str: String) -> PyResult<PyObject> {
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

#[pyfunction]
pub fn analyze(py: Python<'_>, path: PathBuf) -> PyResult<PyObject> {
    let graph = py.allow_threads(|| pipeline::analyze(&path))?;
    let json_str = serde_json::to_string(&serde_json::json!({ "graph": graph }))
        .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;
    to_py(py, json_str)
}

#[pyfunction]
#[pyo3(signature = (path, out_dir, hints_json=None, endpoint=None, sidecars=None))]
pub fn export(
    py: Python<'_>,
    path: PathBuf,
    out_dir: PathBuf,
    hints_json: Option<String>,
    endpoint: Option<String>,
    sidecars: Option<Vec<PathBuf>>,
) -> PyResult<PyObject> {
    let mut options = ExportOptions::from_env()?;
    options.sidecars = load_sidecars(&sidecars.unwrap_or_default())?;
    options.push = options.push.merged_with(&PushConfig {
        endpoint,
        ..PushConfig::default()
    });
    let report = py.allow_threads(|| {
        pipeline::export(&path, &out_dir, hints_json.as_deref(), &options)
    })?;
    to_py(py, report.to_json()?)
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(analyze, m)?)?;
    m.add_function(wrap_pyfunction!(export, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
