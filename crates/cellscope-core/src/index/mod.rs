//! Triple delta generation and publication.

pub mod push;
pub mod triples;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ExportOptions;
use crate::errors::CellscopeResult;
use crate::export::Bundle;
use crate::models::{PushErrorKind, PushResult};

pub use push::{DeltaPusher, Sleeper, ThreadSleeper, Transport, TransportOutcome, UreqTransport};
pub use triples::{flatten, render_insert, Term, Triple};

/// Summary of the index stage for one bundle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub output: PathBuf,
    pub triples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PushErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IndexReport {
    fn with_push(mut self, result: PushResult) -> Self {
        self.attempts = Some(result.attempts);
        self.duration_seconds = Some(result.duration_seconds);
        self.status = result.status_code;
        self.error = result.error;
        self.message = result.message;
        self
    }

    /// True when no push was configured or the push succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// `file://` IRI of `dir`, with a trailing slash.
pub fn file_base_uri(dir: &Path) -> String {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let path = dir.to_string_lossy().replace('\\', "/");
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    triples::ensure_trailing_slash(&format!("file://{path}"))
}

/// Write `contents` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &str) -> CellscopeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Flatten `bundle`, persist the delta and push it with the default transport.
pub fn index_bundle(bundle: &Bundle, options: &ExportOptions) -> CellscopeResult<IndexReport> {
    index_bundle_with(bundle, options, &DeltaPusher::default())
}

/// Like [`index_bundle`] with a caller-supplied pusher.
///
/// The delta file is complete on disk before any network attempt; push
/// failures are reported in the returned summary, never as an `Err`.
pub fn index_bundle_with(
    bundle: &Bundle,
    options: &ExportOptions,
    pusher: &DeltaPusher,
) -> CellscopeResult<IndexReport> {
    let base_uri = match &options.base_uri {
        Some(base) => triples::ensure_trailing_slash(base),
        None => file_base_uri(&bundle.crate_dir),
    };
    let triples = flatten(&bundle.metadata, &base_uri);
    let statement = render_insert(&triples);

    let output = options
        .push
        .output
        .clone()
        .unwrap_or_else(|| bundle.default_delta_path());
    write_atomic(&output, &statement)?;
    info!(
        output = %output.display(),
        triples = triples.len(),
        "wrote triple delta"
    );

    let report = IndexReport {
        endpoint: options.push.endpoint().map(str::to_string),
        output,
        triples: triples.len(),
        attempts: None,
        duration_seconds: None,
        status: None,
        error: None,
        message: None,
    };

    match pusher.push(&statement, &options.push) {
        Some(result) => {
            if !result.succeeded() {
                warn!(
                    error = ?result.error,
                    status = ?result.status_code,
                    "delta push failed; the delta file remains on disk"
                );
            }
            Ok(report.with_push(result))
        }
        None => Ok(report),
    }
}
