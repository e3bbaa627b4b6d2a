//! Shared typed models used across analysis, export, and indexing layers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{CellscopeError, CellscopeResult};

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Structural facts extracted from one cell's source.
///
/// Every list keeps first-occurrence order. Serialised field names follow the
/// JSON shape consumed by the notebook panel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFacts {
    #[serde(rename = "funcs")]
    pub functions_defined: Vec<String>,
    pub func_calls: Vec<String>,
    #[serde(rename = "var_defs")]
    pub vars_defined: Vec<String>,
    #[serde(rename = "var_uses")]
    pub vars_used: Vec<String>,
    #[serde(rename = "file_writes")]
    pub files_written: Vec<String>,
    #[serde(rename = "file_reads")]
    pub files_read: Vec<String>,
    #[serde(rename = "sos_put")]
    pub cross_kernel_puts: Vec<String>,
    #[serde(rename = "sos_get")]
    pub cross_kernel_gets: Vec<String>,
}

impl CellFacts {
    pub fn defines(&self, name: &str) -> bool {
        self.vars_defined.iter().any(|v| v == name)
    }

    pub fn uses(&self, name: &str) -> bool {
        self.vars_used.iter().any(|v| v == name)
    }

    pub fn gets(&self, name: &str) -> bool {
        self.cross_kernel_gets.iter().any(|v| v == name)
    }
}

/// One executable notebook cell together with its extracted facts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "idx")]
    pub index: usize,
    pub kernel: String,
    #[serde(skip_serializing, default)]
    pub source: String,
    #[serde(flatten)]
    pub facts: CellFacts,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Cell {
    pub fn new(index: usize, kernel: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            index,
            kernel: kernel.into(),
            source: source.into(),
            facts: CellFacts::default(),
            error: None,
        }
    }

    pub fn with_facts(mut self, facts: CellFacts) -> Self {
        self.facts = facts;
        self
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Which inference rule produced an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Variable,
    File,
    CrossKernel,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Variable => "variable",
            EdgeKind::File => "file",
            EdgeKind::CrossKernel => "cross-kernel",
        }
    }

    /// Detection mechanism recorded on edges of this kind.
    pub fn mechanism(&self) -> &'static str {
        match self {
            EdgeKind::Variable => "ast",
            EdgeKind::File => "path",
            EdgeKind::CrossKernel => "handoff",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inferred provenance relationship between two cells (`source < target`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub source: usize,
    pub target: usize,
    #[serde(rename = "vars")]
    pub labels: Vec<String>,
    #[serde(rename = "via")]
    pub mechanism: String,
}

impl Edge {
    pub fn new(kind: EdgeKind, source: usize, target: usize, labels: Vec<String>) -> Self {
        Self {
            kind,
            source,
            target,
            labels,
            mechanism: kind.mechanism().to_string(),
        }
    }

    /// Identity used for de-duplication.
    pub fn key(&self) -> (EdgeKind, usize, usize, &[String]) {
        (self.kind, self.source, self.target, &self.labels)
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Provenance graph for one analysis run.
///
/// Edges refer to cells by index into the owned cell sequence. A graph is
/// never mutated after inference; re-analysis produces a new one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Graph {
    cells: Vec<Cell>,
    edges: Vec<Edge>,
}

impl Graph {
    pub(crate) fn from_parts(cells: Vec<Cell>, edges: Vec<Edge>) -> Self {
        Self { cells, edges }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Serialise to the `{cells, edges}` JSON shape.
    pub fn to_json(&self) -> CellscopeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Review hints
// ---------------------------------------------------------------------------

/// A domain metadata value: a single string or a set of strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    One(String),
    Many(BTreeSet<String>),
}

impl HintValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            HintValue::One(v) => vec![v.as_str()],
            HintValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Display for HintValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.values().join(", "))
    }
}

/// Caller-reviewed role and domain annotations.
///
/// Unknown top-level keys are kept in `extra` so a payload written by a newer
/// panel survives a load/save cycle untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewHints {
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
    #[serde(default)]
    pub domains: BTreeMap<String, BTreeMap<String, HintValue>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ReviewHints {
    pub fn from_json(payload: &str) -> CellscopeResult<Self> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| CellscopeError::Validation(format!("hints payload is not JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> CellscopeResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        if !value.is_object() {
            return Err(CellscopeError::Validation(
                "hints payload must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| CellscopeError::Validation(format!("malformed hints payload: {e}")))
    }

    pub fn to_json(&self) -> CellscopeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.domains.is_empty() && self.extra.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Push results
// ---------------------------------------------------------------------------

/// Why a configured push did not succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushErrorKind {
    /// The endpoint rejected the request (4xx or other non-retryable status).
    ClientError,
    /// The request could not be built or sent as specified.
    InvalidRequest,
    /// Every attempt hit a transient failure.
    RetriesExhausted,
}

/// Outcome of pushing a delta to a remote endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    pub attempted: bool,
    pub status_code: Option<u16>,
    pub attempts: u32,
    pub duration_seconds: f64,
    pub error: Option<PushErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl PushResult {
    pub fn succeeded(&self) -> bool {
        self.attempted && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_mechanism_follows_kind() {
        let edge = Edge::new(EdgeKind::File, 0, 2, vec!["out.csv".to_string()]);
        assert_eq!(edge.mechanism, "path");
        assert_eq!(
            Edge::new(EdgeKind::CrossKernel, 0, 1, vec![]).mechanism,
            "handoff"
        );
    }

    #[test]
    fn test_cell_json_shape() {
        let cell = Cell::new(3, "python3", "x = 1").with_facts(CellFacts {
            vars_defined: vec!["x".to_string()],
            ..CellFacts::default()
        });
        let value = serde_json::to_value(&cell).unwrap();
        assert_eq!(value["idx"], 3);
        assert_eq!(value["var_defs"][0], "x");
        assert!(value.get("source").is_none());
        assert!(value.get("error").is_none());
        assert!(value["sos_put"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_edge_json_shape() {
        let edge = Edge::new(EdgeKind::CrossKernel, 1, 4, vec!["df".to_string()]);
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value["type"], "cross-kernel");
        assert_eq!(value["via"], "handoff");
        assert_eq!(value["vars"][0], "df");
    }

    #[test]
    fn test_hints_preserve_unknown_keys() {
        let hints = ReviewHints::from_json(
            r#"{"roles": {"df": "input"}, "panel": {"collapsed": true}}"#,
        )
        .unwrap();
        assert_eq!(hints.roles["df"], "input");
        assert!(hints.extra.contains_key("panel"));
        let again = ReviewHints::from_json(&hints.to_json().unwrap()).unwrap();
        assert_eq!(again, hints);
    }

    #[test]
    fn test_hints_single_and_set_values() {
        let hints = ReviewHints::from_json(
            r#"{"domains": {"out.csv": {"units": "K", "keywords": ["b", "a", "b"]}}}"#,
        )
        .unwrap();
        let domain = &hints.domains["out.csv"];
        assert_eq!(domain["units"], HintValue::One("K".to_string()));
        assert_eq!(domain["keywords"].values(), vec!["a", "b"]);
    }

    #[test]
    fn test_hints_reject_malformed_payloads() {
        assert!(matches!(
            ReviewHints::from_json("not json"),
            Err(CellscopeError::Validation(_))
        ));
        assert!(matches!(
            ReviewHints::from_json("[1, 2]"),
            Err(CellscopeError::Validation(_))
        ));
        assert!(matches!(
            ReviewHints::from_json(r#"{"roles": {"df": 3}}"#),
            Err(CellscopeError::Validation(_))
        ));
    }

    #[test]
    fn test_null_hints_are_empty() {
        let hints = ReviewHints::from_json("null").unwrap();
        assert!(hints.is_empty());
    }
}
