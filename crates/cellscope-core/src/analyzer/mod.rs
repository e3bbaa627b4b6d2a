//! Per-cell static fact extraction.
//!
//! A [`CellAnalyzer`] looks up the [`KernelParser`] registered for a cell's
//! kernel tag and hands it the cell body with magic lines blanked out.
//! Cross-kernel `%put`/`%get` magics are detected here, independently of the
//! kernel grammar.

pub mod python;
pub mod r;

use std::collections::BTreeMap;
use std::path::{Component, Path};

use indexmap::IndexSet;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::errors::AnalysisError;
use crate::models::{Cell, CellFacts};
use crate::notebook::NotebookCell;

// ---------------------------------------------------------------------------
// Parser capability
// ---------------------------------------------------------------------------

/// Capability: extract facts from source written for one kernel family.
pub trait KernelParser: Send + Sync {
    /// Short family name, e.g. `"python"`.
    fn family(&self) -> &'static str;

    /// Whether this parser handles the given (lower-cased) kernel tag.
    fn handles(&self, kernel: &str) -> bool;

    /// File extension used when the cell source is written to a bundle.
    fn extension(&self) -> &'static str;

    /// Extract facts. Magic lines have already been blanked out.
    fn parse(&self, source: &str) -> Result<CellFacts, AnalysisError>;
}

/// Kernel parsers keyed by the kernel tags they accept.
///
/// Lookup walks registered parsers in registration order and falls back to
/// the Python grammar, which is what plain Jupyter notebooks use.
pub struct KernelRegistry {
    parsers: Vec<Box<dyn KernelParser>>,
    fallback: Box<dyn KernelParser>,
}

impl KernelRegistry {
    /// Registry with only the Python fallback.
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
            fallback: Box::new(python::PythonParser),
        }
    }

    /// Registry with every built-in kernel family.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(r::RParser));
        registry
    }

    pub fn register(&mut self, parser: Box<dyn KernelParser>) {
        self.parsers.push(parser);
    }

    pub fn lookup(&self, kernel: &str) -> &dyn KernelParser {
        let tag = kernel.trim().to_lowercase();
        self.parsers
            .iter()
            .find(|p| p.handles(&tag))
            .map(|p| p.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    pub fn families(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.parsers.iter().map(|p| p.family()).collect();
        names.push(self.fallback.family());
        names
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Fact accumulation
// ---------------------------------------------------------------------------

/// Order-preserving, de-duplicating accumulator shared by kernel parsers.
#[derive(Default)]
pub(crate) struct FactSet {
    pub functions: IndexSet<String>,
    pub calls: IndexSet<String>,
    pub defs: IndexSet<String>,
    pub uses: IndexSet<String>,
    pub writes: IndexSet<String>,
    pub reads: IndexSet<String>,
}

impl FactSet {
    pub fn define(&mut self, name: &str) {
        self.defs.insert(name.to_string());
    }

    /// Record a read unless the name is already bound earlier in the cell.
    pub fn read(&mut self, name: &str) {
        if !self.defs.contains(name) {
            self.uses.insert(name.to_string());
        }
    }

    pub fn into_facts(self) -> CellFacts {
        // Functions count as definitions so later calls link back to them.
        let mut defs = self.defs;
        for f in &self.functions {
            defs.insert(f.clone());
        }
        let uses: Vec<String> = self
            .uses
            .into_iter()
            .filter(|u| !self.functions.contains(u))
            .collect();
        let func_calls = self
            .calls
            .into_iter()
            .filter(|c| uses.contains(c))
            .collect();
        CellFacts {
            functions_defined: self.functions.into_iter().collect(),
            func_calls,
            vars_defined: defs.into_iter().collect(),
            vars_used: uses,
            files_written: self.writes.into_iter().map(|p| normalize_path(&p)).collect(),
            files_read: self.reads.into_iter().map(|p| normalize_path(&p)).collect(),
            cross_kernel_puts: Vec::new(),
            cross_kernel_gets: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Lexically normalise a path literal: unify separators, drop `.` segments,
/// and fold `..` where possible. Never touches the file system.
pub fn normalize_path(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(os) => parts.push(os.to_string_lossy().into_owned()),
            Component::ParentDir => {
                if parts.last().is_some_and(|p| p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".to_string());
                }
            }
            _ => {}
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join key for file provenance: the base name of the normalised path.
pub fn file_key(path: &str) -> String {
    let normalized = normalize_path(path);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(normalized.as_str())
        .to_string()
}

// ---------------------------------------------------------------------------
// Magics
// ---------------------------------------------------------------------------

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Result of scanning a cell for magic and shell lines.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MagicScan {
    pub puts: Vec<String>,
    pub gets: Vec<String>,
    /// Source with magic/shell lines replaced by empty lines.
    pub body: String,
}

/// Detect `%put`/`%get` handoffs and blank out every `%`/`!` line so the
/// grammar never sees them. Line count is preserved.
pub fn scan_magics(source: &str) -> MagicScan {
    let mut puts: IndexSet<String> = IndexSet::new();
    let mut gets: IndexSet<String> = IndexSet::new();
    let mut body = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("%put ") {
            puts.extend(rest.split_whitespace().filter(|t| is_identifier(t)).map(String::from));
        } else if let Some(rest) = trimmed.strip_prefix("%get ") {
            gets.extend(rest.split_whitespace().filter(|t| is_identifier(t)).map(String::from));
        }
        if trimmed.starts_with('%') || trimmed.starts_with('!') {
            body.push("");
        } else {
            body.push(line);
        }
    }
    MagicScan {
        puts: puts.into_iter().collect(),
        gets: gets.into_iter().collect(),
        body: body.join("\n"),
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

fn alias_all(names: Vec<String>, aliases: &BTreeMap<String, String>) -> Vec<String> {
    let mut out: IndexSet<String> = IndexSet::new();
    for name in names {
        out.insert(aliases.get(&name).cloned().unwrap_or(name));
    }
    out.into_iter().collect()
}

/// Extracts structural facts from cell source, dispatching on kernel.
pub struct CellAnalyzer {
    registry: KernelRegistry,
    aliases: BTreeMap<String, String>,
}

impl CellAnalyzer {
    pub fn new() -> Self {
        Self::with_registry(KernelRegistry::with_defaults())
    }

    pub fn with_registry(registry: KernelRegistry) -> Self {
        Self {
            registry,
            aliases: BTreeMap::new(),
        }
    }

    /// Rewrite equivalent variable names to one canonical name.
    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// File extension for a cell's kernel.
    pub fn extension_for(&self, kernel: &str) -> &'static str {
        self.registry.lookup(kernel).extension()
    }

    /// Extract facts from one cell. Deterministic in `(source, kernel)`.
    pub fn analyze_cell(&self, source: &str, kernel: &str) -> Result<CellFacts, AnalysisError> {
        let scan = scan_magics(source);
        let parser = self.registry.lookup(kernel);
        let mut facts = parser.parse(&scan.body)?;
        facts.cross_kernel_puts = scan.puts;
        facts.cross_kernel_gets = scan.gets;
        if !self.aliases.is_empty() {
            facts = self.apply_aliases(facts);
        }
        Ok(facts)
    }

    fn apply_aliases(&self, facts: CellFacts) -> CellFacts {
        let a = &self.aliases;
        CellFacts {
            functions_defined: alias_all(facts.functions_defined, a),
            func_calls: alias_all(facts.func_calls, a),
            vars_defined: alias_all(facts.vars_defined, a),
            vars_used: alias_all(facts.vars_used, a),
            files_written: facts.files_written,
            files_read: facts.files_read,
            cross_kernel_puts: alias_all(facts.cross_kernel_puts, a),
            cross_kernel_gets: alias_all(facts.cross_kernel_gets, a),
        }
    }

    /// Analyze one notebook cell, recording failures on the cell instead of
    /// propagating them.
    pub fn analyze_notebook_cell(&self, cell: &NotebookCell) -> Cell {
        let mut out = Cell::new(cell.index, cell.kernel.clone(), cell.source.clone());
        match self.analyze_cell(&cell.source, &cell.kernel) {
            Ok(facts) => out.facts = facts,
            Err(e) => {
                warn!(cell = cell.index, kernel = %cell.kernel, error = %e, "cell analysis failed");
                out.error = Some(e.to_string());
            }
        }
        out
    }

    /// Analyze every cell on the rayon pool; output keeps document order.
    pub fn analyze_cells(&self, cells: &[NotebookCell]) -> Vec<Cell> {
        debug!(cells = cells.len(), "analyzing notebook cells");
        cells
            .par_iter()
            .map(|c| self.analyze_notebook_cell(c))
            .collect()
    }
}

impl Default for CellAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
