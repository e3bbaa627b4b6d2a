//! Read-only projection of review hints onto a graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::analyzer::file_key;
use crate::errors::CellscopeResult;
use crate::models::{Graph, HintValue, ReviewHints};

/// A graph together with the hints that apply to it.
///
/// Borrowing both keeps the graph immutable; re-merging the same hints
/// yields an identical projection.
#[derive(Debug, Clone)]
pub struct AnnotatedGraph<'g> {
    graph: &'g Graph,
    hints: &'g ReviewHints,
    variables: BTreeSet<String>,
    files: BTreeSet<String>,
}

#[derive(Serialize)]
struct Annotations<'a> {
    roles: BTreeMap<&'a str, &'a str>,
    domains: BTreeMap<&'a str, &'a BTreeMap<String, HintValue>>,
}

/// Attach `hints` to the variables and files that `graph` mentions.
pub fn merge<'g>(graph: &'g Graph, hints: &'g ReviewHints) -> AnnotatedGraph<'g> {
    let mut variables = BTreeSet::new();
    let mut files = BTreeSet::new();
    for cell in graph.cells() {
        variables.extend(cell.facts.vars_defined.iter().cloned());
        variables.extend(cell.facts.vars_used.iter().cloned());
        variables.extend(cell.facts.cross_kernel_puts.iter().cloned());
        variables.extend(cell.facts.cross_kernel_gets.iter().cloned());
        files.extend(cell.facts.files_written.iter().map(|p| file_key(p)));
        files.extend(cell.facts.files_read.iter().map(|p| file_key(p)));
    }
    AnnotatedGraph {
        graph,
        hints,
        variables,
        files,
    }
}

impl<'g> AnnotatedGraph<'g> {
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Every hint as supplied, including entries for unknown names.
    pub fn hints(&self) -> &'g ReviewHints {
        self.hints
    }

    /// Distinct variable names, sorted.
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    /// Distinct file base names, sorted.
    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    pub fn role(&self, variable: &str) -> Option<&'g str> {
        if !self.variables.contains(variable) {
            return None;
        }
        self.hints.roles.get(variable).map(String::as_str)
    }

    /// Role recorded for a file, keyed by its base name.
    pub fn file_role(&self, file: &str) -> Option<&'g str> {
        let key = file_key(file);
        if !self.files.contains(&key) {
            return None;
        }
        self.hints.roles.get(&key).map(String::as_str)
    }

    pub fn domain(&self, file: &str) -> Option<&'g BTreeMap<String, HintValue>> {
        let key = file_key(file);
        if !self.files.contains(&key) {
            return None;
        }
        self.hints.domains.get(&key)
    }

    /// Roles and domains that matched a graph name, as canonical JSON.
    pub fn annotations_json(&self) -> CellscopeResult<String> {
        let roles = self
            .variables
            .iter()
            .filter_map(|v| self.role(v).map(|r| (v.as_str(), r)))
            .collect();
        let domains = self
            .files
            .iter()
            .filter_map(|f| self.domain(f).map(|d| (f.as_str(), d)))
            .collect();
        Ok(serde_json::to_string(&Annotations { roles, domains })?)
    }
}
