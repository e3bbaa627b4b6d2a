//! Cross-cell edge inference.
//!
//! Three independent rules run over every ordered cell pair `(i, j)`, `i < j`:
//!
//! * variable: a use in `j` links to the nearest preceding cell defining it;
//! * file: a read in `j` links to the nearest preceding cell writing a path
//!   with the same base name;
//! * cross-kernel: a `%put` in `i` links to the nearest following `%get` of
//!   the same name in a cell running a different kernel.
//!
//! Edges carry one label each, are de-duplicated by
//! `(kind, source, target, labels)`, and are returned sorted by
//! `(source, target, kind, labels)`.

use std::collections::HashSet;

use tracing::debug;

use crate::analyzer::file_key;
use crate::models::{Cell, Edge, EdgeKind, Graph};

fn kernel_tag(cell: &Cell) -> String {
    cell.kernel.trim().to_lowercase()
}

fn variable_edges(cells: &[Cell], out: &mut Vec<Edge>) {
    for (j, reader) in cells.iter().enumerate() {
        for name in &reader.facts.vars_used {
            let definer = (0..j).rev().find(|&i| cells[i].facts.defines(name));
            if let Some(i) = definer {
                out.push(Edge::new(EdgeKind::Variable, i, j, vec![name.clone()]));
            }
        }
    }
}

fn file_edges(cells: &[Cell], out: &mut Vec<Edge>) {
    let written: Vec<HashSet<String>> = cells
        .iter()
        .map(|c| c.facts.files_written.iter().map(|p| file_key(p)).collect())
        .collect();
    for (j, reader) in cells.iter().enumerate() {
        for path in &reader.facts.files_read {
            let key = file_key(path);
            let writer = (0..j).rev().find(|&i| written[i].contains(&key));
            if let Some(i) = writer {
                out.push(Edge::new(EdgeKind::File, i, j, vec![key]));
            }
        }
    }
}

fn cross_kernel_edges(cells: &[Cell], out: &mut Vec<Edge>) {
    for (i, sender) in cells.iter().enumerate() {
        let sender_kernel = kernel_tag(sender);
        for name in &sender.facts.cross_kernel_puts {
            let receiver = cells
                .iter()
                .enumerate()
                .skip(i + 1)
                .find(|(_, c)| kernel_tag(c) != sender_kernel && c.facts.gets(name));
            if let Some((j, _)) = receiver {
                out.push(Edge::new(EdgeKind::CrossKernel, i, j, vec![name.clone()]));
            }
        }
    }
}

/// Build the provenance graph for cells given in document order.
///
/// Cell indices are taken from position in `cells`; callers pass the
/// analyzer output, whose indices already match.
pub fn infer(cells: Vec<Cell>) -> Graph {
    let mut edges = Vec::new();
    variable_edges(&cells, &mut edges);
    file_edges(&cells, &mut edges);
    cross_kernel_edges(&cells, &mut edges);

    let mut seen = HashSet::new();
    edges.retain(|e| seen.insert((e.kind, e.source, e.target, e.labels.clone())));
    edges.sort_by(|a, b| {
        (a.source, a.target, a.kind, &a.labels).cmp(&(b.source, b.target, b.kind, &b.labels))
    });

    debug!(cells = cells.len(), edges = edges.len(), "inferred provenance graph");
    Graph::from_parts(cells, edges)
}
