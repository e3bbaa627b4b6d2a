//! Static HTML view of the cell graph.
//!
//! Cells are laid out left to right in document order; edges are drawn as
//! arcs above the row, colored by kind. Hovering a node or an arc shows its
//! details through SVG `<title>` tooltips, so the page needs no scripts.

use std::fmt::Write as _;

use crate::errors::CellscopeResult;
use crate::models::{EdgeKind, Graph};

/// Lines of cell source shown in a node tooltip.
pub const SNIPPET_LINES: usize = 25;

/// Capability: render a graph into a standalone HTML document.
pub trait Renderer: Send + Sync {
    fn render(&self, graph: &Graph, title: &str) -> CellscopeResult<String>;
}

/// Renderer used when none is supplied, if one is compiled in.
pub fn default_renderer() -> Option<Box<dyn Renderer>> {
    #[cfg(feature = "visualize")]
    {
        Some(Box::new(SvgRenderer::default()))
    }
    #[cfg(not(feature = "visualize"))]
    {
        None
    }
}

#[cfg(feature = "visualize")]
fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(feature = "visualize")]
fn edge_color(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Variable => "#1f77b4",
        EdgeKind::File => "#2ca02c",
        EdgeKind::CrossKernel => "#d62728",
    }
}

/// Inline-SVG renderer.
#[cfg(feature = "visualize")]
#[derive(Debug, Clone)]
pub struct SvgRenderer {
    pub spacing: u32,
    pub radius: u32,
}

#[cfg(feature = "visualize")]
impl Default for SvgRenderer {
    fn default() -> Self {
        Self {
            spacing: 140,
            radius: 28,
        }
    }
}

#[cfg(feature = "visualize")]
impl SvgRenderer {
    fn node_x(&self, index: usize) -> u32 {
        self.spacing / 2 + index as u32 * self.spacing
    }
}

#[cfg(feature = "visualize")]
impl Renderer for SvgRenderer {
    fn render(&self, graph: &Graph, title: &str) -> CellscopeResult<String> {
        let cells = graph.cells();
        let width = (cells.len().max(1) as u32) * self.spacing;
        let max_span = graph
            .edges()
            .iter()
            .map(|e| e.target - e.source)
            .max()
            .unwrap_or(0) as u32;
        let baseline = 60 + max_span * self.spacing / 4 + self.radius;
        let height = baseline + self.radius + 60;

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">"
        );
        svg.push_str(
            "<defs><marker id=\"arrow\" viewBox=\"0 0 10 10\" refX=\"9\" refY=\"5\" \
             markerWidth=\"6\" markerHeight=\"6\" orient=\"auto-start-reverse\">\
             <path d=\"M 0 0 L 10 5 L 0 10 z\" fill=\"#555\"/></marker></defs>\n",
        );

        for edge in graph.edges() {
            let x1 = self.node_x(edge.source);
            let x2 = self.node_x(edge.target);
            let lift = (edge.target - edge.source) as u32 * self.spacing / 4 + self.radius;
            let mid = (x1 + x2) / 2;
            let tip = format!(
                "{} → {}: {} [{}] via {}",
                edge.source,
                edge.target,
                edge.labels.join(", "),
                edge.kind,
                edge.mechanism
            );
            let _ = writeln!(
                svg,
                "<path class=\"edge {kind}\" d=\"M {x1} {y} Q {mid} {cy} {x2} {y}\" fill=\"none\" \
                 stroke=\"{color}\" stroke-width=\"2\" marker-end=\"url(#arrow)\"><title>{tip}</title></path>",
                kind = edge.kind,
                y = baseline - self.radius,
                cy = baseline.saturating_sub(self.radius + 2 * lift),
                color = edge_color(edge.kind),
                tip = escape_html(&tip),
            );
        }

        for cell in cells {
            let x = self.node_x(cell.index);
            let snippet: Vec<&str> = cell.source.lines().take(SNIPPET_LINES).collect();
            let mut tip = format!("Cell {} ({})\n{}", cell.index, cell.kernel, snippet.join("\n"));
            if cell.source.lines().count() > SNIPPET_LINES {
                tip.push_str("\n…");
            }
            if let Some(err) = &cell.error {
                let _ = write!(tip, "\nanalysis error: {err}");
            }
            let fill = if cell.error.is_some() { "#fde0dc" } else { "#eef3fb" };
            let _ = writeln!(
                svg,
                "<g class=\"cell\"><circle cx=\"{x}\" cy=\"{baseline}\" r=\"{r}\" fill=\"{fill}\" \
                 stroke=\"#333\"/><text x=\"{x}\" y=\"{ty}\" text-anchor=\"middle\" \
                 font-family=\"sans-serif\" font-size=\"13\">Cell {idx}</text>\
                 <title>{tip}</title></g>",
                r = self.radius,
                ty = baseline + 4,
                idx = cell.index,
                tip = escape_html(&tip),
            );
        }
        svg.push_str("</svg>\n");

        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{t}</title>\n\
             <style>body{{font-family:sans-serif;margin:16px}}.legend span{{margin-right:14px}}\
             .cell:hover circle{{stroke-width:3}}.edge:hover{{stroke-width:4}}</style>\n\
             </head>\n<body>\n<h1>{t}</h1>\n<div class=\"legend\">\
             <span style=\"color:{v}\">variable</span>\
             <span style=\"color:{f}\">file</span>\
             <span style=\"color:{x}\">cross-kernel</span></div>\n{svg}</body>\n</html>\n",
            t = escape_html(title),
            v = edge_color(EdgeKind::Variable),
            f = edge_color(EdgeKind::File),
            x = edge_color(EdgeKind::CrossKernel),
        );
        Ok(html)
    }
}

#[cfg(all(test, feature = "visualize"))]
mod tests {
    use super::*;
    use crate::graph::infer;
    use crate::models::{Cell, CellFacts};

    #[test]
    fn test_render_has_node_per_cell_and_arc_per_edge() {
        let graph = infer(vec![
            Cell::new(0, "python3", "x = '<b>'").with_facts(CellFacts {
                vars_defined: vec!["x".to_string()],
                ..CellFacts::default()
            }),
            Cell::new(1, "python3", "print(x)").with_facts(CellFacts {
                vars_used: vec!["x".to_string()],
                ..CellFacts::default()
            }),
        ]);
        let html = SvgRenderer::default().render(&graph, "demo").unwrap();
        assert_eq!(html.matches("<g class=\"cell\">").count(), 2);
        assert_eq!(html.matches("<path class=\"edge").count(), 1);
        assert!(html.contains("x = '&lt;b&gt;'"));
    }

    #[test]
    fn test_default_renderer_is_available() {
        assert!(default_renderer().is_some());
    }
}
