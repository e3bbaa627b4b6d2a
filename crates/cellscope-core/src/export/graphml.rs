//! GraphML rendering of the cell graph.

use std::io::{self, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::errors::CellscopeResult;
use crate::models::Graph;

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";
const SCHEMA_LOCATION: &str =
    "http://graphml.graphdrawing.org/xmlns http://graphml.graphdrawing.org/xmlns/1.0/graphml.xsd";

const NODE_KEYS: &[&str] = &["kernel", "funcs", "func_calls", "var_defs", "var_uses"];
const EDGE_KEYS: &[&str] = &["type", "via", "label"];

fn json_list(items: &[String]) -> String {
    let mut sorted: Vec<&String> = items.iter().collect();
    sorted.sort();
    sorted.dedup();
    serde_json::to_string(&sorted).unwrap_or_else(|_| "[]".to_string())
}

/// XML 1.0 cannot carry most control characters, even escaped.
fn xml_safe(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

struct GraphmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> GraphmlWriter<W> {
    fn event(&mut self, event: Event<'_>) -> io::Result<()> {
        self.writer.write_event(event).map_err(io::Error::other)
    }

    fn data(&mut self, key: &str, value: &str) -> io::Result<()> {
        let mut start = BytesStart::new("data");
        start.push_attribute(("key", key));
        self.event(Event::Start(start))?;
        self.event(Event::Text(BytesText::new(&xml_safe(value))))?;
        self.event(Event::End(BytesEnd::new("data")))
    }

    fn keys(&mut self, domain: &str, keys: &[&str]) -> io::Result<()> {
        for key in keys {
            let mut start = BytesStart::new("key");
            start.push_attribute(("id", *key));
            start.push_attribute(("for", domain));
            start.push_attribute(("attr.name", *key));
            start.push_attribute(("attr.type", "string"));
            self.event(Event::Empty(start))?;
        }
        Ok(())
    }

    fn write(mut self, graph: &Graph) -> io::Result<W> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let mut root = BytesStart::new("graphml");
        root.push_attribute(("xmlns", GRAPHML_NS));
        root.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
        root.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
        self.event(Event::Start(root))?;
        self.keys("node", NODE_KEYS)?;
        self.keys("edge", EDGE_KEYS)?;

        let mut body = BytesStart::new("graph");
        body.push_attribute(("edgedefault", "directed"));
        self.event(Event::Start(body))?;

        for cell in graph.cells() {
            let facts = &cell.facts;
            let mut node = BytesStart::new("node");
            node.push_attribute(("id", cell.index.to_string().as_str()));
            self.event(Event::Start(node))?;
            self.data("kernel", &cell.kernel)?;
            self.data("funcs", &json_list(&facts.functions_defined))?;
            self.data("func_calls", &json_list(&facts.func_calls))?;
            self.data("var_defs", &json_list(&facts.vars_defined))?;
            self.data("var_uses", &json_list(&facts.vars_used))?;
            self.event(Event::End(BytesEnd::new("node")))?;
        }

        for (n, edge) in graph.edges().iter().enumerate() {
            let mut start = BytesStart::new("edge");
            start.push_attribute(("id", format!("e{n}").as_str()));
            start.push_attribute(("source", edge.source.to_string().as_str()));
            start.push_attribute(("target", edge.target.to_string().as_str()));
            self.event(Event::Start(start))?;
            self.data("type", &edge.kind.to_string())?;
            self.data("via", &edge.mechanism)?;
            self.data("label", &edge.labels.join(","))?;
            self.event(Event::End(BytesEnd::new("edge")))?;
        }

        self.event(Event::End(BytesEnd::new("graph")))?;
        self.event(Event::End(BytesEnd::new("graphml")))?;
        let mut inner = self.writer.into_inner();
        inner.write_all(b"\n")?;
        Ok(inner)
    }
}

/// Write `graph` as GraphML into `writer`: one node per cell, one edge per
/// inferred edge.
pub fn write_graphml<W: Write>(graph: &Graph, writer: W) -> io::Result<W> {
    GraphmlWriter {
        writer: Writer::new_with_indent(writer, b' ', 2),
    }
    .write(graph)
}

pub fn render_graphml(graph: &Graph) -> CellscopeResult<String> {
    let bytes = write_graphml(graph, Vec::new())?;
    Ok(String::from_utf8(bytes).map_err(io::Error::other)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::infer;
    use crate::models::{Cell, CellFacts};

    #[test]
    fn test_nodes_and_edges_match_graph() {
        let graph = infer(vec![
            Cell::new(0, "python3", "").with_facts(CellFacts {
                vars_defined: vec!["a<b".to_string()],
                ..CellFacts::default()
            }),
            Cell::new(1, "python3", "").with_facts(CellFacts {
                vars_used: vec!["a<b".to_string()],
                ..CellFacts::default()
            }),
        ]);
        let xml = render_graphml(&graph).unwrap();
        assert_eq!(xml.matches("<node id=").count(), 2);
        assert_eq!(xml.matches("<edge id=").count(), 1);
        assert!(xml.contains("<edge id=\"e0\" source=\"0\" target=\"1\">"));
        assert!(xml.contains("<data key=\"label\">a&lt;b</data>"));
        assert!(xml.contains("<data key=\"kernel\">python3</data>"));
        assert!(!xml.contains("a<b"));
    }

    #[test]
    fn test_empty_graph_is_well_formed() {
        let xml = render_graphml(&infer(Vec::new())).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<key id=\"via\" for=\"edge\" attr.name=\"via\" attr.type=\"string\"/>"));
        assert!(xml.trim_end().ends_with("</graphml>"));
    }

    #[test]
    fn test_control_characters_are_dropped() {
        let graph = infer(vec![Cell::new(0, "python3\u{1}", "")]);
        let xml = render_graphml(&graph).unwrap();
        assert!(xml.contains("<data key=\"kernel\">python3</data>"));
    }
}
