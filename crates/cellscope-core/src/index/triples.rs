//! Bundle → triple flattening and SPARQL `INSERT DATA` rendering.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexSet;

use crate::export::jsonld::{
    expand_term, CrateEntity, MetadataDocument, PropertyValue, ACTIVITY_TYPE, DEPENDENCY_TYPE,
    FILE_ID_PREFIX, PREFIXES, RDF, SIDECAR_ID_PREFIX, USAGE_TYPE, VARIABLE_ID_PREFIX,
};

const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

/// Fallback base when a bundle has no on-disk location.
pub const DEFAULT_BASE_URI: &str = "https://cellscope.local/crate/";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    Literal {
        value: String,
        datatype: Option<String>,
    },
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Literal {
                value,
                datatype: None,
            } => write!(f, "\"{}\"", escape_literal(value)),
            Term::Literal {
                value,
                datatype: Some(dt),
            } => write!(f, "\"{}\"^^<{dt}>", escape_literal(value)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// Escape a literal per N-Triples.
pub fn escape_literal(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => result.push_str(&format!("\\u{:04X}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

fn push_encoded(out: &mut String, ch: char) {
    let mut buf = [0u8; 4];
    for b in ch.encode_utf8(&mut buf).bytes() {
        out.push_str(&format!("%{b:02X}"));
    }
}

fn starts_escape(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    bytes.len() >= 3 && bytes[1].is_ascii_hexdigit() && bytes[2].is_ascii_hexdigit()
}

/// Percent-encode characters that may not appear inside `<...>`. A `%`
/// is kept only when `keep_escapes` is set and it starts a valid escape.
fn encode_with(raw: &str, keep_escapes: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, ch) in raw.char_indices() {
        match ch {
            '%' if keep_escapes && starts_escape(&raw[i..]) => out.push('%'),
            '%' | ' ' | '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => {
                push_encoded(&mut out, ch)
            }
            c if c.is_control() => push_encoded(&mut out, c),
            c => out.push(c),
        }
    }
    out
}

/// Encode an IRI that may already carry percent escapes.
fn encode_iri(raw: &str) -> String {
    encode_with(raw, true)
}

fn is_absolute_iri(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://") || value.starts_with("file://")
}

/// Resolve an entity id against `base` (`#x` → `base + x`).
pub fn resolve_id(base: &str, id: &str) -> String {
    if is_absolute_iri(id) {
        return encode_iri(id);
    }
    let local = id.strip_prefix('#').unwrap_or(id);
    let local = if local == "./" { "" } else { local };
    // Local ids come from raw names, so every `%` in them is literal.
    format!("{}{}", encode_iri(base), encode_with(local, false))
}

/// `base` with a trailing slash.
pub fn ensure_trailing_slash(base: &str) -> String {
    if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Activity,
    Variable,
    File,
    Sidecar,
    Relation,
    Usage,
}

fn section(entity: &CrateEntity) -> Option<Section> {
    if entity.has_type(ACTIVITY_TYPE) {
        Some(Section::Activity)
    } else if entity.has_type(DEPENDENCY_TYPE) {
        Some(Section::Relation)
    } else if entity.has_type(USAGE_TYPE) {
        Some(Section::Usage)
    } else if entity.id.starts_with(VARIABLE_ID_PREFIX) {
        Some(Section::Variable)
    } else if entity.id.starts_with(FILE_ID_PREFIX) {
        Some(Section::File)
    } else if entity.id.starts_with(SIDECAR_ID_PREFIX) {
        Some(Section::Sidecar)
    } else {
        None
    }
}

fn cell_index_of(doc: &MetadataDocument, id: &str) -> i64 {
    doc.entity(id)
        .and_then(|e| e.get("oflow:cellIndex"))
        .and_then(PropertyValue::as_integer)
        .unwrap_or(i64::MAX)
}

fn kind_rank(kind: &str) -> u8 {
    match kind {
        "variable" => 0,
        "file" => 1,
        "cross-kernel" => 2,
        _ => 3,
    }
}

fn relation_key(doc: &MetadataDocument, e: &CrateEntity) -> (i64, i64, u8) {
    let cell = |key: &str| {
        e.get(key)
            .and_then(|v| v.refs().first().map(|id| cell_index_of(doc, id)))
            .unwrap_or(i64::MAX)
    };
    let kind = e
        .get("oflow:kind")
        .and_then(PropertyValue::as_text)
        .map(kind_rank)
        .unwrap_or(u8::MAX);
    (cell("oflow:fromCell"), cell("oflow:toCell"), kind)
}

fn compare(doc: &MetadataDocument, a: &CrateEntity, b: &CrateEntity, s: Section) -> Ordering {
    match s {
        Section::Activity => cell_index_of(doc, &a.id)
            .cmp(&cell_index_of(doc, &b.id))
            .then_with(|| a.id.cmp(&b.id)),
        Section::Variable | Section::File => a
            .name()
            .unwrap_or(&a.id)
            .cmp(&b.name().unwrap_or(&b.id))
            .then_with(|| a.id.cmp(&b.id)),
        // Stable sort keeps document order between equal keys.
        Section::Relation => relation_key(doc, a).cmp(&relation_key(doc, b)),
        Section::Sidecar | Section::Usage => Ordering::Equal,
    }
}

fn push_value(
    out: &mut IndexSet<Triple>,
    base: &str,
    subject: &str,
    predicate: &str,
    value: &PropertyValue,
) {
    let object = match value {
        PropertyValue::Ref(r) => Term::Iri(resolve_id(base, &r.id)),
        PropertyValue::Text(t) => Term::Literal {
            value: t.clone(),
            datatype: None,
        },
        PropertyValue::Integer(i) => Term::Literal {
            value: i.to_string(),
            datatype: Some(XSD_INTEGER.to_string()),
        },
        PropertyValue::List(items) => {
            for item in items {
                push_value(out, base, subject, predicate, item);
            }
            return;
        }
        PropertyValue::Other(v) => match v {
            serde_json::Value::Null => return,
            serde_json::Value::String(s) => Term::Literal {
                value: s.clone(),
                datatype: None,
            },
            other => Term::Literal {
                value: other.to_string(),
                datatype: None,
            },
        },
    };
    out.insert(Triple {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object,
    });
}

/// Flatten the provenance entities of a bundle into an ordered, duplicate
/// free triple sequence.
///
/// Order: activities by cell index, variables by name, files by name,
/// sidecars, relations by (source cell, target cell, kind), then usages.
/// Sidecars and usages keep document order. Within an entity, its types
/// come first, then properties in key order.
pub fn flatten(doc: &MetadataDocument, base_uri: &str) -> Vec<Triple> {
    let base = ensure_trailing_slash(base_uri);
    let mut grouped: Vec<(Section, &CrateEntity)> = doc
        .graph
        .iter()
        .filter_map(|e| section(e).map(|s| (s, e)))
        .collect();
    grouped.sort_by(|(sa, a), (sb, b)| sa.cmp(sb).then_with(|| compare(doc, a, b, *sa)));

    let mut triples = IndexSet::new();
    for (_, entity) in grouped {
        let subject = resolve_id(&base, &entity.id);
        for ty in &entity.types {
            triples.insert(Triple {
                subject: subject.clone(),
                predicate: format!("{RDF}type"),
                object: Term::Iri(encode_iri(&expand_term(ty))),
            });
        }
        for (key, value) in &entity.properties {
            let predicate = encode_iri(&expand_term(key));
            push_value(&mut triples, &base, &subject, &predicate, value);
        }
    }
    triples.into_iter().collect()
}

/// Render a single `INSERT DATA` statement.
pub fn render_insert(triples: &[Triple]) -> String {
    let mut prefixes: Vec<String> = PREFIXES
        .iter()
        .map(|(p, iri)| format!("PREFIX {p}: <{iri}>"))
        .collect();
    prefixes.sort();

    let mut out = prefixes.join("\n");
    out.push_str("\n\nINSERT DATA {\n");
    for triple in triples {
        out.push_str("  ");
        out.push_str(&triple.to_string());
        out.push('\n');
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::crate_builder::CrateBuilder;
    use crate::graph::{infer, merge};
    use crate::models::{Cell, CellFacts, ReviewHints};

    fn doc() -> MetadataDocument {
        let graph = infer(vec![
            Cell::new(0, "python3", "b = 1\na = 2").with_facts(CellFacts {
                vars_defined: vec!["b".to_string(), "a".to_string()],
                files_written: vec!["z.csv".to_string()],
                ..CellFacts::default()
            }),
            Cell::new(1, "python3", "print(a, b)").with_facts(CellFacts {
                vars_used: vec!["a".to_string(), "b".to_string()],
                files_read: vec!["z.csv".to_string()],
                ..CellFacts::default()
            }),
        ]);
        let hints = ReviewHints::default();
        let annotated = merge(&graph, &hints);
        CrateBuilder::new().metadata(&annotated, false)
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("a\"b\\c\nd\te\u{1}"), "a\\\"b\\\\c\\nd\\te\\u0001");
    }

    #[test]
    fn test_resolve_id() {
        let base = "file:///tmp/run/ro-crate/";
        assert_eq!(resolve_id(base, "#var-x"), "file:///tmp/run/ro-crate/var-x");
        assert_eq!(resolve_id(base, "cells/cell_0.py"), "file:///tmp/run/ro-crate/cells/cell_0.py");
        assert_eq!(resolve_id(base, "#file-my data.csv"), "file:///tmp/run/ro-crate/file-my%20data.csv");
        assert_eq!(resolve_id(base, "https://x.org/a"), "https://x.org/a");
    }

    #[test]
    fn test_percent_in_names_is_encoded() {
        let base = "file:///tmp/my%20run/";
        assert_eq!(resolve_id(base, "#file-a%2Fb.csv"), "file:///tmp/my%20run/file-a%252Fb.csv");
        assert_eq!(resolve_id(base, "#file-100%.csv"), "file:///tmp/my%20run/file-100%25.csv");
        assert_eq!(encode_iri("https://x.org/a%2Fb"), "https://x.org/a%2Fb");
        assert_eq!(encode_iri("https://x.org/50%"), "https://x.org/50%25");
        assert_eq!(encode_iri("https://x.org/%zz"), "https://x.org/%25zz");
    }

    #[test]
    fn test_flatten_section_order() {
        let triples = flatten(&doc(), "https://ex.org/c");
        let subjects: IndexSet<&str> = triples.iter().map(|t| t.subject.as_str()).collect();
        let subjects: Vec<&str> = subjects.into_iter().collect();
        assert_eq!(
            subjects,
            vec![
                "https://ex.org/c/cells/cell_0.py",
                "https://ex.org/c/cells/cell_1.py",
                "https://ex.org/c/var-a",
                "https://ex.org/c/var-b",
                "https://ex.org/c/file-z.csv",
                "https://ex.org/c/edge-0",
                "https://ex.org/c/edge-1",
                "https://ex.org/c/edge-2",
                "https://ex.org/c/usage-1-file-z.csv",
            ]
        );
    }

    #[test]
    fn test_flatten_is_deterministic_and_unique() {
        let a = flatten(&doc(), DEFAULT_BASE_URI);
        let b = flatten(&doc(), DEFAULT_BASE_URI);
        assert_eq!(a, b);
        let unique: IndexSet<&Triple> = a.iter().collect();
        assert_eq!(unique.len(), a.len());
    }

    #[test]
    fn test_types_and_integers_render() {
        let triples = flatten(&doc(), DEFAULT_BASE_URI);
        let rendered: Vec<String> = triples.iter().map(|t| t.to_string()).collect();
        assert!(rendered.contains(
            &"<https://cellscope.local/crate/var-a> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <https://example.org/ontology/ontodt#Data> ."
                .to_string()
        ));
        assert!(rendered.iter().any(|l| l.contains(
            "<https://example.org/ontology/ontoflow#cellIndex> \"1\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        )));
    }

    #[test]
    fn test_render_insert_layout() {
        let triples = vec![Triple {
            subject: "https://ex.org/s".to_string(),
            predicate: "http://schema.org/name".to_string(),
            object: Term::Literal {
                value: "say \"hi\"".to_string(),
                datatype: None,
            },
        }];
        let text = render_insert(&triples);
        assert!(text.starts_with("PREFIX dcat: <http://www.w3.org/ns/dcat#>\n"));
        assert!(text.contains("PREFIX schema: <http://schema.org/>\n\nINSERT DATA {\n"));
        assert!(text.contains("  <https://ex.org/s> <http://schema.org/name> \"say \\\"hi\\\"\" .\n"));
        assert!(text.ends_with("}\n"));
    }
}
