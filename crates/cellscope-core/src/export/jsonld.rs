//! JSON-LD model of `ro-crate-metadata.json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const RO_CRATE_CONTEXT: &str = "https://w3id.org/ro/crate/1.1/context";
pub const RO_CRATE_PROFILE: &str = "https://w3id.org/ro/crate/1.1";
pub const METADATA_FILE: &str = "ro-crate-metadata.json";

pub const SCHEMA: &str = "http://schema.org/";
pub const PROV: &str = "http://www.w3.org/ns/prov#";
pub const DCAT: &str = "http://www.w3.org/ns/dcat#";
pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const OFLOW: &str = "https://example.org/ontology/ontoflow#";
pub const ONTODT: &str = "https://example.org/ontology/ontodt#";

/// Compact prefixes understood in entity types and property keys.
pub const PREFIXES: &[(&str, &str)] = &[
    ("dcat", DCAT),
    ("oflow", OFLOW),
    ("ontodt", ONTODT),
    ("prov", PROV),
    ("rdf", RDF),
    ("schema", SCHEMA),
];

pub const ACTIVITY_TYPE: &str = "oflow:Activity";
pub const DEPENDENCY_TYPE: &str = "oflow:Dependency";
pub const DATA_TYPE: &str = "ontodt:Data";
pub const SYMBOL_TYPE: &str = "ontodt:Symbol";
pub const USAGE_TYPE: &str = "prov:Usage";

pub const VARIABLE_ID_PREFIX: &str = "#var-";
pub const FILE_ID_PREFIX: &str = "#file-";
pub const EDGE_ID_PREFIX: &str = "#edge-";
pub const USAGE_ID_PREFIX: &str = "#usage-";
pub const SIDECAR_ID_PREFIX: &str = "#sidecar-";

/// `{"@id": ...}` reference to another entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "@id")]
    pub id: String,
}

/// A property value as it appears in the metadata document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Ref(EntityRef),
    Integer(i64),
    Text(String),
    List(Vec<PropertyValue>),
    Other(serde_json::Value),
}

impl PropertyValue {
    pub fn reference(id: impl Into<String>) -> Self {
        PropertyValue::Ref(EntityRef { id: id.into() })
    }

    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    /// Every referenced id, flattening lists.
    pub fn refs(&self) -> Vec<&str> {
        match self {
            PropertyValue::Ref(r) => vec![r.id.as_str()],
            PropertyValue::List(items) => items.iter().flat_map(|i| i.refs()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

fn one_or_many_serialize<S: Serializer>(types: &[String], s: S) -> Result<S::Ok, S::Error> {
    match types {
        [single] => s.serialize_str(single),
        many => many.serialize(s),
    }
}

fn one_or_many_deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(d)? {
        OneOrMany::One(t) => vec![t],
        OneOrMany::Many(ts) => ts,
    })
}

/// One node of the `@graph` array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrateEntity {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(
        rename = "@type",
        serialize_with = "one_or_many_serialize",
        deserialize_with = "one_or_many_deserialize"
    )]
    pub types: Vec<String>,
    #[serde(flatten)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl CrateEntity {
    pub fn new(id: impl Into<String>, types: &[&str]) -> Self {
        Self {
            id: id.into(),
            types: types.iter().map(|t| t.to_string()).collect(),
            properties: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: PropertyValue) -> &mut Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// Append to a list-valued property, creating it on first use.
    /// Appending a reference that is already present is a no-op.
    pub fn push(&mut self, key: &str, value: PropertyValue) {
        let slot = self
            .properties
            .entry(key.to_string())
            .or_insert_with(|| PropertyValue::List(Vec::new()));
        if let PropertyValue::List(items) = slot {
            if !items.contains(&value) {
                items.push(value);
            }
        } else {
            let existing = std::mem::replace(slot, PropertyValue::List(Vec::new()));
            let mut items = vec![existing];
            if !items.contains(&value) {
                items.push(value);
            }
            *slot = PropertyValue::List(items);
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty || expand_term(t) == expand_term(ty))
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(PropertyValue::as_text)
    }
}

/// Expand a compact term: `prefix:local` with a known prefix, absolute IRIs
/// unchanged, bare terms in the schema.org vocabulary.
pub fn expand_term(term: &str) -> String {
    if term.starts_with("http://") || term.starts_with("https://") {
        return term.to_string();
    }
    if let Some((prefix, local)) = term.split_once(':') {
        return match PREFIXES.iter().find(|(p, _)| *p == prefix) {
            Some((_, ns)) => format!("{ns}{local}"),
            None => term.to_string(),
        };
    }
    format!("{SCHEMA}{term}")
}

/// The whole `ro-crate-metadata.json` document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(rename = "@context")]
    pub context: serde_json::Value,
    #[serde(rename = "@graph")]
    pub graph: Vec<CrateEntity>,
}

impl MetadataDocument {
    pub fn new(graph: Vec<CrateEntity>) -> Self {
        let mut local = serde_json::Map::new();
        for (prefix, ns) in PREFIXES {
            if *prefix != "schema" {
                local.insert(prefix.to_string(), serde_json::Value::String(ns.to_string()));
            }
        }
        Self {
            context: serde_json::json!([RO_CRATE_CONTEXT, local]),
            graph,
        }
    }

    pub fn entity(&self, id: &str) -> Option<&CrateEntity> {
        self.graph.iter().find(|e| e.id == id)
    }

    pub fn entities_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = &'a CrateEntity> {
        self.graph.iter().filter(move |e| e.has_type(ty))
    }

    pub fn to_json_pretty(&self) -> crate::errors::CellscopeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_type_serialises_as_string() {
        let entity = CrateEntity::new("#var-x", &[DATA_TYPE]);
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["@type"], "ontodt:Data");
        let multi = CrateEntity::new("cells/cell_0.py", &["File", ACTIVITY_TYPE]);
        let value = serde_json::to_value(&multi).unwrap();
        assert_eq!(value["@type"][1], "oflow:Activity");
    }

    #[test]
    fn test_entity_round_trips_through_json() {
        let mut entity = CrateEntity::new("cells/cell_1.py", &["File", ACTIVITY_TYPE]);
        entity.set("name", PropertyValue::text("Cell 1"));
        entity.set("oflow:cellIndex", PropertyValue::Integer(1));
        entity.push("oflow:hasInput", PropertyValue::reference("#var-df"));
        entity.push("oflow:hasInput", PropertyValue::reference("#var-df"));
        let json = serde_json::to_string(&entity).unwrap();
        let back: CrateEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
        assert_eq!(back.get("oflow:hasInput").unwrap().refs(), vec!["#var-df"]);
        assert_eq!(back.get("oflow:cellIndex").unwrap().as_integer(), Some(1));
    }

    #[test]
    fn test_expand_term() {
        assert_eq!(expand_term("prov:used"), "http://www.w3.org/ns/prov#used");
        assert_eq!(expand_term("name"), "http://schema.org/name");
        assert_eq!(expand_term("https://x.org/a"), "https://x.org/a");
        assert_eq!(expand_term("unknown:thing"), "unknown:thing");
    }

    #[test]
    fn test_has_type_matches_expanded_form() {
        let entity = CrateEntity::new("a", &["https://example.org/ontology/ontoflow#Activity"]);
        assert!(entity.has_type(ACTIVITY_TYPE));
    }
}
