//! Structural checks over a written bundle.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::errors::CellscopeResult;
use crate::export::crate_builder::open_bundle;
use crate::export::jsonld::{ACTIVITY_TYPE, DEPENDENCY_TYPE, USAGE_TYPE};

const ACTIVITY_REF_KEYS: &[&str] = &["oflow:hasInput", "oflow:hasOutput", "prov:used"];
const RELATION_REF_KEYS: &[&str] = &["oflow:fromCell", "oflow:toCell", "prov:entity"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub activities: usize,
    pub relations: usize,
    pub usages: usize,
    pub problems: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Check that the metadata exists, every activity is named and backed by a
/// file, every activity/relation reference resolves, and every qualified
/// usage names an entity and a role.
pub fn validate_crate(crate_dir: &Path) -> CellscopeResult<ValidationReport> {
    let bundle = open_bundle(crate_dir)?;
    let doc = &bundle.metadata;
    let ids: HashSet<&str> = doc.graph.iter().map(|e| e.id.as_str()).collect();
    let mut report = ValidationReport::default();

    for activity in doc.entities_of_type(ACTIVITY_TYPE) {
        report.activities += 1;
        if activity.name().is_none() {
            report
                .problems
                .push(format!("activity {} has no name", activity.id));
        }
        if !crate_dir.join(&activity.id).is_file() {
            report
                .problems
                .push(format!("activity {} has no source file", activity.id));
        }
        for key in ACTIVITY_REF_KEYS {
            for target in activity.get(key).map(|v| v.refs()).unwrap_or_default() {
                if !ids.contains(target) {
                    report.problems.push(format!(
                        "activity {} references missing entity {target} via {key}",
                        activity.id
                    ));
                }
            }
        }
        for usage_id in activity
            .get("prov:qualifiedUsage")
            .map(|v| v.refs())
            .unwrap_or_default()
        {
            report.usages += 1;
            let Some(usage) = doc.entity(usage_id) else {
                report.problems.push(format!(
                    "activity {} references missing usage {usage_id}",
                    activity.id
                ));
                continue;
            };
            if !usage.has_type(USAGE_TYPE) {
                report
                    .problems
                    .push(format!("usage {usage_id} is not typed {USAGE_TYPE}"));
            }
            let entities = usage.get("prov:entity").map(|v| v.refs()).unwrap_or_default();
            let has_role = usage
                .get("prov:hadRole")
                .and_then(|v| v.as_text())
                .is_some_and(|r| !r.is_empty());
            if entities.is_empty() || !has_role {
                report
                    .problems
                    .push(format!("usage {usage_id} is missing prov:entity or prov:hadRole"));
            }
            for target in entities {
                if !ids.contains(target) {
                    report.problems.push(format!(
                        "usage {usage_id} references missing entity {target}"
                    ));
                }
            }
        }
    }

    for relation in doc.entities_of_type(DEPENDENCY_TYPE) {
        report.relations += 1;
        for key in RELATION_REF_KEYS {
            let targets = relation.get(key).map(|v| v.refs()).unwrap_or_default();
            if targets.is_empty() {
                report
                    .problems
                    .push(format!("relation {} is missing {key}", relation.id));
            }
            for target in targets {
                if !ids.contains(target) {
                    report.problems.push(format!(
                        "relation {} references missing entity {target} via {key}",
                        relation.id
                    ));
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::crate_builder::CrateBuilder;
    use crate::export::jsonld::{CrateEntity, MetadataDocument, PropertyValue, METADATA_FILE};
    use crate::graph::{infer, merge};
    use crate::models::{Cell, CellFacts, ReviewHints};

    #[test]
    fn test_built_bundle_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = infer(vec![
            Cell::new(0, "python3", "a = 1").with_facts(CellFacts {
                vars_defined: vec!["a".to_string()],
                ..CellFacts::default()
            }),
            Cell::new(1, "python3", "print(a)").with_facts(CellFacts {
                vars_used: vec!["a".to_string(), "print".to_string()],
                ..CellFacts::default()
            }),
        ]);
        let hints = ReviewHints::default();
        let bundle = CrateBuilder::new()
            .with_renderer(None)
            .build(&merge(&graph, &hints), tmp.path())
            .unwrap();
        let report = validate_crate(&bundle.crate_dir).unwrap();
        assert!(report.is_valid(), "{:?}", report.problems);
        assert_eq!(report.activities, 2);
        assert_eq!(report.relations, 1);
        assert_eq!(report.usages, 0);
    }

    #[test]
    fn test_usage_without_role_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("cells")).unwrap();
        std::fs::write(tmp.path().join("cells/cell_0.py"), "").unwrap();
        let mut activity = CrateEntity::new("cells/cell_0.py", &["File", ACTIVITY_TYPE]);
        activity.set("name", PropertyValue::text("Cell 0"));
        activity.push("prov:qualifiedUsage", PropertyValue::reference("#usage-0-var-a"));
        activity.push("prov:qualifiedUsage", PropertyValue::reference("#usage-0-var-b"));
        let mut var = CrateEntity::new("#var-a", &["ontodt:Data"]);
        var.set("name", PropertyValue::text("a"));
        let mut usage = CrateEntity::new("#usage-0-var-a", &[USAGE_TYPE]);
        usage.set("prov:entity", PropertyValue::reference("#var-a"));
        let doc = MetadataDocument::new(vec![activity, var, usage]);
        std::fs::write(tmp.path().join(METADATA_FILE), doc.to_json_pretty().unwrap()).unwrap();

        let report = validate_crate(tmp.path()).unwrap();
        assert_eq!(report.usages, 2);
        assert_eq!(report.problems.len(), 2, "{:?}", report.problems);
        assert!(report.problems[0].contains("missing prov:entity or prov:hadRole"));
        assert!(report.problems[1].contains("missing usage #usage-0-var-b"));
    }

    #[test]
    fn test_bundle_with_usages_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = infer(vec![
            Cell::new(0, "python3", "").with_facts(CellFacts {
                files_written: vec!["out.csv".to_string()],
                ..CellFacts::default()
            }),
            Cell::new(1, "python3", "").with_facts(CellFacts {
                files_read: vec!["out.csv".to_string()],
                ..CellFacts::default()
            }),
        ]);
        let hints = ReviewHints::default();
        let bundle = CrateBuilder::new()
            .with_renderer(None)
            .build(&merge(&graph, &hints), tmp.path())
            .unwrap();
        let report = validate_crate(&bundle.crate_dir).unwrap();
        assert!(report.is_valid(), "{:?}", report.problems);
        assert_eq!(report.usages, 1);
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("cells")).unwrap();
        std::fs::write(tmp.path().join("cells/cell_0.py"), "").unwrap();
        let mut activity = crate::export::jsonld::CrateEntity::new(
            "cells/cell_0.py",
            &["File", ACTIVITY_TYPE],
        );
        activity.set("name", PropertyValue::text("Cell 0"));
        activity.push("prov:used", PropertyValue::reference("#var-ghost"));
        let doc = MetadataDocument::new(vec![activity]);
        std::fs::write(tmp.path().join(METADATA_FILE), doc.to_json_pretty().unwrap()).unwrap();

        let report = validate_crate(tmp.path()).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.problems.len(), 1);
        assert!(report.problems[0].contains("#var-ghost"));
    }
}
