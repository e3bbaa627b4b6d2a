//! Bridge hints supplied as JSON sidecar files.
//!
//! A sidecar names a data artifact the analyzer cannot see (a database
//! table, a remote object) and ties it to the cells that produce and
//! consume it.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CellscopeError, CellscopeResult};
use crate::export::jsonld::SIDECAR_ID_PREFIX;

pub const DEFAULT_SIDECAR_TYPE: &str = "Data";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Local name under the `ontodt:` vocabulary.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Index of the producing code cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<usize>,
    #[serde(default)]
    pub consumers: Vec<usize>,
    /// Role recorded on each consumer's usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

fn is_local_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Sidecar {
    pub fn from_json(payload: &str) -> CellscopeResult<Self> {
        let sidecar: Sidecar = serde_json::from_str(payload)
            .map_err(|e| CellscopeError::Validation(format!("malformed sidecar: {e}")))?;
        sidecar.validate()?;
        Ok(sidecar)
    }

    pub fn validate(&self) -> CellscopeResult<()> {
        if let Some(id) = &self.id {
            let local = id.trim_start_matches('#');
            if local.is_empty() || local.chars().any(char::is_whitespace) {
                return Err(CellscopeError::Validation(format!(
                    "sidecar id {id:?} must be non-empty without whitespace"
                )));
            }
        }
        if let Some(kind) = &self.kind {
            if !is_local_name(kind) {
                return Err(CellscopeError::Validation(format!(
                    "sidecar type {kind:?} is not a vocabulary term"
                )));
            }
        }
        if self.role.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(CellscopeError::Validation("sidecar role is blank".to_string()));
        }
        Ok(())
    }

    /// Entity id: the supplied id under `#sidecar-`, or a digest of the
    /// sidecar's content.
    pub fn entity_id(&self) -> String {
        match &self.id {
            Some(id) => format!("{SIDECAR_ID_PREFIX}{}", id.trim_start_matches('#')),
            None => {
                let canonical = serde_json::to_string(self).unwrap_or_default();
                let digest = format!("{:x}", Sha256::digest(canonical.as_bytes()));
                format!("{SIDECAR_ID_PREFIX}{}", &digest[..16])
            }
        }
    }

    pub fn entity_type(&self) -> String {
        format!("ontodt:{}", self.kind.as_deref().unwrap_or(DEFAULT_SIDECAR_TYPE))
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.entity_id())
    }
}

/// Validate each sidecar and reject duplicate entity ids.
pub fn validate_sidecars(sidecars: &[Sidecar]) -> CellscopeResult<()> {
    let mut seen = BTreeSet::new();
    for sidecar in sidecars {
        sidecar.validate()?;
        let id = sidecar.entity_id();
        if !seen.insert(id.clone()) {
            return Err(CellscopeError::Validation(format!("duplicate sidecar {id}")));
        }
    }
    Ok(())
}

/// Read sidecar files, failing on the first missing or malformed one.
pub fn load_sidecars<P: AsRef<Path>>(paths: &[P]) -> CellscopeResult<Vec<Sidecar>> {
    let sidecars = paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let payload = fs::read_to_string(path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    CellscopeError::NotFound(format!("sidecar {}", path.display()))
                }
                _ => CellscopeError::Io(e),
            })?;
            Sidecar::from_json(&payload)
        })
        .collect::<CellscopeResult<Vec<_>>>()?;
    validate_sidecars(&sidecars)?;
    Ok(sidecars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_ids() {
        let sidecar = Sidecar::from_json(
            r##"{"id": "#warehouse", "type": "Table", "producer": 0, "consumers": [2], "role": "reference", "note": "x"}"##,
        )
        .unwrap();
        assert_eq!(sidecar.entity_id(), "#sidecar-warehouse");
        assert_eq!(sidecar.entity_type(), "ontodt:Table");
        assert_eq!(sidecar.display_name(), "#sidecar-warehouse");
        assert_eq!(sidecar.consumers, vec![2]);
    }

    #[test]
    fn test_anonymous_id_is_stable() {
        let a = Sidecar::from_json(r#"{"name": "lake", "consumers": [1]}"#).unwrap();
        let b = Sidecar::from_json(r#"{"consumers": [1], "name": "lake"}"#).unwrap();
        assert_eq!(a.entity_id(), b.entity_id());
        assert!(a.entity_id().starts_with("#sidecar-"));
        assert_eq!(a.entity_id().len(), "#sidecar-".len() + 16);
        assert_eq!(a.entity_type(), "ontodt:Data");
    }

    #[test]
    fn test_invalid_sidecars_rejected() {
        for payload in [
            "3",
            r#"{"type": "has space"}"#,
            r##"{"id": "#"}"##,
            r#"{"producer": -1}"#,
            r#"{"role": "  "}"#,
        ] {
            assert!(
                matches!(Sidecar::from_json(payload), Err(CellscopeError::Validation(_))),
                "{payload}"
            );
        }
    }

    #[test]
    fn test_load_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.json");
        fs::write(&a, r#"{"id": "a"}"#).unwrap();
        assert_eq!(load_sidecars(&[&a]).unwrap().len(), 1);

        let missing = tmp.path().join("missing.json");
        assert!(matches!(
            load_sidecars(&[&a, &missing]),
            Err(CellscopeError::NotFound(_))
        ));
        assert!(matches!(
            load_sidecars(&[&a, &a]),
            Err(CellscopeError::Validation(_))
        ));
    }
}
