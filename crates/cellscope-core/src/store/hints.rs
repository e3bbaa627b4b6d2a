//! Hint stores: the caller-persisted review hints blob, keyed by notebook.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::errors::CellscopeResult;
use crate::models::ReviewHints;
use crate::store::schema;

/// Key-value store of reviewed hints.
pub trait HintStore: Send + Sync {
    fn load(&self, notebook: &str) -> CellscopeResult<Option<ReviewHints>>;
    fn save(&self, notebook: &str, hints: &ReviewHints) -> CellscopeResult<()>;
    /// Returns whether an entry existed.
    fn remove(&self, notebook: &str) -> CellscopeResult<bool>;
}

/// In-process store; contents die with the process.
#[derive(Default)]
pub struct MemoryHintStore {
    entries: Mutex<HashMap<String, ReviewHints>>,
}

impl MemoryHintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HintStore for MemoryHintStore {
    fn load(&self, notebook: &str) -> CellscopeResult<Option<ReviewHints>> {
        Ok(self.entries.lock().get(notebook).cloned())
    }

    fn save(&self, notebook: &str, hints: &ReviewHints) -> CellscopeResult<()> {
        self.entries
            .lock()
            .insert(notebook.to_string(), hints.clone());
        Ok(())
    }

    fn remove(&self, notebook: &str) -> CellscopeResult<bool> {
        Ok(self.entries.lock().remove(notebook).is_some())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// SQLite-backed store. Each call opens its own connection.
pub struct SqliteHintStore {
    db_path: PathBuf,
}

impl SqliteHintStore {
    /// Open (and initialise) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> CellscopeResult<Self> {
        let raw = db_path.as_ref().to_string_lossy();
        let db_path = expand_tilde(&raw);
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::init_schema(&conn)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> CellscopeResult<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    /// Stored notebook keys, most recently updated first.
    pub fn notebooks(&self) -> CellscopeResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT notebook FROM review_hints ORDER BY updated_at DESC, notebook;")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl HintStore for SqliteHintStore {
    fn load(&self, notebook: &str) -> CellscopeResult<Option<ReviewHints>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT payload FROM review_hints WHERE notebook = ?1;",
            params![notebook],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(payload) => Ok(Some(ReviewHints::from_json(&payload)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, notebook: &str, hints: &ReviewHints) -> CellscopeResult<()> {
        let payload = hints.to_json()?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO review_hints(notebook, payload, updated_at) \
             VALUES (?1, ?2, CURRENT_TIMESTAMP) \
             ON CONFLICT(notebook) DO UPDATE SET \
               payload = excluded.payload, updated_at = excluded.updated_at;",
            params![notebook, payload],
        )?;
        Ok(())
    }

    fn remove(&self, notebook: &str) -> CellscopeResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "DELETE FROM review_hints WHERE notebook = ?1;",
            params![notebook],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints() -> ReviewHints {
        ReviewHints::from_json(r#"{"roles": {"df": "output"}, "layout": "wide"}"#).unwrap()
    }

    fn exercise(store: &dyn HintStore) {
        assert!(store.load("a.ipynb").unwrap().is_none());
        store.save("a.ipynb", &hints()).unwrap();
        assert_eq!(store.load("a.ipynb").unwrap(), Some(hints()));

        let mut updated = hints();
        updated.roles.insert("model".to_string(), "output".to_string());
        store.save("a.ipynb", &updated).unwrap();
        assert_eq!(store.load("a.ipynb").unwrap(), Some(updated));

        assert!(store.remove("a.ipynb").unwrap());
        assert!(!store.remove("a.ipynb").unwrap());
        assert!(store.load("a.ipynb").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_round_trip() {
        exercise(&MemoryHintStore::new());
    }

    #[test]
    fn test_sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteHintStore::open(dir.path().join("nested/hints.db")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.db");
        SqliteHintStore::open(&path)
            .unwrap()
            .save("b.ipynb", &hints())
            .unwrap();
        let reopened = SqliteHintStore::open(&path).unwrap();
        assert_eq!(reopened.load("b.ipynb").unwrap(), Some(hints()));
        assert_eq!(reopened.notebooks().unwrap(), vec!["b.ipynb"]);
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
        assert_eq!(expand_tilde("rel/x.db"), PathBuf::from("rel/x.db"));
    }
}
