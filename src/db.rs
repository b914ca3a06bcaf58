use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{ForumError, Result};

/// Key the bearer token is persisted under.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Persistent home of the bearer token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct SqliteTokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTokenStore {
    /// Opens (or creates) `session.db` in `data_dir`, defaulting to `~/.forum_reader`.
    pub fn open_default(data_dir: Option<&Path>) -> Result<Self> {
        let app_data_dir = match data_dir {
            Some(dir) => dir.to_path_buf(),
            None => Self::get_app_data_dir()?,
        };
        if !app_data_dir.exists() {
            std::fs::create_dir_all(&app_data_dir)
                .map_err(|e| ForumError::Storage(format!("Could not create {}: {}", app_data_dir.display(), e)))?;
        }

        Self::open(&app_data_dir.join("session.db"))
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS session (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_app_data_dir() -> Result<PathBuf> {
        let home_dir = dirs_next::home_dir()
            .ok_or_else(|| ForumError::Storage("Could not find home directory".to_string()))?;
        Ok(home_dir.join(".forum_reader"))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ForumError::Storage("Failed to lock database connection".to_string()))?;
        Ok(f(&conn)?)
    }
}

impl TokenStore for SqliteTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let token: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM session WHERE key = ?1",
                params![ACCESS_TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()
        })?;

        // An empty token means signed out
        Ok(token.filter(|t| !t.is_empty()))
    }

    fn save(&self, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![ACCESS_TOKEN_KEY, token, chrono::Utc::now().to_rfc3339()],
            )
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM session WHERE key = ?1", params![ACCESS_TOKEN_KEY]))?;
        Ok(())
    }
}

/// Process-local token store, nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.token
            .lock()
            .map_err(|_| ForumError::Storage("Failed to lock token".to_string()))
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot()?.clone().filter(|t| !t.is_empty()))
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.slot()? = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_token_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");

        let store = SqliteTokenStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.save("token-1").unwrap();
        store.save("token-2").unwrap();
        drop(store);

        let reopened = SqliteTokenStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), Some("token-2".to_string()));

        reopened.clear().unwrap();
        assert_eq!(reopened.load().unwrap(), None);
    }

    #[test]
    fn open_default_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("forum");

        let store = SqliteTokenStore::open_default(Some(&data_dir)).unwrap();
        store.save("abc").unwrap();
        assert!(data_dir.join("session.db").exists());
    }

    #[test]
    fn empty_token_reads_as_absent() {
        let store = MemoryTokenStore::new();
        store.save("").unwrap();
        assert_eq!(store.load().unwrap(), None);

        let store = MemoryTokenStore::with_token("t");
        assert_eq!(store.load().unwrap(), Some("t".to_string()));
    }
}
