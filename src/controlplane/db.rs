use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::status::ConfigStatus;

pub const KEY_STATUS: &str = "status";
pub const KEY_DOMAIN: &str = "domain";
pub const KEY_GITHUB_REPO: &str = "github_repo";

/// Async-safe handle to the control-plane database.
///
/// Wraps `ConfigDb` behind `Arc<Mutex>` and runs every query on tokio's
/// blocking pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ConfigDb>>,
}

impl DbHandle {
    pub fn new(db: ConfigDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ConfigDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    pub async fn status(&self) -> Result<ConfigStatus> {
        self.call(|db| db.status()).await
    }

    pub async fn set_status(&self, status: ConfigStatus) -> Result<()> {
        self.call(move |db| db.set(KEY_STATUS, status.as_str())).await
    }
}

/// Key/value configuration table.
pub struct ConfigDb {
    conn: Connection,
}

impl ConfigDb {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                ",
            )
            .context("Failed to create config table")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                params![KEY_STATUS, ConfigStatus::Unconfigured.as_str()],
            )
            .context("Failed to seed configuration status")?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read config key {}", key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("Failed to write config key {}", key))?;
        Ok(())
    }

    /// Current status. A missing row reads as `Unconfigured`.
    pub fn status(&self) -> Result<ConfigStatus> {
        match self.get(KEY_STATUS)? {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg),
            None => Ok(ConfigStatus::Unconfigured),
        }
    }
}
