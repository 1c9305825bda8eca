//! SQLite credential store for `whatsapp-rust`.
//!
//! All protocol state lives in one key/value table partitioned by scope:
//!
//! ```text
//! credentials(scope TEXT, key BLOB, value BLOB, PRIMARY KEY (scope, key))
//! ```
//!
//! The `wacore` store traits (device, signal, app-sync, protocol) are thin
//! adapters over [`SessionStore::get`] / [`SessionStore::put`]. Every write
//! runs in a transaction that rolls back if dropped before commit, and the
//! database runs in WAL mode with `synchronous=FULL`, so a crash mid-write
//! leaves the previous credentials intact.

mod app_sync_store;
mod device_store;
mod protocol_store;
mod signal_store;


use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use wabridge_core::{error::BridgeError, traits::CredentialStore};

/// Scope holding the serialized device identity.
pub(crate) const DEVICE_SCOPE: &str = "device";
/// Key of the single device row.
pub(crate) const DEVICE_KEY: &[u8] = b"1";

/// SQLite-backed WhatsApp credential store. Cheap to clone (shares the pool).
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (creating if missing) the store at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self, BridgeError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| BridgeError::Storage(format!("invalid session db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| BridgeError::Storage(format!("failed to open session db: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS credentials (
                scope TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (scope, key)
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| BridgeError::Storage(format!("session db schema failed: {e}")))?;

        info!("WhatsApp session store at {}", db_path.display());
        Ok(Self { pool })
    }

    pub(crate) async fn get(
        &self,
        scope: &str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, sqlx::Error> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM credentials WHERE scope = ? AND key = ?")
                .bind(scope)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub(crate) async fn put(
        &self,
        scope: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), sqlx::Error> {
        self.put_many(scope, &[(key, value)]).await
    }

    /// Write several entries of one scope atomically.
    pub(crate) async fn put_many(
        &self,
        scope: &str,
        entries: &[(&[u8], &[u8])],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query("INSERT OR REPLACE INTO credentials (scope, key, value) VALUES (?, ?, ?)")
                .bind(scope)
                .bind(*key)
                .bind(*value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    pub(crate) async fn remove(&self, scope: &str, key: &[u8]) -> Result<(), sqlx::Error> {
        self.remove_many(scope, &[key]).await
    }

    pub(crate) async fn remove_many(&self, scope: &str, keys: &[&[u8]]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM credentials WHERE scope = ? AND key = ?")
                .bind(scope)
                .bind(*key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    /// All `(key, value)` pairs of a scope.
    pub(crate) async fn entries(
        &self,
        scope: &str,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, sqlx::Error> {
        sqlx::query_as("SELECT key, value FROM credentials WHERE scope = ?")
            .bind(scope)
            .fetch_all(&self.pool)
            .await
    }

    /// Read and delete every key of a scope in one transaction.
    pub(crate) async fn take_keys(&self, scope: &str) -> Result<Vec<Vec<u8>>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as("SELECT key FROM credentials WHERE scope = ?")
            .bind(scope)
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM credentials WHERE scope = ?")
            .bind(scope)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    pub(crate) async fn clear_scope(&self, scope: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM credentials WHERE scope = ?")
            .bind(scope)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

#[async_trait]
impl CredentialStore for SessionStore {
    async fn exists(&self) -> Result<bool, BridgeError> {
        self.get(DEVICE_SCOPE, DEVICE_KEY)
            .await
            .map(|row| row.is_some())
            .map_err(|e| BridgeError::Storage(format!("session db read failed: {e}")))
    }

    async fn erase(&self) -> Result<(), BridgeError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BridgeError::Storage(format!("session db erase failed: {e}")))?;
        sqlx::query("DELETE FROM credentials")
            .execute(&mut *tx)
            .await
            .map_err(|e| BridgeError::Storage(format!("session db erase failed: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| BridgeError::Storage(format!("session db erase failed: {e}")))?;
        info!("WhatsApp credentials erased");
        Ok(())
    }
}

/// Composite key for two string parts.
pub(crate) fn pair_key(a: &str, b: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + b.len() + 1);
    key.extend_from_slice(a.as_bytes());
    key.push(0);
    key.extend_from_slice(b.as_bytes());
    key
}

/// Decode a key that was stored from a `&str`.
pub(crate) fn key_string(key: Vec<u8>) -> Option<String> {
    String::from_utf8(key).ok()
}
