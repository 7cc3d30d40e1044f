// SPDX-License-Identifier: EUPL-1.2

//! Content-addressed evidence storage.
//!
//! A content id is the unpadded base64url SHA-256 of the stored bytes, so
//! `put` is idempotent and `get` can re-verify what it returns.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("evidence store unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: String,
    pub url: String,
}

/// Derive the content id of a byte string.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes`; identical bytes always yield the same id.
    async fn put(&self, bytes: &[u8]) -> Result<ContentRef, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

fn public_url(base: &str, id: &str) -> String {
    format!("{}/evidence/{id}", base.trim_end_matches('/'))
}

// ── Redis ─────────────────────────────────────────────────────────────────────

/// Stores evidence under `evidence:<id>` with `SET NX`.
pub struct RedisContentStore {
    conn: ConnectionManager,
    public_base: String,
}

impl RedisContentStore {
    pub fn new(conn: ConnectionManager, public_base: impl Into<String>) -> Self {
        Self {
            conn,
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl ContentStore for RedisContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<ContentRef, StorageError> {
        let id = content_id(bytes);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(format!("evidence:{id}"))
            .arg(bytes)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(ContentRef {
            url: public_url(&self.public_base, &id),
            id,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = redis::cmd("GET")
            .arg(format!("evidence:{id}"))
            .query_async(&mut conn)
            .await?;
        Ok(bytes)
    }
}

// ── PostgreSQL ────────────────────────────────────────────────────────────────

/// Fallback store in the `evidence_objects` table when Redis is not configured.
pub struct PgContentStore {
    pool: PgPool,
    public_base: String,
}

impl PgContentStore {
    pub fn new(pool: PgPool, public_base: impl Into<String>) -> Self {
        Self {
            pool,
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<ContentRef, StorageError> {
        let id = content_id(bytes);
        sqlx::query(
            "INSERT INTO evidence_objects (id, body) VALUES ($1, $2)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&id)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(ContentRef {
            url: public_url(&self.public_base, &id),
            id,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let body: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT body FROM evidence_objects WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(body)
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Process-local store. `set_available(false)` simulates an outage.
pub struct MemoryContentStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
    public_base: String,
}

impl MemoryContentStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            public_base: public_base.into(),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<ContentRef, StorageError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".into()));
        }
        let id = content_id(bytes);
        self.objects
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(ContentRef {
            url: public_url(&self.public_base, &id),
            id,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".into()));
        }
        Ok(self.objects.read().await.get(id).cloned())
    }
}
