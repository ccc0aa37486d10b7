use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use switchboard_ml::ClassifierModel;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersionInfo {
    pub version: u64,
    pub saved_at: DateTime<Utc>,
    pub vocabulary_size: usize,
    pub intent_count: usize,
    pub history_len: usize,
}

impl ModelVersionInfo {
    fn describe(model: &ClassifierModel, saved_at: DateTime<Utc>) -> Self {
        Self {
            version: model.version,
            saved_at,
            vocabulary_size: model.vocabulary.len(),
            intent_count: model.intents.len(),
            history_len: model.history.len(),
        }
    }
}

/// Durable home for classifier snapshots, including their training history.
pub trait ModelRepository: Send + Sync {
    async fn save_model(&self, model: &ClassifierModel) -> Result<()>;
    async fn load_latest(&self) -> Result<Option<ClassifierModel>>;
    async fn list_versions(&self) -> Result<Vec<ModelVersionInfo>>;
}

#[derive(Clone)]
pub struct MemoryStore {
    models: Arc<RwLock<BTreeMap<u64, (DateTime<Utc>, ClassifierModel)>>>,
    retention: usize,
}

impl MemoryStore {
    /// Keeps the newest `retention` versions.
    pub fn new(retention: usize) -> Self {
        Self {
            models: Arc::default(),
            retention: retention.max(1),
        }
    }
}

impl ModelRepository for MemoryStore {
    async fn save_model(&self, model: &ClassifierModel) -> Result<()> {
        let mut models = self.models.write();
        models.insert(model.version, (Utc::now(), model.clone()));
        while models.len() > self.retention {
            models.pop_first();
        }
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<ClassifierModel>> {
        Ok(self
            .models
            .read()
            .values()
            .next_back()
            .map(|(_, model)| model.clone()))
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersionInfo>> {
        Ok(self
            .models
            .read()
            .values()
            .map(|(saved_at, model)| ModelVersionInfo::describe(model, *saved_at))
            .collect())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    retention: usize,
}

impl SqliteStore {
    /// `sqlite::memory:` URLs get a single connection so every query sees the same database.
    /// Every save prunes all but the newest `retention` versions.
    pub async fn connect(database_url: &str, retention: usize) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self {
            pool,
            retention: retention.max(1),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_snapshots (
              version INTEGER PRIMARY KEY,
              saved_at TEXT NOT NULL,
              vocabulary_size INTEGER NOT NULL,
              intent_count INTEGER NOT NULL,
              history_len INTEGER NOT NULL,
              model_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl ModelRepository for SqliteStore {
    async fn save_model(&self, model: &ClassifierModel) -> Result<()> {
        let model_json = serde_json::to_string(model)?;

        sqlx::query(
            r#"
            INSERT INTO model_snapshots
              (version, saved_at, vocabulary_size, intent_count, history_len, model_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(version) DO UPDATE SET
              saved_at=excluded.saved_at,
              vocabulary_size=excluded.vocabulary_size,
              intent_count=excluded.intent_count,
              history_len=excluded.history_len,
              model_json=excluded.model_json
            "#,
        )
        .bind(model.version as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(model.vocabulary.len() as i64)
        .bind(model.intents.len() as i64)
        .bind(model.history.len() as i64)
        .bind(model_json)
        .execute(&self.pool)
        .await?;

        let pruned = sqlx::query(
            r#"
            DELETE FROM model_snapshots
            WHERE version NOT IN (
              SELECT version FROM model_snapshots ORDER BY version DESC LIMIT ?1
            )
            "#,
        )
        .bind(self.retention as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if pruned > 0 {
            debug!(pruned, retention = self.retention, "old model snapshots pruned");
        }

        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<ClassifierModel>> {
        let row = sqlx::query(
            r#"
            SELECT model_json
            FROM model_snapshots
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let model_json: String = row.get("model_json");
        let model = serde_json::from_str(&model_json).context("stored model snapshot is corrupt")?;
        Ok(Some(model))
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersionInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT version, saved_at, vocabulary_size, intent_count, history_len
            FROM model_snapshots
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let versions = rows
            .into_iter()
            .map(|row| ModelVersionInfo {
                version: row.get::<i64, _>("version") as u64,
                saved_at: row
                    .get::<String, _>("saved_at")
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
                vocabulary_size: row.get::<i64, _>("vocabulary_size") as usize,
                intent_count: row.get::<i64, _>("intent_count") as usize,
                history_len: row.get::<i64, _>("history_len") as usize,
            })
            .collect();

        Ok(versions)
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory(retention: usize) -> Self {
        Self::Memory(MemoryStore::new(retention))
    }

    pub async fn sqlite(database_url: &str, retention: usize) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url, retention).await?;
        Ok(Self::Sqlite(sqlite))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Store::Memory(_) => "memory",
            Store::Sqlite(_) => "sqlite",
        }
    }
}

impl ModelRepository for Store {
    async fn save_model(&self, model: &ClassifierModel) -> Result<()> {
        match self {
            Store::Memory(store) => store.save_model(model).await,
            Store::Sqlite(store) => store.save_model(model).await,
        }
    }

    async fn load_latest(&self) -> Result<Option<ClassifierModel>> {
        match self {
            Store::Memory(store) => store.load_latest().await,
            Store::Sqlite(store) => store.load_latest().await,
        }
    }

    async fn list_versions(&self) -> Result<Vec<ModelVersionInfo>> {
        match self {
            Store::Memory(store) => store.list_versions().await,
            Store::Sqlite(store) => store.list_versions().await,
        }
    }
}
