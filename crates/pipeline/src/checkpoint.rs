//! Durable forwarder position, one sequence number per `(stream, shard)`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use transport::{SequenceNumber, ShardId};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Checkpoint store error: {0}")]
    Store(String),
}

/// Remembers the last sequence number forwarded from a shard.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(
        &self,
        stream: &str,
        shard: &ShardId,
    ) -> Result<Option<SequenceNumber>, CheckpointError>;

    async fn save(
        &self,
        stream: &str,
        shard: &ShardId,
        sequence: &SequenceNumber,
    ) -> Result<(), CheckpointError>;
}

/// In-memory checkpoints. Clones share state, so a test can restart a
/// forwarder against the same store.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    positions: Arc<RwLock<HashMap<(String, ShardId), SequenceNumber>>>,
    save_failures: Arc<RwLock<VecDeque<String>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `save` fail.
    pub async fn fail_next_save(&self, reason: impl Into<String>) {
        self.save_failures.write().await.push_back(reason.into());
    }

    pub async fn get(&self, stream: &str, shard: &ShardId) -> Option<SequenceNumber> {
        self.positions
            .read()
            .await
            .get(&(stream.to_string(), shard.clone()))
            .cloned()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(
        &self,
        stream: &str,
        shard: &ShardId,
    ) -> Result<Option<SequenceNumber>, CheckpointError> {
        Ok(self.get(stream, shard).await)
    }

    async fn save(
        &self,
        stream: &str,
        shard: &ShardId,
        sequence: &SequenceNumber,
    ) -> Result<(), CheckpointError> {
        if let Some(reason) = self.save_failures.write().await.pop_front() {
            return Err(CheckpointError::Store(reason));
        }
        self.positions
            .write()
            .await
            .insert((stream.to_string(), shard.clone()), sequence.clone());
        Ok(())
    }
}

/// Checkpoints in the `forwarder_checkpoints` table.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(
        &self,
        stream: &str,
        shard: &ShardId,
    ) -> Result<Option<SequenceNumber>, CheckpointError> {
        let sequence: Option<String> = sqlx::query_scalar(
            "SELECT sequence_number FROM forwarder_checkpoints \
             WHERE stream_name = $1 AND shard_id = $2",
        )
        .bind(stream)
        .bind(shard.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(sequence.map(SequenceNumber::new))
    }

    #[tracing::instrument(skip(self), fields(shard = %shard, sequence = %sequence))]
    async fn save(
        &self,
        stream: &str,
        shard: &ShardId,
        sequence: &SequenceNumber,
    ) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO forwarder_checkpoints (stream_name, shard_id, sequence_number, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (stream_name, shard_id)
            DO UPDATE SET sequence_number = EXCLUDED.sequence_number, updated_at = NOW()
            "#,
        )
        .bind(stream)
        .bind(shard.as_str())
        .bind(sequence.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
