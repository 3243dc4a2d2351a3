//! Dependencies of the two processes, built once at startup.

use std::sync::Arc;

use projections::{InterventionProjection, PostgresProjectionStore, Projection};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use transport::{EventLog, KinesisEventLog, MessageQueue, SqsMessageQueue};

use crate::checkpoint::{CheckpointStore, PostgresCheckpointStore};
use crate::config::Config;
use crate::error::Result;
use crate::forwarder::ForwarderSettings;
use crate::worker::WorkerSettings;

/// Everything the forwarder talks to.
#[derive(Clone)]
pub struct ForwarderContext {
    pub log: Arc<dyn EventLog>,
    pub queue: Arc<dyn MessageQueue>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub settings: ForwarderSettings,
}

impl ForwarderContext {
    pub fn new(
        log: Arc<dyn EventLog>,
        queue: Arc<dyn MessageQueue>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: ForwarderSettings,
    ) -> Self {
        Self {
            log,
            queue,
            checkpoints,
            settings,
        }
    }

    /// Connects Kinesis, SQS and the checkpoint table described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let stream_name = config.stream_name()?;
        let queue_url = config.queue_url()?;
        let pool = connect_pool(config.database_url()?).await?;

        let checkpoints = PostgresCheckpointStore::new(pool);
        if config.run_migrations {
            checkpoints.run_migrations().await?;
            info!("migrations applied");
        }

        Ok(Self::new(
            Arc::new(KinesisEventLog::connect(&config.aws, stream_name).await),
            Arc::new(SqsMessageQueue::connect(&config.aws, queue_url).await),
            Arc::new(checkpoints),
            config.forwarder,
        ))
    }
}

/// Everything the projection worker talks to.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn MessageQueue>,
    pub dead_letters: Option<Arc<dyn MessageQueue>>,
    pub projection: Arc<dyn Projection>,
    pub settings: WorkerSettings,
}

impl WorkerContext {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        dead_letters: Option<Arc<dyn MessageQueue>>,
        projection: Arc<dyn Projection>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            projection,
            settings,
        }
    }

    /// Connects SQS and the read database described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let queue_url = config.queue_url()?;
        let pool = connect_pool(config.database_url()?).await?;

        let store = PostgresProjectionStore::new(pool);
        if config.run_migrations {
            store.run_migrations().await?;
            info!("migrations applied");
        }

        let settings = config.worker.clone();
        let projection = InterventionProjection::new(Arc::new(store))
            .with_conflict_policy(settings.conflict_policy)
            .with_stale_write_policy(settings.stale_write_policy);

        let queue = SqsMessageQueue::connect(&config.aws, queue_url).await;
        let dead_letters: Option<Arc<dyn MessageQueue>> = match &config.dead_letter_queue_url {
            Some(url) => Some(Arc::new(SqsMessageQueue::connect(&config.aws, url.as_str()).await)),
            None => None,
        };

        Ok(Self::new(
            Arc::new(queue),
            dead_letters,
            Arc::new(projection),
            settings,
        ))
    }
}

async fn connect_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}
