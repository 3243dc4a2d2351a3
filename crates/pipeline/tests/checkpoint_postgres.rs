//! PostgreSQL integration tests for forwarder checkpoints.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p pipeline --test checkpoint_postgres
//! ```

use std::sync::Arc;

use pipeline::{CheckpointStore, PostgresCheckpointStore};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use transport::{SequenceNumber, ShardId};

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresCheckpointStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresCheckpointStore {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();

    sqlx::query("TRUNCATE TABLE forwarder_checkpoints")
        .execute(&pool)
        .await
        .unwrap();

    PostgresCheckpointStore::new(pool)
}

#[tokio::test]
#[serial]
async fn test_missing_checkpoint_is_none() {
    let store = get_test_store().await;
    let loaded = store
        .load("intervention-events", &ShardId::new("shardId-000000000000"))
        .await
        .unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
#[serial]
async fn test_save_then_load() {
    let store = get_test_store().await;
    let shard = ShardId::new("shardId-000000000000");

    let sequence =
        SequenceNumber::new("49590338271490256608559692538361571095921575989136588898");

    store
        .save("intervention-events", &shard, &sequence)
        .await
        .unwrap();

    let loaded = store.load("intervention-events", &shard).await.unwrap();
    assert_eq!(loaded, Some(sequence));
}

#[tokio::test]
#[serial]
async fn test_save_overwrites_and_is_scoped_by_stream() {
    let store = get_test_store().await;
    let shard = ShardId::new("shardId-000000000000");

    store
        .save("intervention-events", &shard, &SequenceNumber::new("1"))
        .await
        .unwrap();
    store
        .save("intervention-events", &shard, &SequenceNumber::new("2"))
        .await
        .unwrap();
    store
        .save("other-stream", &shard, &SequenceNumber::new("7"))
        .await
        .unwrap();

    assert_eq!(
        store.load("intervention-events", &shard).await.unwrap(),
        Some(SequenceNumber::new("2"))
    );
    assert_eq!(
        store.load("other-stream", &shard).await.unwrap(),
        Some(SequenceNumber::new("7"))
    );
}
