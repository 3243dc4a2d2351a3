//! The two background processes of the intervention event pipeline.
//!
//! - [`forwarder`]: copies records from the event log to the queue
//! - [`worker`]: applies queued events to the projection store
//!
//! Both share configuration, cooperative shutdown, and an ops HTTP endpoint
//! serving health and Prometheus metrics.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod forwarder;
pub mod ops;
pub mod routes;
pub mod shutdown;
pub mod telemetry;
pub mod worker;

pub use checkpoint::{
    CheckpointError, CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore,
};
pub use config::{Config, ConfigError, LogFormat};
pub use context::{ForwarderContext, WorkerContext};
pub use error::{PipelineError, Result};
pub use forwarder::{ForwarderError, ForwarderExit, ForwarderSettings, LogForwarder, run_forwarder};
pub use ops::OpsState;
pub use shutdown::{StopHandle, StopSignal, stop_channel, stop_on_signal};
pub use worker::{MessageOutcome, ProjectionWorker, WorkerError, WorkerSettings, run_worker};
