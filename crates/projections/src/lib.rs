//! Read model for the query side of the intervention service.
//!
//! - [`InterventionRow`]: one row of `interventions_projection`
//! - [`ProjectionStore`]: persistence contract, with in-memory and Postgres backends
//! - [`InterventionProjection`]: applies decoded events to the store
//! - [`Projection`] trait for anything that consumes envelopes into a read model

pub mod error;
pub mod intervention;
pub mod memory;
pub mod postgres;
pub mod projection;
pub mod row;
pub mod store;

pub use error::{ProjectionError, Result};
pub use intervention::InterventionProjection;
pub use memory::InMemoryProjectionStore;
pub use postgres::PostgresProjectionStore;
pub use projection::{ApplyOutcome, Projection, ProjectionPosition};
pub use row::InterventionRow;
pub use store::{
    ConflictPolicy, InsertOutcome, MutationOutcome, ProjectionQuery, ProjectionStore,
    RowMutation, StaleWritePolicy,
};
