//! Domain events for the intervention pipeline.
//!
//! - [`EventEnvelope`]: the canonical wire record carried by the log and the queue
//! - [`InterventionEvent`]: the typed view of an envelope, one variant per known kind
//! - [`EventFactory`]: pure construction of envelopes from typed changes
//! - [`EventPublisher`]: appends envelopes to the ordered log, keyed by aggregate

pub mod envelope;
pub mod error;
pub mod event;
pub mod factory;
pub mod payload;
pub mod publisher;

pub use common::{AggregateId, TenantId};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId, EventType};
pub use error::{DecodeError, PublishError};
pub use event::InterventionEvent;
pub use factory::EventFactory;
pub use payload::{
    FieldChanges, InterventionCancelled, InterventionCompleted, InterventionCreated,
    InterventionStatus, InterventionUpdated,
};
pub use publisher::{EventPublisher, LogPublisher, PublishReceipt};
