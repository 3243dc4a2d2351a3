use std::collections::BTreeMap;

use chrono::Utc;
use common::{AggregateId, TenantId};
use serde::Serialize;

use crate::envelope::{SCHEMA_VERSION, SCHEMA_VERSION_KEY, SOURCE_KEY, to_object};
use crate::payload::{
    InterventionCancelled, InterventionCompleted, InterventionCreated, InterventionUpdated,
};
use crate::{EventEnvelope, EventId, EventType};

/// Component tag recorded in `metadata.source` by default.
pub const DEFAULT_SOURCE: &str = "intervention-service";

/// Builds envelopes for the known intervention events.
///
/// Construction is pure: each call yields a fresh event id and the current
/// time, nothing is published.
#[derive(Debug, Clone)]
pub struct EventFactory {
    source: String,
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE)
    }
}

impl EventFactory {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn created(&self, event: &InterventionCreated) -> Result<EventEnvelope, serde_json::Error> {
        self.envelope(
            EventType::InterventionCreated,
            &event.intervention_id,
            &event.tenant_id,
            event,
        )
    }

    pub fn updated(&self, event: &InterventionUpdated) -> Result<EventEnvelope, serde_json::Error> {
        self.envelope(
            EventType::InterventionUpdated,
            &event.intervention_id,
            &event.tenant_id,
            event,
        )
    }

    pub fn completed(
        &self,
        event: &InterventionCompleted,
    ) -> Result<EventEnvelope, serde_json::Error> {
        self.envelope(
            EventType::InterventionCompleted,
            &event.intervention_id,
            &event.tenant_id,
            event,
        )
    }

    pub fn cancelled(
        &self,
        event: &InterventionCancelled,
    ) -> Result<EventEnvelope, serde_json::Error> {
        self.envelope(
            EventType::InterventionCancelled,
            &event.intervention_id,
            &event.tenant_id,
            event,
        )
    }

    fn envelope<T: Serialize>(
        &self,
        event_type: EventType,
        aggregate_id: &AggregateId,
        tenant_id: &TenantId,
        payload: &T,
    ) -> Result<EventEnvelope, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: EventId::new(),
            event_type,
            aggregate_id: aggregate_id.clone(),
            tenant_id: tenant_id.clone(),
            timestamp: Utc::now(),
            payload: to_object(payload)?,
            metadata: BTreeMap::from([
                (SOURCE_KEY.to_string(), self.source.clone()),
                (SCHEMA_VERSION_KEY.to_string(), SCHEMA_VERSION.to_string()),
            ]),
        })
    }
}
