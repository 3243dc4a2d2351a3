use common::{AggregateId, TenantId};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::payload::{
    InterventionCancelled, InterventionCompleted, InterventionCreated, InterventionUpdated,
};
use crate::{DecodeError, EventEnvelope, EventType};

/// Typed view of an [`EventEnvelope`].
///
/// Every decoded payload carries the envelope's tenant; kinds this crate does
/// not know are kept as [`InterventionEvent::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum InterventionEvent {
    Created(InterventionCreated),
    Updated(InterventionUpdated),
    Completed(InterventionCompleted),
    Cancelled(InterventionCancelled),
    Unknown {
        event_type: String,
        payload: Map<String, Value>,
    },
}

impl InterventionEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Created(_) => EventType::InterventionCreated,
            Self::Updated(_) => EventType::InterventionUpdated,
            Self::Completed(_) => EventType::InterventionCompleted,
            Self::Cancelled(_) => EventType::InterventionCancelled,
            Self::Unknown { event_type, .. } => EventType::Unknown(event_type.clone()),
        }
    }

    /// The intervention the event targets, `None` for unknown kinds.
    pub fn intervention_id(&self) -> Option<&AggregateId> {
        match self {
            Self::Created(e) => Some(&e.intervention_id),
            Self::Updated(e) => Some(&e.intervention_id),
            Self::Completed(e) => Some(&e.intervention_id),
            Self::Cancelled(e) => Some(&e.intervention_id),
            Self::Unknown { .. } => None,
        }
    }
}

impl TryFrom<&EventEnvelope> for InterventionEvent {
    type Error = DecodeError;

    fn try_from(envelope: &EventEnvelope) -> Result<Self, Self::Error> {
        let event = match &envelope.event_type {
            EventType::InterventionCreated => {
                let mut created: InterventionCreated = typed(envelope)?;
                created.tenant_id = scoped_tenant(envelope, &created.tenant_id)?;
                created.created_at.get_or_insert(envelope.timestamp);
                Self::Created(created)
            }
            EventType::InterventionUpdated => {
                let mut updated: InterventionUpdated = typed(envelope)?;
                updated.tenant_id = scoped_tenant(envelope, &updated.tenant_id)?;
                Self::Updated(updated)
            }
            EventType::InterventionCompleted => {
                let mut completed: InterventionCompleted = typed(envelope)?;
                completed.tenant_id = scoped_tenant(envelope, &completed.tenant_id)?;
                Self::Completed(completed)
            }
            EventType::InterventionCancelled => {
                let mut cancelled: InterventionCancelled = typed(envelope)?;
                cancelled.tenant_id = scoped_tenant(envelope, &cancelled.tenant_id)?;
                Self::Cancelled(cancelled)
            }
            EventType::Unknown(event_type) => Self::Unknown {
                event_type: event_type.clone(),
                payload: envelope.payload.clone(),
            },
        };
        Ok(event)
    }
}

fn typed<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(envelope.payload.clone())).map_err(|source| {
        DecodeError::InvalidPayload {
            event_type: envelope.event_type.to_string(),
            source,
        }
    })
}

fn scoped_tenant(envelope: &EventEnvelope, payload: &TenantId) -> Result<TenantId, DecodeError> {
    if payload.is_empty() || payload == &envelope.tenant_id {
        Ok(envelope.tenant_id.clone())
    } else {
        Err(DecodeError::TenantMismatch {
            envelope: envelope.tenant_id.clone(),
            payload: payload.clone(),
        })
    }
}
