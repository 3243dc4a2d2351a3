use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::DecodeError;

/// Metadata key naming the component that emitted the event.
pub const SOURCE_KEY: &str = "source";

/// Metadata key carrying the payload schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Schema version of the payloads produced by this crate.
pub const SCHEMA_VERSION: &str = "1";

/// Unique identifier for an event.
///
/// Producers may use any string; ids minted here are random UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of an intervention event, as carried in `event_type`.
///
/// Wire values outside the known set decode as [`EventType::Unknown`] so
/// that newer producers do not break older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    InterventionCreated,
    InterventionUpdated,
    InterventionCompleted,
    InterventionCancelled,
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InterventionCreated => "intervention.created",
            Self::InterventionUpdated => "intervention.updated",
            Self::InterventionCompleted => "intervention.completed",
            Self::InterventionCancelled => "intervention.cancelled",
            Self::Unknown(other) => other,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "intervention.created" => Self::InterventionCreated,
            "intervention.updated" => Self::InterventionUpdated,
            "intervention.completed" => Self::InterventionCompleted,
            "intervention.cancelled" => Self::InterventionCancelled,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// The canonical wire record for a domain event.
///
/// Serialized as JSON onto the log and carried byte-for-byte through the
/// queue. Maps are ordered so the encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Generated when the producer left it out.
    #[serde(default)]
    pub event_id: EventId,

    pub event_type: EventType,

    /// The intervention this event belongs to; also the log partition key.
    #[serde(default)]
    pub aggregate_id: AggregateId,

    pub tenant_id: TenantId,

    pub timestamp: DateTime<Utc>,

    /// Kind-specific fields, see [`crate::payload`].
    pub payload: Map<String, Value>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Decodes an envelope from its JSON encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Malformed)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Key that orders this event relative to others.
    ///
    /// Falls back to the payload's `intervention_id` for envelopes written
    /// without an `aggregate_id`.
    pub fn ordering_key(&self) -> &str {
        if !self.aggregate_id.is_empty() {
            return self.aggregate_id.as_str();
        }
        self.payload
            .get("intervention_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Component that emitted the event, if recorded.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// Builder for ad-hoc envelopes.
///
/// [`crate::EventFactory`] covers the known kinds; the builder is for
/// anything else, such as forwarding foreign event types.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<EventType>,
    aggregate_id: Option<AggregateId>,
    tenant_id: Option<TenantId>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<Map<String, Value>>,
    metadata: BTreeMap<String, String>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: impl Into<EventId>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<EventType>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<AggregateId>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    pub fn tenant_id(mut self, id: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(id.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a value that serializes to a JSON object.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(to_object(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds the envelope, returning None if the event type, aggregate,
    /// tenant or payload is missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            aggregate_id: self.aggregate_id?,
            tenant_id: self.tenant_id?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload?,
            metadata: self.metadata,
        })
    }
}

pub(crate) fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}
