//! Typed payloads for the known intervention event kinds (schema version 1).

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Lifecycle state of an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl InterventionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown intervention status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for InterventionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Payload of `intervention.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionCreated {
    pub intervention_id: AggregateId,
    #[serde(default)]
    pub tenant_id: TenantId,
    pub patient_id: String,
    pub screening_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "status_or_pending")]
    pub status: InterventionStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: String,
    pub created_by: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub assigned_team: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "string_list::deserialize")]
    pub referral_reasons: Vec<String>,
    #[serde(default, deserialize_with = "string_list::deserialize")]
    pub problems: Vec<String>,
    /// Filled from the envelope timestamp when the producer left it out.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload of `intervention.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionUpdated {
    pub intervention_id: AggregateId,
    #[serde(default)]
    pub tenant_id: TenantId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_fields: FieldChanges,
    pub updated_at: DateTime<Utc>,
}

/// Payload of `intervention.completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionCompleted {
    pub intervention_id: AggregateId,
    #[serde(default)]
    pub tenant_id: TenantId,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Payload of `intervention.cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionCancelled {
    pub intervention_id: AggregateId,
    #[serde(default)]
    pub tenant_id: TenantId,
    pub cancelled_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The set of columns an `intervention.updated` event changes.
///
/// `None` means "not mentioned". For nullable columns `Some(None)` clears the
/// value. Keys naming anything other than a mutable column are collected in
/// `unrecognized` and never applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldChanges {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub status: Option<InterventionStatus>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub assigned_team: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub due_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub linked_task_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "string_list::deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub referral_reasons: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "string_list::deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub problems: Option<Vec<String>>,
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, Value>,
}

impl FieldChanges {
    /// Names of the mutable columns this change set touches.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("title", self.title.is_some()),
            ("status", self.status.is_some()),
            ("priority", self.priority.is_some()),
            ("description", self.description.is_some()),
            ("assigned_to", self.assigned_to.is_some()),
            ("assigned_team", self.assigned_team.is_some()),
            ("due_at", self.due_at.is_some()),
            ("linked_task_id", self.linked_task_id.is_some()),
            ("notes", self.notes.is_some()),
            ("referral_reasons", self.referral_reasons.is_some()),
            ("problems", self.problems.is_some()),
        ];
        flags
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    /// True when no mutable column is touched.
    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    pub fn unrecognized_keys(&self) -> Vec<&str> {
        self.unrecognized.keys().map(String::as_str).collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A `null` or empty status means the intervention has not started.
fn status_or_pending<'de, D>(deserializer: D) -> Result<InterventionStatus, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(InterventionStatus::Pending),
        Some(raw) => raw.parse().map_err(serde::de::Error::custom),
    }
}

/// A key that is present must carry a value; `null` is rejected.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A key that is present yields `Some`, even when its value is `null`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Lenient decoding of string arrays.
///
/// Producers have sent both `["cost"]` and typed scalars such as `[1, true]`.
/// Scalars are rendered as strings, `null` elements are dropped and a
/// missing or `null` array is empty. Nested arrays or objects are rejected.
pub mod string_list {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
        coerce(values).map_err(D::Error::custom)
    }

    pub fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize(deserializer).map(Some)
    }

    pub fn coerce(values: Vec<Value>) -> Result<Vec<String>, String> {
        values
            .into_iter()
            .filter(|value| !value.is_null())
            .map(|value| match value {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(b.to_string()),
                other => Err(format!("expected a string or scalar list element, got {other}")),
            })
            .collect()
    }
}
