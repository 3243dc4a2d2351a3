//! Storage contract for the intervention read model.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use events::{FieldChanges, InterventionStatus};

use crate::{InterventionRow, Result};

/// What to do when a "created" event targets a row that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the existing row and report success.
    #[default]
    InsertOrIgnore,
    /// Fail with [`crate::ProjectionError::Conflict`].
    Strict,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "insert-or-ignore" => Ok(Self::InsertOrIgnore),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "unknown create mode '{other}', expected insert-or-ignore or strict"
            )),
        }
    }
}

/// Guard applied to mutations that arrive out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StaleWritePolicy {
    /// Skip writes to columns that already hold a newer value.
    #[default]
    SkipOlder,
    /// Apply every mutation; the last delivery wins.
    Apply,
}

impl FromStr for StaleWritePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skip-older" => Ok(Self::SkipOlder),
            "apply" => Ok(Self::Apply),
            other => Err(format!(
                "unknown stale write mode '{other}', expected skip-older or apply"
            )),
        }
    }
}

/// A change to an existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowMutation {
    /// Partial update of the mutable columns.
    Fields(FieldChanges),
    Complete {
        completed_at: DateTime<Utc>,
        notes: Option<String>,
    },
    Cancel {
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same id was already present and was left untouched.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// The row had already moved past this mutation; nothing changed.
    Stale,
}

/// Filters for listing rows within a tenant. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionQuery {
    pub status: Option<InterventionStatus>,
    pub kind: Option<String>,
    pub patient_id: Option<String>,
    pub screening_id: Option<String>,
    pub screening_ids: Vec<String>,
    pub created_by: Option<String>,
    pub created_by_ids: Vec<String>,
    pub assigned_team: Option<String>,
}

impl ProjectionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: InterventionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn screening(mut self, screening_id: impl Into<String>) -> Self {
        self.screening_id = Some(screening_id.into());
        self
    }

    pub fn screenings<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.screening_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }

    pub fn created_by_any<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.created_by_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn assigned_team(mut self, team: impl Into<String>) -> Self {
        self.assigned_team = Some(team.into());
        self
    }

    /// True if `row` passes every filter that is set.
    pub fn matches(&self, row: &InterventionRow) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }
        fn any(filter: &[String], value: &str) -> bool {
            filter.is_empty() || filter.iter().any(|f| f == value)
        }

        self.status.is_none_or(|s| s == row.status)
            && eq(&self.kind, &row.kind)
            && eq(&self.patient_id, &row.patient_id)
            && eq(&self.screening_id, &row.screening_id)
            && any(&self.screening_ids, &row.screening_id)
            && eq(&self.created_by, &row.created_by)
            && any(&self.created_by_ids, &row.created_by)
            && self
                .assigned_team
                .as_deref()
                .is_none_or(|team| row.assigned_team.as_deref() == Some(team))
    }
}

/// Read-model persistence for interventions.
///
/// Every write is scoped by `(id, tenant_id)`; no operation spans rows.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn insert(&self, row: &InterventionRow, policy: ConflictPolicy) -> Result<InsertOutcome>;

    /// Applies `mutation` as of `at`.
    ///
    /// Fails with [`crate::ProjectionError::RowMissing`] when no row matches.
    async fn mutate(
        &self,
        id: &AggregateId,
        tenant: &TenantId,
        mutation: &RowMutation,
        at: DateTime<Utc>,
        policy: StaleWritePolicy,
    ) -> Result<MutationOutcome>;

    async fn get(&self, id: &AggregateId, tenant: &TenantId) -> Result<Option<InterventionRow>>;

    /// Rows of `tenant` matching `query`, newest first.
    async fn list(&self, tenant: &TenantId, query: &ProjectionQuery) -> Result<Vec<InterventionRow>>;

    async fn count(&self, tenant: &TenantId, query: &ProjectionQuery) -> Result<u64>;
}
