//! The `interventions_projection` read-model row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use events::{FieldChanges, InterventionCreated, InterventionStatus};
use serde::{Deserialize, Serialize};

use crate::store::{MutationOutcome, RowMutation, StaleWritePolicy};

/// One denormalized intervention, as served to read APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRow {
    pub id: AggregateId,
    pub tenant_id: TenantId,
    pub patient_id: String,
    pub screening_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub status: InterventionStatus,
    pub priority: String,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub assigned_team: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub linked_task_id: Option<String>,
    pub referral_reasons: Vec<String>,
    pub problems: Vec<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Event time of the last accepted write per column. Columns absent
    /// here were last written at `created_at`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_versions: BTreeMap<String, DateTime<Utc>>,
}

impl InterventionRow {
    /// Builds the initial row for a created intervention.
    ///
    /// `occurred_at` stands in for `created_at` when the payload has none.
    pub fn from_created(event: &InterventionCreated, occurred_at: DateTime<Utc>) -> Self {
        let created_at = event.created_at.unwrap_or(occurred_at);
        Self {
            id: event.intervention_id.clone(),
            tenant_id: event.tenant_id.clone(),
            patient_id: event.patient_id.clone(),
            screening_id: event.screening_id.clone(),
            kind: event.kind.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            status: event.status,
            priority: event.priority.clone(),
            created_by: event.created_by.clone(),
            assigned_to: event.assigned_to.clone(),
            assigned_team: event.assigned_team.clone(),
            due_at: event.due_at,
            completed_at: None,
            linked_task_id: None,
            referral_reasons: event.referral_reasons.clone(),
            problems: event.problems.clone(),
            notes: None,
            created_at,
            updated_at: created_at,
            field_versions: BTreeMap::new(),
        }
    }

    /// Event time of the last accepted write to `column`.
    pub fn column_version(&self, column: &str) -> DateTime<Utc> {
        self.field_versions
            .get(column)
            .copied()
            .unwrap_or(self.created_at)
    }

    /// Applies `mutation` as of `at`.
    ///
    /// Under [`StaleWritePolicy::SkipOlder`] each touched column is written
    /// only if `at` is not older than that column's own version, so an
    /// out-of-order change to one column never masks a change to another.
    /// The mutation is stale when none of its columns were written.
    pub fn apply(
        &mut self,
        mutation: &RowMutation,
        at: DateTime<Utc>,
        policy: StaleWritePolicy,
    ) -> MutationOutcome {
        let mut writer = ColumnWriter {
            versions: std::mem::take(&mut self.field_versions),
            created_at: self.created_at,
            at,
            policy,
            written: 0,
        };
        match mutation {
            RowMutation::Fields(changes) => self.apply_fields(changes, &mut writer),
            RowMutation::Complete { completed_at, notes } => {
                if writer.accept("status") {
                    self.status = InterventionStatus::Completed;
                }
                if writer.accept("completed_at") {
                    self.completed_at = Some(*completed_at);
                }
                if let Some(notes) = notes
                    && writer.accept("notes")
                {
                    self.notes = Some(notes.clone());
                }
            }
            RowMutation::Cancel { reason } => {
                if writer.accept("status") {
                    self.status = InterventionStatus::Cancelled;
                }
                if let Some(reason) = reason
                    && writer.accept("notes")
                {
                    self.notes = Some(reason.clone());
                }
            }
        }
        self.field_versions = writer.versions;

        // An empty change set has no column of its own; the row clock guards it.
        let empty = matches!(mutation, RowMutation::Fields(changes) if changes.is_empty());
        let fresh = match policy {
            StaleWritePolicy::Apply => true,
            StaleWritePolicy::SkipOlder if empty => at >= self.updated_at,
            StaleWritePolicy::SkipOlder => writer.written > 0,
        };
        if !fresh {
            return MutationOutcome::Stale;
        }
        self.updated_at = match policy {
            StaleWritePolicy::Apply => at,
            StaleWritePolicy::SkipOlder => self.updated_at.max(at),
        };
        MutationOutcome::Applied
    }

    fn apply_fields(&mut self, changes: &FieldChanges, writer: &mut ColumnWriter) {
        if let Some(title) = &changes.title
            && writer.accept("title")
        {
            self.title = title.clone();
        }
        if let Some(status) = changes.status
            && writer.accept("status")
        {
            self.status = status;
        }
        if let Some(priority) = &changes.priority
            && writer.accept("priority")
        {
            self.priority = priority.clone();
        }
        if let Some(description) = &changes.description
            && writer.accept("description")
        {
            self.description = description.clone();
        }
        if let Some(assigned_to) = &changes.assigned_to
            && writer.accept("assigned_to")
        {
            self.assigned_to = assigned_to.clone();
        }
        if let Some(assigned_team) = &changes.assigned_team
            && writer.accept("assigned_team")
        {
            self.assigned_team = assigned_team.clone();
        }
        if let Some(due_at) = changes.due_at
            && writer.accept("due_at")
        {
            self.due_at = due_at;
        }
        if let Some(linked_task_id) = &changes.linked_task_id
            && writer.accept("linked_task_id")
        {
            self.linked_task_id = linked_task_id.clone();
        }
        if let Some(notes) = &changes.notes
            && writer.accept("notes")
        {
            self.notes = notes.clone();
        }
        if let Some(reasons) = &changes.referral_reasons
            && writer.accept("referral_reasons")
        {
            self.referral_reasons = reasons.clone();
        }
        if let Some(problems) = &changes.problems
            && writer.accept("problems")
        {
            self.problems = problems.clone();
        }
    }
}

/// Decides, column by column, whether a write at `at` wins.
struct ColumnWriter {
    versions: BTreeMap<String, DateTime<Utc>>,
    created_at: DateTime<Utc>,
    at: DateTime<Utc>,
    policy: StaleWritePolicy,
    written: usize,
}

impl ColumnWriter {
    fn accept(&mut self, column: &str) -> bool {
        let current = self.versions.get(column).copied().unwrap_or(self.created_at);
        if self.policy == StaleWritePolicy::SkipOlder && self.at < current {
            return false;
        }
        self.versions.insert(column.to_string(), self.at);
        self.written += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn created() -> InterventionCreated {
        InterventionCreated {
            intervention_id: AggregateId::new("int_1"),
            tenant_id: TenantId::new("t1"),
            patient_id: "p1".into(),
            screening_id: "s1".into(),
            kind: "referral".into(),
            title: "Call patient".into(),
            description: Some("first contact".into()),
            status: InterventionStatus::Pending,
            priority: "high".into(),
            created_by: "u1".into(),
            assigned_to: Some("nurse-1".into()),
            assigned_team: None,
            due_at: None,
            referral_reasons: vec!["cost".into()],
            problems: vec![],
            created_at: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn created_row_falls_back_to_event_time() {
        let row = InterventionRow::from_created(&created(), t0());
        assert_eq!(row.created_at, t0());
        assert_eq!(row.updated_at, t0());
        assert_eq!(row.completed_at, None);
    }

    #[test]
    fn field_changes_touch_only_named_columns() {
        let mut row = InterventionRow::from_created(&created(), t0());
        let before = row.clone();
        let at = t0() + Duration::minutes(5);

        row.apply(
            &RowMutation::Fields(FieldChanges {
                title: Some("Call again".into()),
                assigned_to: Some(None),
                ..Default::default()
            }),
            at,
            StaleWritePolicy::SkipOlder,
        );

        assert_eq!(row.title, "Call again");
        assert_eq!(row.assigned_to, None);
        assert_eq!(row.updated_at, at);
        assert_eq!(
            InterventionRow {
                title: before.title.clone(),
                assigned_to: before.assigned_to.clone(),
                updated_at: before.updated_at,
                field_versions: before.field_versions.clone(),
                ..row
            },
            before
        );
    }

    #[test]
    fn complete_keeps_notes_when_absent() {
        let mut row = InterventionRow::from_created(&created(), t0());
        row.notes = Some("earlier".into());
        let done = t0() + Duration::hours(1);

        row.apply(
            &RowMutation::Complete {
                completed_at: done,
                notes: None,
            },
            done,
            StaleWritePolicy::SkipOlder,
        );

        assert_eq!(row.status, InterventionStatus::Completed);
        assert_eq!(row.completed_at, Some(done));
        assert_eq!(row.notes.as_deref(), Some("earlier"));
    }

    #[test]
    fn cancel_records_reason_as_notes() {
        let mut row = InterventionRow::from_created(&created(), t0());
        let at = t0() + Duration::hours(2);

        row.apply(
            &RowMutation::Cancel {
                reason: Some("duplicate".into()),
            },
            at,
            StaleWritePolicy::SkipOlder,
        );

        assert_eq!(row.status, InterventionStatus::Cancelled);
        assert_eq!(row.notes.as_deref(), Some("duplicate"));
        assert_eq!(row.updated_at, at);
    }

    fn fields(changes: FieldChanges) -> RowMutation {
        RowMutation::Fields(changes)
    }

    #[test]
    fn older_change_to_another_column_still_lands() {
        let mut row = InterventionRow::from_created(&created(), t0());
        let later = t0() + Duration::minutes(2);
        let earlier = t0() + Duration::minutes(1);

        let first = row.apply(
            &fields(FieldChanges {
                priority: Some("low".into()),
                ..Default::default()
            }),
            later,
            StaleWritePolicy::SkipOlder,
        );
        let second = row.apply(
            &fields(FieldChanges {
                title: Some("First".into()),
                ..Default::default()
            }),
            earlier,
            StaleWritePolicy::SkipOlder,
        );

        assert_eq!(first, MutationOutcome::Applied);
        assert_eq!(second, MutationOutcome::Applied);
        assert_eq!(row.title, "First");
        assert_eq!(row.priority, "low");
        assert_eq!(row.updated_at, later);
        assert_eq!(row.column_version("title"), earlier);
        assert_eq!(row.column_version("priority"), later);
        assert_eq!(row.column_version("status"), t0());
    }

    #[test]
    fn mixed_change_keeps_only_its_fresh_columns() {
        let mut row = InterventionRow::from_created(&created(), t0());
        let later = t0() + Duration::minutes(2);
        let earlier = t0() + Duration::minutes(1);
        row.apply(
            &fields(FieldChanges {
                title: Some("Second".into()),
                ..Default::default()
            }),
            later,
            StaleWritePolicy::SkipOlder,
        );

        let outcome = row.apply(
            &fields(FieldChanges {
                title: Some("First".into()),
                priority: Some("low".into()),
                ..Default::default()
            }),
            earlier,
            StaleWritePolicy::SkipOlder,
        );

        assert_eq!(outcome, MutationOutcome::Applied);
        assert_eq!(row.title, "Second");
        assert_eq!(row.priority, "low");
        assert_eq!(row.column_version("title"), later);
    }

    #[test]
    fn older_change_to_the_same_column_is_stale() {
        let mut row = InterventionRow::from_created(&created(), t0());
        row.apply(
            &RowMutation::Cancel { reason: None },
            t0() + Duration::hours(2),
            StaleWritePolicy::SkipOlder,
        );
        let before = row.clone();

        let outcome = row.apply(
            &fields(FieldChanges {
                status: Some(InterventionStatus::InProgress),
                ..Default::default()
            }),
            t0() + Duration::hours(1),
            StaleWritePolicy::SkipOlder,
        );

        assert_eq!(outcome, MutationOutcome::Stale);
        assert_eq!(row, before);
    }

    #[test]
    fn change_older_than_creation_is_stale() {
        let mut row = InterventionRow::from_created(&created(), t0());
        let outcome = row.apply(
            &fields(FieldChanges {
                title: Some("Backdated".into()),
                ..Default::default()
            }),
            t0() - Duration::minutes(1),
            StaleWritePolicy::SkipOlder,
        );
        assert_eq!(outcome, MutationOutcome::Stale);
        assert_eq!(row.title, "Call patient");
    }

    #[test]
    fn apply_policy_overwrites_regardless_of_versions() {
        let mut row = InterventionRow::from_created(&created(), t0());
        let later = t0() + Duration::minutes(2);
        let earlier = t0() + Duration::minutes(1);
        let retitle = |title: &str| {
            fields(FieldChanges {
                title: Some(title.into()),
                ..Default::default()
            })
        };

        row.apply(&retitle("Second"), later, StaleWritePolicy::Apply);
        let outcome = row.apply(&retitle("First"), earlier, StaleWritePolicy::Apply);

        assert_eq!(outcome, MutationOutcome::Applied);
        assert_eq!(row.title, "First");
        assert_eq!(row.updated_at, earlier);
    }
}
