use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use events::{EventEnvelope, InterventionEvent};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::projection::{ApplyOutcome, Projection, ProjectionPosition};
use crate::store::{
    ConflictPolicy, InsertOutcome, MutationOutcome, ProjectionStore, RowMutation,
    StaleWritePolicy,
};
use crate::{InterventionRow, Result};

/// Maintains `interventions_projection` from intervention events.
#[derive(Clone)]
pub struct InterventionProjection {
    store: Arc<dyn ProjectionStore>,
    conflict_policy: ConflictPolicy,
    stale_write_policy: StaleWritePolicy,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl InterventionProjection {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self {
            store,
            conflict_policy: ConflictPolicy::default(),
            stale_write_policy: StaleWritePolicy::default(),
            position: Arc::new(RwLock::new(ProjectionPosition::zero())),
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_stale_write_policy(mut self, policy: StaleWritePolicy) -> Self {
        self.stale_write_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProjectionStore> {
        &self.store
    }

    async fn apply(&self, envelope: &EventEnvelope, event: InterventionEvent) -> Result<ApplyOutcome> {
        match event {
            InterventionEvent::Created(created) => {
                let row = InterventionRow::from_created(&created, envelope.timestamp);
                match self.store.insert(&row, self.conflict_policy).await? {
                    InsertOutcome::Inserted => {
                        info!(id = %row.id, status = %row.status, "projected new intervention");
                        Ok(ApplyOutcome::Applied)
                    }
                    InsertOutcome::AlreadyExists => {
                        warn!(id = %row.id, "intervention already projected, keeping existing row");
                        Ok(ApplyOutcome::Duplicate)
                    }
                }
            }
            InterventionEvent::Updated(updated) => {
                let changes = updated.updated_fields;
                if !changes.unrecognized.is_empty() {
                    warn!(
                        id = %updated.intervention_id,
                        keys = ?changes.unrecognized_keys(),
                        "ignoring fields that cannot be updated"
                    );
                }
                debug!(id = %updated.intervention_id, fields = ?changes.changed_fields(), "updating intervention");
                self.mutate(
                    &updated.intervention_id,
                    &updated.tenant_id,
                    RowMutation::Fields(changes),
                    updated.updated_at,
                )
                .await
            }
            InterventionEvent::Completed(completed) => {
                self.mutate(
                    &completed.intervention_id,
                    &completed.tenant_id,
                    RowMutation::Complete {
                        completed_at: completed.completed_at,
                        notes: completed.notes,
                    },
                    completed.completed_at,
                )
                .await
            }
            InterventionEvent::Cancelled(cancelled) => {
                self.mutate(
                    &cancelled.intervention_id,
                    &cancelled.tenant_id,
                    RowMutation::Cancel {
                        reason: cancelled.reason,
                    },
                    cancelled.cancelled_at,
                )
                .await
            }
            InterventionEvent::Unknown { event_type, .. } => {
                info!(%event_type, "ignoring unhandled event type");
                Ok(ApplyOutcome::Ignored)
            }
        }
    }

    async fn mutate(
        &self,
        id: &AggregateId,
        tenant: &TenantId,
        mutation: RowMutation,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let outcome = self
            .store
            .mutate(id, tenant, &mutation, at, self.stale_write_policy)
            .await?;

        match outcome {
            MutationOutcome::Applied => Ok(ApplyOutcome::Applied),
            MutationOutcome::Stale => {
                warn!(%id, event_time = %at, "every touched column is newer than event, skipping stale write");
                Ok(ApplyOutcome::Stale)
            }
        }
    }
}

#[async_trait]
impl Projection for InterventionProjection {
    fn name(&self) -> &'static str {
        "InterventionProjection"
    }

    #[tracing::instrument(
        skip(self, envelope),
        fields(event_id = %envelope.event_id, event_type = %envelope.event_type)
    )]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<ApplyOutcome> {
        let event = InterventionEvent::try_from(envelope)?;
        let outcome = self.apply(envelope, event).await?;

        let mut position = self.position.write().await;
        *position = position.advance(outcome);
        metrics::counter!("projection_events_total", "outcome" => outcome.as_str()).increment(1);

        Ok(outcome)
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use events::{EventType, InterventionStatus};
    use serde_json::{Value, json};

    use super::*;
    use crate::{InMemoryProjectionStore, ProjectionError};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn envelope(event_type: &str, payload: Value) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id("int_1")
            .tenant_id("t1")
            .timestamp(t0())
            .payload(&payload)
            .unwrap()
            .try_build()
            .unwrap()
    }

    fn created() -> EventEnvelope {
        envelope(
            "intervention.created",
            json!({
                "intervention_id": "int_1",
                "tenant_id": "t1",
                "patient_id": "p1",
                "screening_id": "s1",
                "type": "referral",
                "title": "Food bank referral",
                "priority": "high",
                "created_by": "u1",
                "referral_reasons": ["cost"],
                "problems": ["food"],
                "created_at": t0()
            }),
        )
    }

    fn updated(fields: Value, at: DateTime<Utc>) -> EventEnvelope {
        envelope(
            "intervention.updated",
            json!({
                "intervention_id": "int_1",
                "tenant_id": "t1",
                "updated_fields": fields,
                "updated_at": at
            }),
        )
    }

    fn setup() -> (InMemoryProjectionStore, InterventionProjection) {
        let store = InMemoryProjectionStore::new();
        let projection = InterventionProjection::new(Arc::new(store.clone()));
        (store, projection)
    }

    async fn row(store: &InMemoryProjectionStore) -> InterventionRow {
        store
            .get(&AggregateId::new("int_1"), &TenantId::new("t1"))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn created_inserts_exactly_one_row() {
        let (store, projection) = setup();

        let outcome = projection.handle(&created()).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(store.len().await, 1);
        let row = row(&store).await;
        assert_eq!(row.status, InterventionStatus::Pending);
        assert_eq!(row.referral_reasons, vec!["cost".to_string()]);
        assert_eq!(row.created_at, t0());
    }

    #[tokio::test]
    async fn duplicate_created_keeps_first_row() {
        let (store, projection) = setup();
        projection.handle(&created()).await.unwrap();
        let before = row(&store).await;

        let outcome = projection.handle(&created()).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Duplicate);
        assert_eq!(row(&store).await, before);
    }

    #[tokio::test]
    async fn strict_policy_surfaces_the_conflict() {
        let (_, projection) = setup();
        let projection = projection.with_conflict_policy(ConflictPolicy::Strict);
        projection.handle(&created()).await.unwrap();

        let err = projection.handle(&created()).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_changes_only_listed_fields() {
        let (store, projection) = setup();
        projection.handle(&created()).await.unwrap();
        let before = row(&store).await;
        let at = t0() + Duration::minutes(3);

        projection
            .handle(&updated(
                json!({"priority": "low", "created_by": "intruder", "id": "int_2"}),
                at,
            ))
            .await
            .unwrap();

        let after = row(&store).await;
        assert_eq!(after.priority, "low");
        assert_eq!(after.updated_at, at);
        assert_eq!(
            InterventionRow {
                priority: before.priority.clone(),
                updated_at: before.updated_at,
                field_versions: before.field_versions.clone(),
                ..after
            },
            before
        );
    }

    #[tokio::test]
    async fn out_of_order_updates_keep_the_newer_value() {
        let (store, projection) = setup();
        projection.handle(&created()).await.unwrap();
        let o1 = updated(json!({"title": "O1"}), t0() + Duration::minutes(1));
        let o2 = updated(json!({"title": "O2"}), t0() + Duration::minutes(2));

        projection.handle(&o2).await.unwrap();
        let outcome = projection.handle(&o1).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(row(&store).await.title, "O2");
    }

    #[tokio::test]
    async fn out_of_order_updates_to_different_fields_both_land() {
        let (store, projection) = setup();
        projection.handle(&created()).await.unwrap();
        let priority = updated(json!({"priority": "low"}), t0() + Duration::minutes(2));
        let title = updated(json!({"title": "First"}), t0() + Duration::minutes(1));

        projection.handle(&priority).await.unwrap();
        let outcome = projection.handle(&title).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        let row = row(&store).await;
        assert_eq!(row.title, "First");
        assert_eq!(row.priority, "low");
    }

    #[tokio::test]
    async fn apply_policy_lets_the_last_delivery_win() {
        let (store, projection) = setup();
        let projection = projection.with_stale_write_policy(StaleWritePolicy::Apply);
        projection.handle(&created()).await.unwrap();
        let o1 = updated(json!({"title": "O1"}), t0() + Duration::minutes(1));
        let o2 = updated(json!({"title": "O2"}), t0() + Duration::minutes(2));

        projection.handle(&o2).await.unwrap();
        projection.handle(&o1).await.unwrap();

        assert_eq!(row(&store).await.title, "O1");
    }

    #[tokio::test]
    async fn completed_sets_terminal_state() {
        let (store, projection) = setup();
        projection.handle(&created()).await.unwrap();
        let done = t0() + Duration::hours(1);

        projection
            .handle(&envelope(
                "intervention.completed",
                json!({"intervention_id": "int_1", "completed_at": done, "notes": "done"}),
            ))
            .await
            .unwrap();

        let row = row(&store).await;
        assert_eq!(row.status, InterventionStatus::Completed);
        assert_eq!(row.completed_at, Some(done));
        assert_eq!(row.notes.as_deref(), Some("done"));
        assert_eq!(row.updated_at, done);
    }

    #[tokio::test]
    async fn stale_update_cannot_reopen_a_cancelled_intervention() {
        let (store, projection) = setup();
        projection.handle(&created()).await.unwrap();
        projection
            .handle(&envelope(
                "intervention.cancelled",
                json!({
                    "intervention_id": "int_1",
                    "cancelled_at": t0() + Duration::hours(2),
                    "reason": "duplicate referral"
                }),
            ))
            .await
            .unwrap();

        let late = updated(json!({"status": "in_progress"}), t0() + Duration::hours(1));
        assert_eq!(projection.handle(&late).await.unwrap(), ApplyOutcome::Stale);

        let row = row(&store).await;
        assert_eq!(row.status, InterventionStatus::Cancelled);
        assert_eq!(row.notes.as_deref(), Some("duplicate referral"));
    }

    #[tokio::test]
    async fn mutation_before_creation_is_retryable() {
        let (_, projection) = setup();

        let err = projection
            .handle(&updated(json!({"title": "early"}), t0()))
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectionError::RowMissing { .. }));
        assert!(!err.is_malformed());
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let (store, projection) = setup();

        let outcome = projection
            .handle(&envelope("intervention.archived", json!({"intervention_id": "int_1"})))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert!(store.is_empty().await);
        assert_eq!(projection.position().await.events_skipped, 1);
    }

    #[tokio::test]
    async fn invalid_payload_is_malformed() {
        let (_, projection) = setup();
        let mut bad = created();
        bad.payload.remove("title");
        assert_eq!(bad.event_type, EventType::InterventionCreated);

        let err = projection.handle(&bad).await.unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(projection.position().await.events_processed, 0);
    }
}
