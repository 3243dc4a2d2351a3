use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use events::InterventionStatus;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::store::{
    ConflictPolicy, InsertOutcome, MutationOutcome, ProjectionQuery, ProjectionStore, RowMutation,
    StaleWritePolicy,
};
use crate::{InterventionRow, ProjectionError, Result};

const COLUMNS: &str = "id, tenant_id, patient_id, screening_id, type, title, description, \
    status, priority, created_by, assigned_to, assigned_team, due_at, completed_at, \
    linked_task_id, referral_reasons, problems, notes, created_at, updated_at, field_versions";

/// PostgreSQL-backed read model over `interventions_projection`.
#[derive(Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the workspace migrations, including the checkpoint table.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_intervention(row: PgRow) -> Result<InterventionRow> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<InterventionStatus>()
            .map_err(|e| ProjectionError::CorruptRow {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        Ok(InterventionRow {
            id: AggregateId::new(id),
            tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
            patient_id: row.try_get("patient_id")?,
            screening_id: row.try_get("screening_id")?,
            kind: row.try_get("type")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status,
            priority: row.try_get("priority")?,
            created_by: row.try_get("created_by")?,
            assigned_to: row.try_get("assigned_to")?,
            assigned_team: row.try_get("assigned_team")?,
            due_at: row.try_get("due_at")?,
            completed_at: row.try_get("completed_at")?,
            linked_task_id: row.try_get("linked_task_id")?,
            referral_reasons: row.try_get("referral_reasons")?,
            problems: row.try_get("problems")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            field_versions: row
                .try_get::<Json<BTreeMap<String, DateTime<Utc>>>, _>("field_versions")?
                .0,
        })
    }
}

/// Appends `AND ...` clauses for every filter set on `query`.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, tenant: &TenantId, query: &ProjectionQuery) {
    builder.push(" WHERE tenant_id = ").push_bind(tenant.as_str().to_string());

    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(kind) = &query.kind {
        builder.push(" AND type = ").push_bind(kind.clone());
    }
    if let Some(patient_id) = &query.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id.clone());
    }
    if let Some(screening_id) = &query.screening_id {
        builder.push(" AND screening_id = ").push_bind(screening_id.clone());
    }
    if !query.screening_ids.is_empty() {
        builder
            .push(" AND screening_id = ANY(")
            .push_bind(query.screening_ids.clone())
            .push(")");
    }
    if let Some(created_by) = &query.created_by {
        builder.push(" AND created_by = ").push_bind(created_by.clone());
    }
    if !query.created_by_ids.is_empty() {
        builder
            .push(" AND created_by = ANY(")
            .push_bind(query.created_by_ids.clone())
            .push(")");
    }
    if let Some(team) = &query.assigned_team {
        builder.push(" AND assigned_team = ").push_bind(team.clone());
    }
}

#[async_trait]
impl ProjectionStore for PostgresProjectionStore {
    async fn insert(&self, row: &InterventionRow, policy: ConflictPolicy) -> Result<InsertOutcome> {
        let mut sql = format!(
            "INSERT INTO interventions_projection ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)"
        );
        if policy == ConflictPolicy::InsertOrIgnore {
            sql.push_str(" ON CONFLICT (id) DO NOTHING");
        }

        let result = sqlx::query(&sql)
            .bind(row.id.as_str())
            .bind(row.tenant_id.as_str())
            .bind(&row.patient_id)
            .bind(&row.screening_id)
            .bind(&row.kind)
            .bind(&row.title)
            .bind(&row.description)
            .bind(row.status.as_str())
            .bind(&row.priority)
            .bind(&row.created_by)
            .bind(&row.assigned_to)
            .bind(&row.assigned_team)
            .bind(row.due_at)
            .bind(row.completed_at)
            .bind(&row.linked_task_id)
            .bind(&row.referral_reasons)
            .bind(&row.problems)
            .bind(&row.notes)
            .bind(row.created_at)
            .bind(row.updated_at)
            .bind(Json(&row.field_versions))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return ProjectionError::Conflict(row.id.clone());
                }
                ProjectionError::Database(e)
            })?;

        if result.rows_affected() == 0 {
            debug!(id = %row.id, "row already present, insert ignored");
            return Ok(InsertOutcome::AlreadyExists);
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn mutate(
        &self,
        id: &AggregateId,
        tenant: &TenantId,
        mutation: &RowMutation,
        at: DateTime<Utc>,
        policy: StaleWritePolicy,
    ) -> Result<MutationOutcome> {
        let mut tx = self.pool.begin().await?;

        // The row lock serializes concurrent deliveries for the same id.
        let current = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM interventions_projection \
             WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(id.as_str())
        .bind(tenant.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = current else {
            return Err(ProjectionError::RowMissing {
                id: id.clone(),
                tenant: tenant.clone(),
            });
        };

        let mut row = Self::row_to_intervention(current)?;
        if row.apply(mutation, at, policy) == MutationOutcome::Stale {
            return Ok(MutationOutcome::Stale);
        }

        sqlx::query(
            "UPDATE interventions_projection SET \
             title = $3, description = $4, status = $5, priority = $6, assigned_to = $7, \
             assigned_team = $8, due_at = $9, completed_at = $10, linked_task_id = $11, \
             referral_reasons = $12, problems = $13, notes = $14, updated_at = $15, \
             field_versions = $16 \
             WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id.as_str())
        .bind(tenant.as_str())
        .bind(&row.title)
        .bind(&row.description)
        .bind(row.status.as_str())
        .bind(&row.priority)
        .bind(&row.assigned_to)
        .bind(&row.assigned_team)
        .bind(row.due_at)
        .bind(row.completed_at)
        .bind(&row.linked_task_id)
        .bind(&row.referral_reasons)
        .bind(&row.problems)
        .bind(&row.notes)
        .bind(row.updated_at)
        .bind(Json(&row.field_versions))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MutationOutcome::Applied)
    }

    async fn get(&self, id: &AggregateId, tenant: &TenantId) -> Result<Option<InterventionRow>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM interventions_projection WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id.as_str())
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_intervention).transpose()
    }

    async fn list(&self, tenant: &TenantId, query: &ProjectionQuery) -> Result<Vec<InterventionRow>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM interventions_projection"));
        push_filters(&mut builder, tenant, query);
        builder.push(" ORDER BY created_at DESC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_intervention).collect()
    }

    async fn count(&self, tenant: &TenantId, query: &ProjectionQuery) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM interventions_projection");
        push_filters(&mut builder, tenant, query);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}
