use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use tokio::sync::RwLock;

use crate::store::{
    ConflictPolicy, InsertOutcome, MutationOutcome, ProjectionQuery, ProjectionStore, RowMutation,
    StaleWritePolicy,
};
use crate::{InterventionRow, ProjectionError, Result};

/// In-memory [`ProjectionStore`] for tests and local runs.
///
/// Writes can be scripted to fail, standing in for a flaky database.
#[derive(Clone, Default)]
pub struct InMemoryProjectionStore {
    rows: Arc<RwLock<HashMap<AggregateId, InterventionRow>>>,
    write_failures: Arc<RwLock<VecDeque<String>>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next insert or mutate fail with a store error.
    pub async fn fail_next_write(&self, reason: impl Into<String>) {
        self.write_failures.write().await.push_back(reason.into());
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn scripted_failure(&self) -> Result<()> {
        match self.write_failures.write().await.pop_front() {
            Some(reason) => Err(ProjectionError::Store(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn insert(&self, row: &InterventionRow, policy: ConflictPolicy) -> Result<InsertOutcome> {
        self.scripted_failure().await?;

        let mut rows = self.rows.write().await;
        if rows.contains_key(&row.id) {
            return match policy {
                ConflictPolicy::InsertOrIgnore => Ok(InsertOutcome::AlreadyExists),
                ConflictPolicy::Strict => Err(ProjectionError::Conflict(row.id.clone())),
            };
        }
        rows.insert(row.id.clone(), row.clone());
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
        self.scripted_failure().await?;

        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .filter(|row| &row.tenant_id == tenant)
            .ok_or_else(|| ProjectionError::RowMissing {
                id: id.clone(),
                tenant: tenant.clone(),
            })?;

        Ok(row.apply(mutation, at, policy))
    }

    async fn get(&self, id: &AggregateId, tenant: &TenantId) -> Result<Option<InterventionRow>> {
        let rows = self.rows.read().await;
        Ok(rows.get(id).filter(|row| &row.tenant_id == tenant).cloned())
    }

    async fn list(&self, tenant: &TenantId, query: &ProjectionQuery) -> Result<Vec<InterventionRow>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<_> = rows
            .values()
            .filter(|row| &row.tenant_id == tenant && query.matches(row))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn count(&self, tenant: &TenantId, query: &ProjectionQuery) -> Result<u64> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| &row.tenant_id == tenant && query.matches(row))
            .count() as u64)
    }
}
