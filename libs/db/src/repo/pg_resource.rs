//! PostgreSQL implementation of ResourceRepository
//!
//! Lifecycle transitions are enforced in SQL: the UPDATE carries the
//! allowed source states for the requested target, so a regression never
//! touches the row.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::PgPool;

use conductor_domain::{ExecutionId, Resource, ResourceId, ResourceState};

use crate::pagination::{Page, Pagination};
use crate::repo::errors::{FindResourceError, UpdateResourceError, UpsertResourceError};
use crate::repo::traits::{NewResource, ResourceRepository};

/// PostgreSQL resource repository
pub struct PgResourceRepository {
    pool: PgPool,
}

impl PgResourceRepository {
    /// Create a new PostgreSQL resource repository
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RESOURCE_COLUMNS: &str = r#"id, app_name, name, resource_type, state::text AS state,
    execution_id, properties, fingerprint, error_message, created_at, updated_at"#;

#[async_trait]
impl ResourceRepository for PgResourceRepository {
    async fn upsert_requested(&self, res: &NewResource) -> Result<Resource, UpsertResourceError> {
        let id = ResourceId::new();
        let properties = serde_json::to_value(&res.properties).unwrap_or_default();

        // A redeploy re-requests the logical resource for the new execution;
        // terminated rows start a fresh lifecycle.
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            r#"
            INSERT INTO resources (id, app_name, name, resource_type, state, execution_id, properties, fingerprint)
            VALUES ($1, $2, $3, $4, 'requested', $5, $6, $7)
            ON CONFLICT (app_name, name) DO UPDATE
            SET state = 'requested',
                resource_type = EXCLUDED.resource_type,
                execution_id = EXCLUDED.execution_id,
                properties = EXCLUDED.properties,
                fingerprint = EXCLUDED.fingerprint,
                error_message = NULL,
                updated_at = NOW()
            RETURNING {RESOURCE_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(&res.app_name)
        .bind(&res.name)
        .bind(&res.resource_type)
        .bind(res.execution_id.as_ref().map(ExecutionId::as_uuid))
        .bind(properties)
        .bind(&res.fingerprint)
        .fetch_one(&self.pool)
        .await
        .map_err(UpsertResourceError::Database)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: &ResourceId) -> Result<Option<Resource>, FindResourceError> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(FindResourceError::Database)?;

        Ok(row.map(Into::into))
    }

    async fn find_by_name(
        &self,
        app_name: &str,
        name: &str,
    ) -> Result<Option<Resource>, FindResourceError> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE app_name = $1 AND name = $2"
        ))
        .bind(app_name)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(FindResourceError::Database)?;

        Ok(row.map(Into::into))
    }

    async fn list(
        &self,
        resource_type: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<Resource>, FindResourceError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM resources WHERE ($1::text IS NULL OR resource_type = $1)",
        )
        .bind(resource_type)
        .fetch_one(&self.pool)
        .await
        .map_err(FindResourceError::Database)?;

        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS}
            FROM resources
            WHERE ($1::text IS NULL OR resource_type = $1)
            ORDER BY app_name, name
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(resource_type)
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(FindResourceError::Database)?;

        let resources = rows.into_iter().map(Into::into).collect();
        Ok(Page::new(resources, total, &pagination))
    }

    async fn list_by_app(&self, app_name: &str) -> Result<Vec<Resource>, FindResourceError> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE app_name = $1 ORDER BY name"
        ))
        .bind(app_name)
        .fetch_all(&self.pool)
        .await
        .map_err(FindResourceError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transition(
        &self,
        id: &ResourceId,
        to: ResourceState,
        error: Option<&str>,
    ) -> Result<Resource, UpdateResourceError> {
        let allowed_from = allowed_sources(to);

        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            r#"
            UPDATE resources
            SET state = $2::resource_state,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1 AND state::text = ANY($4)
            RETURNING {RESOURCE_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(state_text(to))
        .bind(error)
        .bind(allowed_from)
        .fetch_optional(&self.pool)
        .await
        .map_err(UpdateResourceError::Database)?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.classify_conflict(id, to).await),
        }
    }

    async fn set_properties(
        &self,
        id: &ResourceId,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), UpdateResourceError> {
        let patch = serde_json::to_value(properties).unwrap_or_default();

        let result = sqlx::query(
            r#"
            UPDATE resources
            SET properties = properties || $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(patch)
        .execute(&self.pool)
        .await
        .map_err(UpdateResourceError::Database)?;

        if result.rows_affected() == 0 {
            return Err(UpdateResourceError::NotFound(*id));
        }
        Ok(())
    }
}

impl PgResourceRepository {
    async fn classify_conflict(&self, id: &ResourceId, to: ResourceState) -> UpdateResourceError {
        match self.find_by_id(id).await {
            Ok(Some(current)) => UpdateResourceError::InvalidTransition {
                from: state_text(current.state).to_string(),
                to: state_text(to).to_string(),
            },
            Ok(None) => UpdateResourceError::NotFound(*id),
            Err(FindResourceError::Database(e)) => UpdateResourceError::Database(e),
        }
    }
}

/// Source states from which `to` may be reached, mirroring
/// `ResourceState::can_transition_to`.
fn allowed_sources(to: ResourceState) -> Vec<&'static str> {
    match to {
        ResourceState::Provisioning => vec!["requested"],
        ResourceState::Active | ResourceState::Failed => vec!["provisioning"],
        ResourceState::Terminated => vec!["active"],
        ResourceState::Requested => vec![],
    }
}

fn state_text(state: ResourceState) -> &'static str {
    match state {
        ResourceState::Requested => "requested",
        ResourceState::Provisioning => "provisioning",
        ResourceState::Active => "active",
        ResourceState::Failed => "failed",
        ResourceState::Terminated => "terminated",
    }
}

// =============================================================================
// Internal row type for SQLx mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: uuid::Uuid,
    app_name: String,
    name: String,
    resource_type: String,
    state: String,
    execution_id: Option<uuid::Uuid>,
    properties: serde_json::Value,
    fingerprint: Option<String>,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Resource {
            id: ResourceId::from_uuid(row.id),
            app_name: row.app_name,
            name: row.name,
            resource_type: row.resource_type,
            state: parse_state(&row.state),
            execution_id: row.execution_id.map(ExecutionId::from_uuid),
            properties: serde_json::from_value(row.properties).unwrap_or_default(),
            fingerprint: row.fingerprint,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn parse_state(s: &str) -> ResourceState {
    match s {
        "provisioning" => ResourceState::Provisioning,
        "active" => ResourceState::Active,
        "failed" => ResourceState::Failed,
        "terminated" => ResourceState::Terminated,
        _ => ResourceState::Requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_sources_mirror_domain_guard() {
        use ResourceState::*;
        for to in [Requested, Provisioning, Active, Failed, Terminated] {
            for from in [Requested, Provisioning, Active, Failed, Terminated] {
                let in_sql = allowed_sources(to).contains(&state_text(from));
                assert_eq!(
                    in_sql,
                    from.can_transition_to(to),
                    "mismatch for {from:?} -> {to:?}"
                );
            }
        }
    }
}
