//! PostgreSQL implementation of ApplicationRepository

use async_trait::async_trait;
use sqlx::PgPool;

use conductor_domain::{Application, ApplicationId, SpecId, SpecRecord};

use crate::pagination::{Page, Pagination};
use crate::repo::errors::{
    DeleteApplicationError, FindApplicationError, InsertSpecError, UpsertApplicationError,
};
use crate::repo::traits::{ApplicationRepository, NewApplication, NewSpec};

/// PostgreSQL application repository
pub struct PgApplicationRepository {
    pool: PgPool,
}

impl PgApplicationRepository {
    /// Create a new PostgreSQL application repository
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationRepository for PgApplicationRepository {
    async fn upsert(&self, app: &NewApplication) -> Result<Application, UpsertApplicationError> {
        let id = ApplicationId::new();

        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            INSERT INTO applications (id, name, team, environment)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET team = COALESCE(EXCLUDED.team, applications.team),
                environment = COALESCE(EXCLUDED.environment, applications.environment),
                updated_at = NOW()
            RETURNING id, name, team, environment, latest_spec_id, created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(&app.name)
        .bind(&app.team)
        .bind(&app.environment)
        .fetch_one(&self.pool)
        .await
        .map_err(UpsertApplicationError::Database)?;

        Ok(row.into())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Application>, FindApplicationError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, name, team, environment, latest_spec_id, created_at, updated_at
            FROM applications
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(FindApplicationError::Database)?;

        Ok(row.map(Into::into))
    }

    async fn list(&self, pagination: Pagination) -> Result<Page<Application>, FindApplicationError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM applications")
            .fetch_one(&self.pool)
            .await
            .map_err(FindApplicationError::Database)?;

        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, name, team, environment, latest_spec_id, created_at, updated_at
            FROM applications
            ORDER BY name
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(FindApplicationError::Database)?;

        let apps = rows.into_iter().map(Into::into).collect();
        Ok(Page::new(apps, total, &pagination))
    }

    async fn delete(&self, name: &str) -> Result<(), DeleteApplicationError> {
        let result = sqlx::query("DELETE FROM applications WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(DeleteApplicationError::Database)?;

        if result.rows_affected() == 0 {
            return Err(DeleteApplicationError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn insert_spec(&self, spec: &NewSpec) -> Result<SpecRecord, InsertSpecError> {
        let id = SpecId::new();

        let row = sqlx::query_as::<_, SpecRow>(
            r#"
            INSERT INTO specs (id, app_name, body, submitted_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, app_name, body, submitted_by, submitted_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(&spec.app_name)
        .bind(&spec.body)
        .bind(&spec.submitted_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.constraint() == Some("specs_app_name_fkey") {
                    return InsertSpecError::ApplicationNotFound(spec.app_name.clone());
                }
            }
            InsertSpecError::Database(e)
        })?;

        sqlx::query("UPDATE applications SET latest_spec_id = $2, updated_at = NOW() WHERE name = $1")
            .bind(&spec.app_name)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(InsertSpecError::Database)?;

        Ok(row.into())
    }

    async fn latest_spec(&self, app_name: &str) -> Result<Option<SpecRecord>, FindApplicationError> {
        let row = sqlx::query_as::<_, SpecRow>(
            r#"
            SELECT s.id, s.app_name, s.body, s.submitted_by, s.submitted_at
            FROM specs s
            JOIN applications a ON a.latest_spec_id = s.id
            WHERE a.name = $1
            "#,
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(FindApplicationError::Database)?;

        Ok(row.map(Into::into))
    }
}

// =============================================================================
// Internal row types for SQLx mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: uuid::Uuid,
    name: String,
    team: Option<String>,
    environment: Option<String>,
    latest_spec_id: Option<uuid::Uuid>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Application {
            id: ApplicationId::from_uuid(row.id),
            name: row.name,
            team: row.team,
            environment: row.environment,
            latest_spec_id: row.latest_spec_id.map(SpecId::from_uuid),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SpecRow {
    id: uuid::Uuid,
    app_name: String,
    body: serde_json::Value,
    submitted_by: Option<String>,
    submitted_at: chrono::DateTime<chrono::Utc>,
}

impl From<SpecRow> for SpecRecord {
    fn from(row: SpecRow) -> Self {
        SpecRecord {
            id: SpecId::from_uuid(row.id),
            app_name: row.app_name,
            body: row.body,
            submitted_by: row.submitted_by,
            submitted_at: row.submitted_at,
        }
    }
}
