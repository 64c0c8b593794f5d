//! PostgreSQL implementation of EventRepository

use async_trait::async_trait;
use sqlx::PgPool;

use conductor_domain::{Event, EventId};

use crate::pagination::{Page, Pagination};
use crate::repo::errors::AppendEventError;
use crate::repo::traits::EventRepository;

/// PostgreSQL event log
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Create a new PostgreSQL event repository
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn append(&self, event: &Event) -> Result<(), AppendEventError> {
        sqlx::query(
            r#"
            INSERT INTO events (id, event_type, app_name, occurred_at, data, source)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.app_name)
        .bind(event.timestamp)
        .bind(&event.data)
        .bind(&event.source)
        .execute(&self.pool)
        .await
        .map_err(AppendEventError::Database)?;

        Ok(())
    }

    async fn list_by_app(
        &self,
        app_name: &str,
        pagination: Pagination,
    ) -> Result<Page<Event>, AppendEventError> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE app_name = $1")
                .bind(app_name)
                .fetch_one(&self.pool)
                .await
                .map_err(AppendEventError::Database)?;

        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, app_name, occurred_at, data, source
            FROM events
            WHERE app_name = $1
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(app_name)
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppendEventError::Database)?;

        let events = rows.into_iter().map(Into::into).collect();
        Ok(Page::new(events, total, &pagination))
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: uuid::Uuid,
    event_type: String,
    app_name: String,
    occurred_at: chrono::DateTime<chrono::Utc>,
    data: serde_json::Value,
    source: String,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: EventId::from_uuid(row.id),
            event_type: row.event_type,
            app_name: row.app_name,
            timestamp: row.occurred_at,
            data: row.data,
            source: row.source,
        }
    }
}
