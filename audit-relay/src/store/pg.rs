//! PostgreSQL event store backend
//!
//! Inserts use `ON CONFLICT (id) DO NOTHING`, so replaying a message whose
//! record is already present is a no-op that reports a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;

use super::{require_identity, EventStore, InsertOutcome};
use crate::config::DatabaseConfig;
use crate::error::{sanitize_url, StoreError, StoreErrorKind, StoreOperation};
use crate::event::{Event, EventFields, EventId};
use crate::registry::{EventStatus, EventType};

const SELECT_EVENTS: &str = "SELECT id, event_type, event_time, user_id, service_name, status, \
     event_fields FROM audit_events";

/// Create a PostgreSQL connection pool with retry logic
///
/// Uses exponential backoff between attempts.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_connect_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Database connection pool created: max={}, min={}",
                        config.max_connections,
                        config.min_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to database after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));

                tracing::warn!(
                    "Database connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_connect_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| {
            let mut err = StoreError::from(e);
            err.operation = StoreOperation::Connect;
            err.message = format!(
                "Failed to connect to database at '{}': {}",
                sanitize_url(&config.url),
                err.message
            );
            err
        })
}

/// PostgreSQL-backed event store
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Create a new PostgreSQL event store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the audit_events table and its indexes if missing
    ///
    /// Should be called once during startup.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id UUID PRIMARY KEY,
                event_type INTEGER NOT NULL,
                event_time TIMESTAMPTZ NOT NULL,
                user_id TEXT NOT NULL,
                service_name TEXT NOT NULL,
                status INTEGER NOT NULL,
                event_fields JSONB NOT NULL DEFAULT '{}'::jsonb,
                persisted_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("create audit_events table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events (event_type)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("create event_type index", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_events_persisted_at ON audit_events (persisted_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_error("create persisted_at index", e))?;

        Ok(())
    }
}

fn convert_rows(rows: Vec<EventRow>) -> Result<Vec<Event>, StoreError> {
    rows.into_iter().map(Event::try_from).collect()
}

fn migration_error(step: &str, err: sqlx::Error) -> StoreError {
    let mut err = StoreError::from(err).during(StoreOperation::Migration);
    err.message = format!("Failed to {}: {}", step, err.message);
    err
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        let id = require_identity(event)?;

        let result = sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, event_type, event_time, user_id, service_name, status, event_fields
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(*id.as_uuid())
        .bind(event.event_type.code())
        .bind(event.event_time)
        .bind(&event.user_id)
        .bind(&event.service_name)
        .bind(event.status.code())
        .bind(Json(&event.event_fields))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from(e).during(StoreOperation::Insert))?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn list(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{} ORDER BY persisted_at ASC, id ASC",
            SELECT_EVENTS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from(e).during(StoreOperation::Query))?;

        convert_rows(rows)
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(&format!("{} WHERE id = $1", SELECT_EVENTS))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from(e).during(StoreOperation::Query))?;

        row.map(Event::try_from).transpose()
    }

    async fn list_by_type(&self, code: i32) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{} WHERE event_type = $1 ORDER BY persisted_at ASC, id ASC",
            SELECT_EVENTS
        ))
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from(e).during(StoreOperation::Query))?;

        convert_rows(rows)
    }

    async fn delete(&self, id: EventId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM audit_events WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from(e).during(StoreOperation::Delete))?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from(e).during(StoreOperation::Query))
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct EventRow {
    id: uuid::Uuid,
    event_type: i32,
    event_time: DateTime<Utc>,
    user_id: String,
    service_name: String,
    status: i32,
    event_fields: Json<EventFields>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let conversion = |e: crate::registry::RegistryError| {
            StoreError::new(
                StoreOperation::Query,
                StoreErrorKind::TypeConversion,
                format!("row {}: {}", row.id, e),
            )
        };

        Ok(Event {
            id: Some(EventId::from_uuid(row.id)),
            event_type: EventType::from_code(row.event_type).map_err(conversion)?,
            event_time: row.event_time,
            user_id: row.user_id,
            service_name: row.service_name,
            status: EventStatus::from_code(row.status).map_err(conversion)?,
            event_fields: row.event_fields.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(event_type: i32, status: i32) -> EventRow {
        let fields = json!({"invoice": "inv-7"});
        EventRow {
            id: *EventId::derive("audit-events", 1, b"").as_uuid(),
            event_type,
            event_time: Utc::now(),
            user_id: "u-1".to_string(),
            service_name: "billing".to_string(),
            status,
            event_fields: Json(fields.as_object().cloned().unwrap_or_default()),
        }
    }

    #[test]
    fn test_row_conversion() {
        let event = Event::try_from(row(3, 200)).unwrap();
        assert_eq!(event.event_type, EventType::CustomerBilled);
        assert_eq!(event.status, EventStatus::Error);
        assert_eq!(event.id, Some(EventId::derive("audit-events", 1, b"")));
        assert_eq!(event.event_fields["invoice"], "inv-7");
    }

    #[test]
    fn test_row_with_unknown_code_is_rejected() {
        let err = Event::try_from(row(9, 100)).unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::TypeConversion);

        let err = Event::try_from(row(1, 300)).unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::TypeConversion);
    }
}
