use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use signoff_core::domain::subject::SubjectId;

use super::subject::{format_timestamp, parse_timestamp};
use super::{AuditEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditEventRepository {
    pool: DbPool,
}

impl SqlAuditEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditEventRepository for SqlAuditEventRepository {
    async fn append(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            let metadata_json = serde_json::to_string(&event.metadata)
                .map_err(|error| RepositoryError::Encode(format!("audit metadata: {error}")))?;
            sqlx::query(
                "INSERT INTO audit_event (
                    id,
                    subject_id,
                    correlation_id,
                    event_type,
                    category,
                    actor,
                    outcome,
                    metadata_json,
                    occurred_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.event_id)
            .bind(event.subject_id.as_ref().map(|id| id.0.as_str()))
            .bind(&event.correlation_id)
            .bind(&event.event_type)
            .bind(event.category.as_str())
            .bind(&event.actor)
            .bind(event.outcome.as_str())
            .bind(metadata_json)
            .bind(format_timestamp(&event.occurred_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_for_subject(&self, id: &SubjectId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                subject_id,
                correlation_id,
                event_type,
                category,
                actor,
                outcome,
                metadata_json,
                occurred_at
             FROM audit_event
             WHERE subject_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category_raw: String = row.try_get("category")?;
    let outcome_raw: String = row.try_get("outcome")?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&row.try_get::<String, _>("metadata_json")?)
            .map_err(|error| RepositoryError::Decode(format!("audit metadata_json: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        subject_id: row.try_get::<Option<String>, _>("subject_id")?.map(SubjectId),
        correlation_id: row.try_get("correlation_id")?,
        event_type: row.try_get("event_type")?,
        category: AuditCategory::parse(&category_raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown audit category `{category_raw}`"))
        })?,
        actor: row.try_get("actor")?,
        outcome: AuditOutcome::parse(&outcome_raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown audit outcome `{outcome_raw}`"))
        })?,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use signoff_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
    use signoff_core::domain::subject::SubjectId;

    use super::SqlAuditEventRepository;
    use crate::connect_with_settings;
    use crate::migrations;
    use crate::repositories::AuditEventRepository;

    #[tokio::test]
    async fn sql_audit_repo_appends_and_lists_by_subject() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlAuditEventRepository::new(pool.clone());
        let subject_id = SubjectId("INV-REL-1".to_string());

        let assigned = AuditEvent::new(
            Some(subject_id.clone()),
            "req-1",
            "workflow.chain_assigned",
            AuditCategory::Assignment,
            "ada.obi@signoff.example",
            AuditOutcome::Success,
        )
        .with_metadata("approvers", "yemi.adeyemi@signoff.example");
        let unrelated = AuditEvent::new(
            None,
            "req-2",
            "system.seeded",
            AuditCategory::System,
            "system",
            AuditOutcome::Success,
        );

        repo.append(&[assigned.clone(), unrelated]).await.expect("append");
        let events = repo.list_for_subject(&subject_id).await.expect("list");

        assert_eq!(events, vec![assigned]);
        pool.close().await;
    }
}
