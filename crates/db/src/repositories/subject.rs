use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use tracing::warn;

use signoff_core::domain::approval::ApprovalChain;
use signoff_core::domain::person::EmailKey;
use signoff_core::domain::subject::{PolicyKey, Subject, SubjectApprovalStatus, SubjectId};

use super::{RepositoryError, SubjectRepository};
use crate::DbPool;

const SUBJECT_COLUMNS: &str = "id,
    policy_key,
    title,
    initiator,
    cycle,
    approval_json,
    previous_cycles_json,
    current_approval_level,
    approval_status,
    current_approver_email,
    version,
    created_at,
    updated_at";

/// Stores the chain as a JSON document next to flat mirror columns
/// (status, level, approver email) that exist only for querying.
pub struct SqlSubjectRepository {
    pool: DbPool,
}

impl SqlSubjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: &SubjectId) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subject WHERE id = ?")
            .bind(&id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

#[async_trait::async_trait]
impl SubjectRepository for SqlSubjectRepository {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SUBJECT_COLUMNS} FROM subject WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(subject_from_row).transpose()
    }

    async fn insert(&self, subject: &Subject) -> Result<(), RepositoryError> {
        let columns = SubjectColumns::encode(subject)?;
        let result = sqlx::query(
            "INSERT INTO subject (
                id,
                policy_key,
                title,
                initiator,
                cycle,
                approval_json,
                previous_cycles_json,
                current_approval_level,
                approval_status,
                current_approver_email,
                version,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&subject.id.0)
        .bind(subject.policy_key.as_str())
        .bind(&subject.title)
        .bind(&subject.initiator)
        .bind(i64::from(subject.cycle))
        .bind(&columns.approval_json)
        .bind(&columns.previous_cycles_json)
        .bind(i64::from(subject.current_approval_level()))
        .bind(subject.approval_status().as_str())
        .bind(&columns.current_approver_email)
        .bind(columns.version)
        .bind(format_timestamp(&subject.created_at))
        .bind(format_timestamp(&subject.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::Duplicate(subject.id.clone()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update(
        &self,
        subject: &Subject,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let columns = SubjectColumns::encode(subject)?;
        let expected = to_i64("version", expected_version)?;
        let result = sqlx::query(
            "UPDATE subject SET
                title = ?,
                initiator = ?,
                cycle = ?,
                approval_json = ?,
                previous_cycles_json = ?,
                current_approval_level = ?,
                approval_status = ?,
                current_approver_email = ?,
                version = version + 1,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&subject.title)
        .bind(&subject.initiator)
        .bind(i64::from(subject.cycle))
        .bind(&columns.approval_json)
        .bind(&columns.previous_cycles_json)
        .bind(i64::from(subject.current_approval_level()))
        .bind(subject.approval_status().as_str())
        .bind(&columns.current_approver_email)
        .bind(format_timestamp(&subject.updated_at))
        .bind(&subject.id.0)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.exists(&subject.id).await? {
                return Err(RepositoryError::Conflict {
                    subject_id: subject.id.clone(),
                    expected_version,
                });
            }
            return Err(RepositoryError::NotFound(subject.id.clone()));
        }
        Ok(expected_version + 1)
    }

    async fn list_pending_for_approver(
        &self,
        approver_email: &str,
    ) -> Result<Vec<Subject>, RepositoryError> {
        let key = EmailKey::new(approver_email);
        let rows = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS}
             FROM subject
             WHERE current_approver_email = ? AND approval_status = ?
             ORDER BY updated_at ASC, id ASC"
        ))
        .bind(key.as_str())
        .bind(SubjectApprovalStatus::InProgress.as_str())
        .fetch_all(&self.pool)
        .await?;

        let subjects: Vec<Subject> =
            rows.into_iter().map(subject_from_row).collect::<Result<_, _>>()?;
        Ok(subjects.into_iter().filter(|subject| subject.is_awaiting(key.as_str())).collect())
    }

    async fn list_all(&self) -> Result<Vec<Subject>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subject ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(subject_from_row).collect()
    }

    async fn delete(&self, id: &SubjectId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM subject WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

struct SubjectColumns {
    approval_json: Option<String>,
    previous_cycles_json: String,
    current_approver_email: Option<String>,
    version: i64,
}

impl SubjectColumns {
    fn encode(subject: &Subject) -> Result<Self, RepositoryError> {
        let approval_json = subject
            .approval
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Encode(format!("approval chain: {error}")))?;
        let previous_cycles_json = serde_json::to_string(&subject.previous_cycles)
            .map_err(|error| RepositoryError::Encode(format!("previous cycles: {error}")))?;
        let current_approver_email = match subject.approval_status() {
            SubjectApprovalStatus::InProgress => {
                subject.current_approver().map(|person| person.email_key().as_str().to_string())
            }
            _ => None,
        };

        Ok(Self {
            approval_json,
            previous_cycles_json,
            current_approver_email,
            version: to_i64("version", subject.version)?,
        })
    }
}

fn subject_from_row(row: SqliteRow) -> Result<Subject, RepositoryError> {
    let id = SubjectId(row.try_get("id")?);
    let policy_raw: String = row.try_get("policy_key")?;
    let policy_key = PolicyKey::parse(&policy_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown policy_key `{policy_raw}` for `{id}`"))
    })?;

    let approval = row
        .try_get::<Option<String>, _>("approval_json")?
        .map(|raw| serde_json::from_str::<ApprovalChain>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("approval_json for `{id}`: {error}")))?;
    let previous_cycles: Vec<ApprovalChain> =
        serde_json::from_str(&row.try_get::<String, _>("previous_cycles_json")?).map_err(
            |error| RepositoryError::Decode(format!("previous_cycles_json for `{id}`: {error}")),
        )?;

    let subject = Subject {
        policy_key,
        title: row.try_get("title")?,
        initiator: row.try_get("initiator")?,
        approval,
        cycle: parse_u32("cycle", row.try_get("cycle")?)?,
        previous_cycles,
        version: parse_u64("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        id,
    };

    let stored_level = parse_u32("current_approval_level", row.try_get("current_approval_level")?)?;
    let stored_status: String = row.try_get("approval_status")?;
    if stored_level != subject.current_approval_level()
        || stored_status != subject.approval_status().as_str()
    {
        // The chain document wins; the flat columns are only an index.
        warn!(
            event_name = "db.subject.mirror_mismatch",
            subject_id = %subject.id,
            stored_level,
            stored_status = stored_status.as_str(),
            chain_level = subject.current_approval_level(),
            chain_status = subject.approval_status().as_str(),
            "subject mirror columns disagree with the stored chain"
        );
    }

    Ok(subject)
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::Encode(format!("value for `{column}` does not fit in i64: {value}"))
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::domain::approval::{ApprovalChain, Decision};
    use signoff_core::domain::person::Person;
    use signoff_core::domain::subject::{PolicyKey, Subject, SubjectApprovalStatus, SubjectId};

    use super::SqlSubjectRepository;
    use crate::migrations;
    use crate::repositories::{RepositoryError, SubjectRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn approvers() -> Vec<Person> {
        vec![
            Person::new("Sam Eze", "Sam.Eze@signoff.example", "Supervisor", "Technical"),
            Person::new("Chioma Okafor", "chioma.okafor@signoff.example", "Head of Technical", "Technical"),
        ]
    }

    fn assigned_subject(id: &str) -> Subject {
        let mut subject = Subject::new(
            SubjectId(id.to_string()),
            PolicyKey::CashRequest,
            "Generator diesel top-up",
            "Ada Obi",
        );
        subject.approval =
            Some(ApprovalChain::assign(PolicyKey::CashRequest, approvers(), Utc::now()).expect("chain"));
        subject
    }

    #[tokio::test]
    async fn sql_subject_repo_round_trip_preserves_chain() {
        let pool = setup_pool().await;
        let repo = SqlSubjectRepository::new(pool.clone());
        let subject = assigned_subject("CR-REL-001");

        repo.insert(&subject).await.expect("insert");
        let found = repo.find_by_id(&subject.id).await.expect("find");

        assert_eq!(found, Some(subject));
        pool.close().await;
    }

    #[tokio::test]
    async fn sql_subject_repo_rejects_duplicate_insert() {
        let pool = setup_pool().await;
        let repo = SqlSubjectRepository::new(pool.clone());
        let subject = assigned_subject("CR-REL-002");

        repo.insert(&subject).await.expect("first insert");
        let error = repo.insert(&subject).await.expect_err("duplicate");

        assert!(matches!(error, RepositoryError::Duplicate(ref id) if id == &subject.id));
        pool.close().await;
    }

    #[tokio::test]
    async fn sql_subject_repo_update_is_version_checked() {
        let pool = setup_pool().await;
        let repo = SqlSubjectRepository::new(pool.clone());
        let mut subject = assigned_subject("CR-REL-003");
        repo.insert(&subject).await.expect("insert");

        let stale = subject.clone();
        if let Some(chain) = subject.approval.as_mut() {
            chain.decide("sam.eze@signoff.example", Decision::Approved, None, Utc::now()).expect("decide");
        }
        let version = repo.update(&subject, 0).await.expect("first update");
        assert_eq!(version, 1);

        let error = repo.update(&stale, stale.version).await.expect_err("stale update");
        assert!(matches!(
            error,
            RepositoryError::Conflict { ref subject_id, expected_version: 0 } if subject_id == &subject.id
        ));

        let stored = repo.find_by_id(&subject.id).await.expect("find").expect("exists");
        assert_eq!(stored.version, 1);
        assert_eq!(stored.current_approval_level(), 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn sql_subject_repo_update_of_missing_subject_is_not_found() {
        let pool = setup_pool().await;
        let repo = SqlSubjectRepository::new(pool.clone());
        let subject = assigned_subject("CR-REL-404");

        let error = repo.update(&subject, 0).await.expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound(_)));
        pool.close().await;
    }

    #[tokio::test]
    async fn pending_listing_uses_only_the_active_level() {
        let pool = setup_pool().await;
        let repo = SqlSubjectRepository::new(pool.clone());

        let waiting_on_sam = assigned_subject("CR-REL-010");
        repo.insert(&waiting_on_sam).await.expect("insert");

        let mut waiting_on_chioma = assigned_subject("CR-REL-011");
        if let Some(chain) = waiting_on_chioma.approval.as_mut() {
            chain.decide("sam.eze@signoff.example", Decision::Approved, None, Utc::now()).expect("decide");
        }
        repo.insert(&waiting_on_chioma).await.expect("insert");

        let mut rejected = assigned_subject("CR-REL-012");
        if let Some(chain) = rejected.approval.as_mut() {
            chain.decide("sam.eze@signoff.example", Decision::Rejected, None, Utc::now()).expect("decide");
        }
        repo.insert(&rejected).await.expect("insert");

        let sam: Vec<String> = repo
            .list_pending_for_approver("  SAM.EZE@signoff.example ")
            .await
            .expect("list")
            .into_iter()
            .map(|subject| subject.id.0)
            .collect();
        assert_eq!(sam, vec!["CR-REL-010".to_string()]);

        let chioma = repo.list_pending_for_approver("chioma.okafor@signoff.example").await.expect("list");
        assert_eq!(chioma.len(), 1);
        assert_eq!(chioma[0].id.0, "CR-REL-011");

        let all = repo.list_all().await.expect("list all");
        assert_eq!(all.len(), 3);
        assert_eq!(
            all.iter().filter(|s| s.approval_status() == SubjectApprovalStatus::Rejected).count(),
            1
        );
        pool.close().await;
    }

    #[tokio::test]
    async fn unassigned_subject_stores_no_chain() {
        let pool = setup_pool().await;
        let repo = SqlSubjectRepository::new(pool.clone());
        let subject =
            Subject::new(SubjectId("SUP-REL-1".into()), PolicyKey::SupplierOnboarding, "Acme Fuel", "Ada Obi");

        repo.insert(&subject).await.expect("insert");
        let stored = repo.find_by_id(&subject.id).await.expect("find").expect("exists");

        assert!(stored.approval.is_none());
        assert_eq!(stored.approval_status(), SubjectApprovalStatus::PendingAssignment);
        assert!(repo.delete(&subject.id).await.expect("delete"));
        assert!(repo.find_by_id(&subject.id).await.expect("find").is_none());
        pool.close().await;
    }
}
