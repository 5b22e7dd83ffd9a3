use async_trait::async_trait;
use thiserror::Error;

use signoff_core::audit::AuditEvent;
use signoff_core::domain::subject::{Subject, SubjectId};

pub mod audit;
pub mod memory;
pub mod subject;

pub use audit::SqlAuditEventRepository;
pub use memory::{InMemoryAuditEventRepository, InMemorySubjectRepository};
pub use subject::SqlSubjectRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("subject `{0}` already exists")]
    Duplicate(SubjectId),
    #[error("subject `{0}` does not exist")]
    NotFound(SubjectId),
    #[error("subject `{subject_id}` is no longer at version {expected_version}")]
    Conflict { subject_id: SubjectId, expected_version: u64 },
}

/// Storage for subjects and their embedded approval chains.
///
/// `update` is a compare-and-swap on `Subject::version`: it succeeds only when
/// the stored version still equals `expected_version` and returns the new one.
#[async_trait]
pub trait SubjectRepository: Send + Sync {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, RepositoryError>;

    async fn insert(&self, subject: &Subject) -> Result<(), RepositoryError>;

    async fn update(&self, subject: &Subject, expected_version: u64)
        -> Result<u64, RepositoryError>;

    /// In-progress subjects whose active step belongs to `approver_email`.
    async fn list_pending_for_approver(
        &self,
        approver_email: &str,
    ) -> Result<Vec<Subject>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Subject>, RepositoryError>;

    async fn delete(&self, id: &SubjectId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    async fn append(&self, events: &[AuditEvent]) -> Result<(), RepositoryError>;

    async fn list_for_subject(&self, id: &SubjectId) -> Result<Vec<AuditEvent>, RepositoryError>;
}
