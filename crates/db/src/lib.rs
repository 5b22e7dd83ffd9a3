pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{DemoSeed, SeedResult, VerificationResult};
pub use repositories::{
    AuditEventRepository, InMemoryAuditEventRepository, InMemorySubjectRepository,
    RepositoryError, SqlAuditEventRepository, SqlSubjectRepository, SubjectRepository,
};
pub use service::{ApprovalService, DecisionRequest, ServiceError};
