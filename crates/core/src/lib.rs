pub mod approvals;
pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use approvals::{ChainResolver, PolicyRegistry, ResolvedApprover, StartingIdentity};
pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use directory::{OrgChart, OrgDirectory};
pub use domain::approval::{
    ApprovalChain, ApprovalStep, Decision, HistoryEntry, OverallStatus, StepStatus,
};
pub use domain::person::{EmailKey, Person};
pub use domain::subject::{PolicyKey, Subject, SubjectApprovalStatus, SubjectId};
pub use errors::{ApplicationError, InterfaceError, WorkflowError};
pub use workflow::{
    BatchOutcome, NotificationPort, RequestContext, TracingNotifier, WorkflowEngine,
};
