use thiserror::Error;

use crate::domain::approval::ChainError;
use crate::domain::person::Person;
use crate::domain::subject::SubjectId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("workflow configuration error: {0}")]
    Configuration(String),
    #[error("subject `{subject_id}` was not found")]
    SubjectNotFound { subject_id: SubjectId },
    #[error("subject `{subject_id}` has no approval chain")]
    ChainNotFound { subject_id: SubjectId },
    #[error("subject `{subject_id}` already has an approval chain for this cycle")]
    AlreadyAssigned { subject_id: SubjectId },
    #[error("subject `{subject_id}` approval already finished as `{status}`")]
    AlreadyProcessed { subject_id: SubjectId, status: String },
    #[error(
        "`{attempted}` may not decide subject `{subject_id}`; level {level} is waiting on `{}`",
        current.email
    )]
    NotCurrentApprover { subject_id: SubjectId, attempted: String, level: u32, current: Person },
    #[error("subject `{subject_id}` was modified concurrently (expected version {expected_version})")]
    Conflict { subject_id: SubjectId, expected_version: u64 },
    #[error("subject `{subject_id}` cannot start a new cycle while `{status}`")]
    InvalidRestart { subject_id: SubjectId, status: String },
    #[error("subject `{subject_id}` invariant violation: {message}")]
    InvariantViolation { subject_id: SubjectId, message: String },
}

impl WorkflowError {
    pub fn from_chain(subject_id: &SubjectId, error: ChainError) -> Self {
        let subject_id = subject_id.clone();
        match error {
            ChainError::Empty => {
                Self::Configuration(format!("policy resolved an empty chain for `{subject_id}`"))
            }
            ChainError::AlreadyProcessed { status } => {
                Self::AlreadyProcessed { subject_id, status: status.as_str().to_string() }
            }
            ChainError::NotCurrentApprover { attempted, level, current } => {
                Self::NotCurrentApprover { subject_id, attempted, level, current }
            }
            ChainError::Inconsistent(message) => Self::InvariantViolation { subject_id, message },
        }
    }

    /// Stable snake_case tag for logs, audit metadata, and CLI payloads.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::SubjectNotFound { .. } => "subject_not_found",
            Self::ChainNotFound { .. } => "chain_not_found",
            Self::AlreadyAssigned { .. } => "already_assigned",
            Self::AlreadyProcessed { .. } => "already_processed",
            Self::NotCurrentApprover { .. } => "not_current_approver",
            Self::Conflict { .. } => "conflict",
            Self::InvalidRestart { .. } => "invalid_restart",
            Self::InvariantViolation { .. } => "invariant_violation",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, current_approver: Option<String>, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not the approver for the active level.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "The record changed while you were acting on it. Please retry.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Workflow(error) => {
                let message = error.to_string();
                match error {
                    WorkflowError::NotCurrentApprover { current, .. } => Self::Forbidden {
                        message,
                        current_approver: Some(current.email),
                        correlation_id: unassigned(),
                    },
                    WorkflowError::SubjectNotFound { .. } | WorkflowError::ChainNotFound { .. } => {
                        Self::NotFound { message, correlation_id: unassigned() }
                    }
                    WorkflowError::Conflict { .. } => {
                        Self::Conflict { message, correlation_id: unassigned() }
                    }
                    WorkflowError::AlreadyAssigned { .. }
                    | WorkflowError::AlreadyProcessed { .. }
                    | WorkflowError::InvalidRestart { .. } => {
                        Self::BadRequest { message, correlation_id: unassigned() }
                    }
                    WorkflowError::Configuration(_) | WorkflowError::InvariantViolation { .. } => {
                        Self::Internal { message, correlation_id: unassigned() }
                    }
                }
            }
            ApplicationError::InvalidInput(message) => {
                Self::BadRequest { message, correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::approval::{ChainError, OverallStatus};
    use crate::domain::person::Person;
    use crate::domain::subject::SubjectId;
    use crate::errors::{ApplicationError, InterfaceError, WorkflowError};

    fn subject_id() -> SubjectId {
        SubjectId("CR-7".to_owned())
    }

    #[test]
    fn not_current_approver_maps_to_forbidden_with_redirect() {
        let interface = ApplicationError::from(WorkflowError::NotCurrentApprover {
            subject_id: subject_id(),
            attempted: "eve@example.com".to_owned(),
            level: 2,
            current: Person::new("Dana", "dana@example.com", "Head of Technical", "Technical"),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Forbidden { ref current_approver, ref correlation_id, .. }
                if current_approver.as_deref() == Some("dana@example.com") && correlation_id == "req-1"
        ));
    }

    #[test]
    fn conflict_is_retryable_and_maps_to_conflict() {
        let error = WorkflowError::Conflict { subject_id: subject_id(), expected_version: 3 };
        assert!(error.is_retryable());

        let interface = ApplicationError::from(error).into_interface("req-2");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn already_processed_is_a_caller_error() {
        let error = WorkflowError::from_chain(
            &subject_id(),
            ChainError::AlreadyProcessed { status: OverallStatus::Rejected },
        );
        assert_eq!(error.class(), "already_processed");

        let interface = ApplicationError::from(error).into_interface("req-3");
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn inconsistent_chain_maps_to_internal() {
        let error =
            WorkflowError::from_chain(&subject_id(), ChainError::Inconsistent("bad".to_owned()));
        let interface = ApplicationError::from(error).into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
