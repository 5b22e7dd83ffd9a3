use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalChain, OverallStatus};
use crate::domain::person::Person;
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn generate(policy_key: PolicyKey) -> Self {
        Self(format!("{}-{}", policy_key.id_prefix(), Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects the resolver strategy and fixed-role table for a subject type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKey {
    CashRequest,
    SupplierInvoice,
    SupplierOnboarding,
    UserHierarchy,
}

impl PolicyKey {
    pub const ALL: [PolicyKey; 4] =
        [Self::CashRequest, Self::SupplierInvoice, Self::SupplierOnboarding, Self::UserHierarchy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CashRequest => "cash_request",
            Self::SupplierInvoice => "supplier_invoice",
            Self::SupplierOnboarding => "supplier_onboarding",
            Self::UserHierarchy => "user_hierarchy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cash_request" => Some(Self::CashRequest),
            "supplier_invoice" => Some(Self::SupplierInvoice),
            "supplier_onboarding" => Some(Self::SupplierOnboarding),
            "user_hierarchy" => Some(Self::UserHierarchy),
            _ => None,
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Self::CashRequest => "CR",
            Self::SupplierInvoice => "INV",
            Self::SupplierOnboarding => "SUP",
            Self::UserHierarchy => "USR",
        }
    }
}

/// Mirrors the chain's overall status plus the state before any chain exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectApprovalStatus {
    PendingAssignment,
    InProgress,
    Approved,
    Rejected,
}

impl SubjectApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingAssignment => "pending_assignment",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_assignment" => Some(Self::PendingAssignment),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl From<OverallStatus> for SubjectApprovalStatus {
    fn from(value: OverallStatus) -> Self {
        match value {
            OverallStatus::InProgress => Self::InProgress,
            OverallStatus::Approved => Self::Approved,
            OverallStatus::Rejected => Self::Rejected,
        }
    }
}

/// Business record under approval. Owns at most one live chain; finished
/// chains from earlier cycles are kept in `previous_cycles`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub policy_key: PolicyKey,
    pub title: String,
    pub initiator: String,
    pub approval: Option<ApprovalChain>,
    pub cycle: u32,
    #[serde(default)]
    pub previous_cycles: Vec<ApprovalChain>,
    /// Optimistic concurrency token, bumped by the repository on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(
        id: SubjectId,
        policy_key: PolicyKey,
        title: impl Into<String>,
        initiator: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            policy_key,
            title: title.into(),
            initiator: initiator.into(),
            approval: None,
            cycle: 1,
            previous_cycles: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn approval_status(&self) -> SubjectApprovalStatus {
        self.approval
            .as_ref()
            .map(|chain| chain.overall_status.into())
            .unwrap_or(SubjectApprovalStatus::PendingAssignment)
    }

    pub fn current_approval_level(&self) -> u32 {
        self.approval.as_ref().map(|chain| chain.current_level).unwrap_or(0)
    }

    pub fn current_approver(&self) -> Option<&Person> {
        self.approval.as_ref().and_then(ApprovalChain::current_approver)
    }

    pub fn is_awaiting(&self, approver_email: &str) -> bool {
        self.approval.as_ref().is_some_and(|chain| chain.is_awaiting(approver_email))
    }

    /// Starts a fresh approval cycle after a terminal outcome.
    pub fn restart_cycle(&mut self) -> Result<u32, WorkflowError> {
        let status = self.approval_status();
        let finished = match self.approval.take() {
            Some(chain) if chain.overall_status.is_terminal() => chain,
            other => {
                self.approval = other;
                return Err(WorkflowError::InvalidRestart {
                    subject_id: self.id.clone(),
                    status: status.as_str().to_string(),
                });
            }
        };

        self.previous_cycles.push(finished);
        self.cycle += 1;
        self.updated_at = Utc::now();
        Ok(self.cycle)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{PolicyKey, Subject, SubjectApprovalStatus, SubjectId};
    use crate::domain::approval::{ApprovalChain, Decision};
    use crate::domain::person::Person;
    use crate::errors::WorkflowError;

    fn subject() -> Subject {
        Subject::new(
            SubjectId("CR-1".to_string()),
            PolicyKey::CashRequest,
            "Generator diesel top-up",
            "Ada Obi",
        )
    }

    fn approver() -> Person {
        Person::new("Sam", "sam@example.com", "Supervisor", "Technical")
    }

    #[test]
    fn unassigned_subject_is_pending_assignment() {
        let subject = subject();
        assert_eq!(subject.approval_status(), SubjectApprovalStatus::PendingAssignment);
        assert_eq!(subject.current_approval_level(), 0);
        assert!(subject.current_approver().is_none());
    }

    #[test]
    fn restart_requires_terminal_chain() {
        let mut subject = subject();
        let error = subject.restart_cycle().expect_err("unassigned subject cannot restart");
        assert!(matches!(error, WorkflowError::InvalidRestart { .. }));

        subject.approval = Some(
            ApprovalChain::assign(PolicyKey::CashRequest, vec![approver()], Utc::now())
                .expect("chain"),
        );
        let error = subject.restart_cycle().expect_err("in-progress subject cannot restart");
        assert!(matches!(error, WorkflowError::InvalidRestart { .. }));
        assert!(subject.approval.is_some(), "failed restart keeps the live chain");
    }

    #[test]
    fn restart_archives_finished_chain() {
        let mut subject = subject();
        let mut chain = ApprovalChain::assign(PolicyKey::CashRequest, vec![approver()], Utc::now())
            .expect("chain");
        chain.decide("sam@example.com", Decision::Rejected, None, Utc::now()).expect("reject");
        subject.approval = Some(chain);
        assert_eq!(subject.approval_status(), SubjectApprovalStatus::Rejected);

        let cycle = subject.restart_cycle().expect("restart");

        assert_eq!(cycle, 2);
        assert!(subject.approval.is_none());
        assert_eq!(subject.previous_cycles.len(), 1);
        assert_eq!(subject.approval_status(), SubjectApprovalStatus::PendingAssignment);
    }

    #[test]
    fn policy_keys_round_trip_wire_names() {
        for key in PolicyKey::ALL {
            assert_eq!(PolicyKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(PolicyKey::parse("supplier-invoice"), Some(PolicyKey::SupplierInvoice));
        assert!(SubjectId::generate(PolicyKey::SupplierInvoice).0.starts_with("INV-"));
    }
}
