use signoff_core::approvals::StartingIdentity;
use signoff_core::domain::approval::Decision;
use signoff_core::domain::subject::{PolicyKey, Subject, SubjectApprovalStatus, SubjectId};
use signoff_core::errors::WorkflowError;
use signoff_core::workflow::RequestContext;

use crate::repositories::SubjectRepository;
use crate::service::{ApprovalService, ServiceError};

#[derive(Clone, Copy, Debug)]
enum SeedIdentity {
    Person(&'static str),
    Department(&'static str, Option<&'static str>),
    SupplierType(&'static str),
}

impl SeedIdentity {
    fn to_identity(self) -> StartingIdentity {
        match self {
            Self::Person(name) => StartingIdentity::person(name),
            Self::Department(department, category) => {
                StartingIdentity::department(department, category.map(str::to_string))
            }
            Self::SupplierType(supplier_type) => StartingIdentity::supplier_type(supplier_type),
        }
    }
}

struct DemoSubjectContract {
    id: &'static str,
    policy_key: PolicyKey,
    title: &'static str,
    initiator: &'static str,
    identity: Option<SeedIdentity>,
    /// Applied in order, each by whoever holds the active level.
    decisions: &'static [Decision],
    expected_status: SubjectApprovalStatus,
    expected_approver: Option<&'static str>,
    description: &'static str,
}

/// Demo subjects for the bundled sample org chart, one or more per policy.
const DEMO_SUBJECTS: &[DemoSubjectContract] = &[
    DemoSubjectContract {
        id: "CR-DEMO-001",
        policy_key: PolicyKey::CashRequest,
        title: "Generator diesel top-up, Lekki site",
        initiator: "Ada Obi",
        identity: Some(SeedIdentity::Person("Ada Obi")),
        decisions: &[Decision::Approved],
        expected_status: SubjectApprovalStatus::InProgress,
        expected_approver: Some("chioma.nwosu@signoff.example"),
        description: "Cash request half way up the supervisor chain",
    },
    DemoSubjectContract {
        id: "CR-DEMO-002",
        policy_key: PolicyKey::CashRequest,
        title: "Cable ties and lugs",
        initiator: "Bola Ade",
        identity: None,
        decisions: &[],
        expected_status: SubjectApprovalStatus::PendingAssignment,
        expected_approver: None,
        description: "Cash request not yet assigned",
    },
    DemoSubjectContract {
        id: "INV-DEMO-001",
        policy_key: PolicyKey::SupplierInvoice,
        title: "Diesel supply invoice, March",
        initiator: "Kemi Lawal",
        identity: Some(SeedIdentity::Department("Technical", Some("diesel"))),
        decisions: &[],
        expected_status: SubjectApprovalStatus::InProgress,
        expected_approver: Some("yemi.balogun@signoff.example"),
        description: "Category-specific invoice route waiting on its first level",
    },
    DemoSubjectContract {
        id: "SUP-DEMO-001",
        policy_key: PolicyKey::SupplierOnboarding,
        title: "Onboard Acme Fuel Ltd",
        initiator: "Ife Oladipo",
        identity: Some(SeedIdentity::SupplierType("fuel")),
        decisions: &[Decision::Approved, Decision::Rejected],
        expected_status: SubjectApprovalStatus::Rejected,
        expected_approver: None,
        description: "Onboarding rejected at level two",
    },
    DemoSubjectContract {
        id: "USR-DEMO-001",
        policy_key: PolicyKey::UserHierarchy,
        title: "Laptop replacement",
        initiator: "Zainab Sule",
        identity: Some(SeedIdentity::Person("Zainab Sule")),
        decisions: &[Decision::Approved, Decision::Approved, Decision::Approved, Decision::Approved],
        expected_status: SubjectApprovalStatus::Approved,
        expected_approver: None,
        description: "User request approved at every level",
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeededSubject {
    pub subject_id: SubjectId,
    pub description: &'static str,
    pub created: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub subjects: Vec<SeededSubject>,
}

impl SeedResult {
    pub fn created_count(&self) -> usize {
        self.subjects.iter().filter(|subject| subject.created).count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedCheck {
    pub subject_id: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub checks: Vec<SeedCheck>,
}

impl VerificationResult {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }
}

/// Loads, verifies, and removes the demo subjects. Loading is idempotent:
/// subjects that already exist are left untouched.
pub struct DemoSeed;

impl DemoSeed {
    pub fn subject_ids() -> Vec<SubjectId> {
        DEMO_SUBJECTS.iter().map(|contract| SubjectId(contract.id.to_string())).collect()
    }

    pub async fn load<R: SubjectRepository>(
        service: &ApprovalService<R>,
        context: &RequestContext,
    ) -> Result<SeedResult, ServiceError> {
        let mut subjects = Vec::with_capacity(DEMO_SUBJECTS.len());
        for contract in DEMO_SUBJECTS {
            let subject_id = SubjectId(contract.id.to_string());
            let created = service.repository().find_by_id(&subject_id).await?.is_none();
            if created {
                Self::load_one(service, contract, context).await?;
            }
            subjects.push(SeededSubject { subject_id, description: contract.description, created });
        }
        Ok(SeedResult { subjects })
    }

    async fn load_one<R: SubjectRepository>(
        service: &ApprovalService<R>,
        contract: &DemoSubjectContract,
        context: &RequestContext,
    ) -> Result<(), ServiceError> {
        let subject = Subject::new(
            SubjectId(contract.id.to_string()),
            contract.policy_key,
            contract.title,
            contract.initiator,
        );
        let subject = service.create_subject(subject, context).await?;

        let Some(identity) = contract.identity else {
            return Ok(());
        };
        service.assign(&subject.id, &identity.to_identity(), context).await?;

        for decision in contract.decisions {
            let approver = service.current_approver(&subject.id).await?.ok_or_else(|| {
                ServiceError::Workflow(WorkflowError::Configuration(format!(
                    "demo subject `{}` ran out of approvers",
                    contract.id
                )))
            })?;
            service
                .decide(&subject.id, &approver.email, *decision, Some("demo seed".to_string()), context)
                .await?;
        }
        Ok(())
    }

    pub async fn verify<R: SubjectRepository>(
        service: &ApprovalService<R>,
    ) -> Result<VerificationResult, ServiceError> {
        let mut checks = Vec::with_capacity(DEMO_SUBJECTS.len());
        for contract in DEMO_SUBJECTS {
            let subject_id = SubjectId(contract.id.to_string());
            let check = match service.repository().find_by_id(&subject_id).await? {
                None => SeedCheck {
                    subject_id: contract.id.to_string(),
                    passed: false,
                    detail: "missing".to_string(),
                },
                Some(subject) => {
                    let status = subject.approval_status();
                    let approver = subject.current_approver().map(|person| person.email_key());
                    let approver_matches = match (contract.expected_approver, &approver) {
                        (None, None) => true,
                        (Some(expected), Some(actual)) => actual.matches(expected),
                        _ => false,
                    };
                    SeedCheck {
                        subject_id: contract.id.to_string(),
                        passed: status == contract.expected_status && approver_matches,
                        detail: format!(
                            "status={} approver={}",
                            status.as_str(),
                            approver.as_ref().map(|key| key.as_str()).unwrap_or("-")
                        ),
                    }
                }
            };
            checks.push(check);
        }
        Ok(VerificationResult { checks })
    }

    /// Returns how many demo subjects were deleted.
    pub async fn clean<R: SubjectRepository>(
        service: &ApprovalService<R>,
    ) -> Result<usize, ServiceError> {
        let mut removed = 0;
        for subject_id in Self::subject_ids() {
            if service.repository().delete(&subject_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
