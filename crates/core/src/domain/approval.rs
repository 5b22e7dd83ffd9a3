use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::person::Person;
use crate::domain::subject::PolicyKey;

/// Lifecycle of a single level. Steps behind the active one sit in
/// `Waiting` until the chain reaches them, so at most one step is ever
/// `Pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Waiting,
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    fn step_status(self) -> StepStatus {
        match self {
            Self::Approved => StepStatus::Approved,
            Self::Rejected => StepStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown decision `{0}` (expected approved|rejected)")]
pub struct ParseDecisionError(pub String);

impl FromStr for Decision {
    type Err = ParseDecisionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(ParseDecisionError(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    InProgress,
    Approved,
    Rejected,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub level: u32,
    pub approver: Person,
    pub status: StepStatus,
    pub decision: Option<Decision>,
    pub comments: Option<String>,
    pub action_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    /// Set once the activation notification for this step went out.
    #[serde(default)]
    pub notified: bool,
}

impl ApprovalStep {
    fn waiting(level: u32, approver: Person) -> Self {
        Self {
            level,
            approver,
            status: StepStatus::Waiting,
            decision: None,
            comments: None,
            action_at: None,
            activated_at: None,
            notified: false,
        }
    }

    fn activate(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Pending;
        self.activated_at = Some(now);
    }

    pub fn is_active(&self) -> bool {
        self.status == StepStatus::Pending
    }
}

/// Decided step as shown in audit history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub level: u32,
    pub approver: Person,
    pub decision: Decision,
    pub comments: Option<String>,
    pub action_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub decided: ApprovalStep,
    pub activated: Option<ApprovalStep>,
    pub terminal: Option<OverallStatus>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("approval chain must contain at least one approver")]
    Empty,
    #[error("approval chain already finished with status `{}`", status.as_str())]
    AlreadyProcessed { status: OverallStatus },
    #[error("`{attempted}` is not the active approver at level {level}; waiting on `{}`", current.email)]
    NotCurrentApprover { attempted: String, level: u32, current: Person },
    #[error("approval chain is inconsistent: {0}")]
    Inconsistent(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    pub policy_key: PolicyKey,
    pub steps: Vec<ApprovalStep>,
    /// 1-based pointer at the active step; 0 once the chain is terminal.
    pub current_level: u32,
    pub overall_status: OverallStatus,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminal_notified: bool,
}

impl ApprovalChain {
    pub fn assign(
        policy_key: PolicyKey,
        approvers: Vec<Person>,
        now: DateTime<Utc>,
    ) -> Result<Self, ChainError> {
        if approvers.is_empty() {
            return Err(ChainError::Empty);
        }

        let mut steps: Vec<ApprovalStep> = approvers
            .into_iter()
            .enumerate()
            .map(|(index, approver)| ApprovalStep::waiting(level_at(index), approver))
            .collect();
        if let Some(first) = steps.first_mut() {
            first.activate(now);
        }

        Ok(Self {
            policy_key,
            steps,
            current_level: 1,
            overall_status: OverallStatus::InProgress,
            assigned_at: now,
            completed_at: None,
            terminal_notified: false,
        })
    }

    /// Applies one decision to the active step. All checks run before any
    /// field is touched, so a failed call leaves the chain as it was.
    pub fn decide(
        &mut self,
        approver_email: &str,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ChainError> {
        if self.overall_status.is_terminal() {
            return Err(ChainError::AlreadyProcessed { status: self.overall_status });
        }
        self.check_consistency()?;

        let index = self.active_index().ok_or_else(|| {
            ChainError::Inconsistent(format!("no step at level {}", self.current_level))
        })?;
        let active = &self.steps[index];
        if !active.approver.has_email(approver_email) {
            return Err(ChainError::NotCurrentApprover {
                attempted: approver_email.trim().to_string(),
                level: active.level,
                current: active.approver.clone(),
            });
        }

        let step = &mut self.steps[index];
        step.status = decision.step_status();
        step.decision = Some(decision);
        step.comments = comments.map(|text| text.trim().to_string()).filter(|text| !text.is_empty());
        step.action_at = Some(now);
        let decided = step.clone();

        if decision == Decision::Rejected {
            self.finish(OverallStatus::Rejected, now);
            return Ok(DecisionOutcome {
                decided,
                activated: None,
                terminal: Some(OverallStatus::Rejected),
            });
        }

        match self.steps.get_mut(index + 1) {
            Some(next) => {
                next.activate(now);
                let activated = next.clone();
                self.current_level = activated.level;
                Ok(DecisionOutcome { decided, activated: Some(activated), terminal: None })
            }
            None => {
                self.finish(OverallStatus::Approved, now);
                Ok(DecisionOutcome { decided, activated: None, terminal: Some(OverallStatus::Approved) })
            }
        }
    }

    fn finish(&mut self, status: OverallStatus, now: DateTime<Utc>) {
        self.current_level = 0;
        self.overall_status = status;
        self.completed_at = Some(now);
    }

    fn active_index(&self) -> Option<usize> {
        if self.overall_status.is_terminal() || self.current_level == 0 {
            return None;
        }
        let index = usize::try_from(self.current_level - 1).ok()?;
        (index < self.steps.len()).then_some(index)
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.active_index().map(|index| &self.steps[index])
    }

    pub(crate) fn current_step_mut(&mut self) -> Option<&mut ApprovalStep> {
        let index = self.active_index()?;
        self.steps.get_mut(index)
    }

    pub fn current_approver(&self) -> Option<&Person> {
        self.current_step().map(|step| &step.approver)
    }

    pub fn is_awaiting(&self, approver_email: &str) -> bool {
        self.current_approver().is_some_and(|person| person.has_email(approver_email))
    }

    pub fn approved_count(&self) -> usize {
        self.steps.iter().filter(|step| step.status == StepStatus::Approved).count()
    }

    /// Whole percent of approved steps, rounded half up.
    pub fn progress(&self) -> u8 {
        let total = self.steps.len();
        if total == 0 {
            return 0;
        }
        let percent = (self.approved_count() * 200 + total) / (total * 2);
        u8::try_from(percent.min(100)).unwrap_or(100)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.steps
            .iter()
            .filter_map(|step| {
                step.decision.filter(|_| step.status.is_decided()).map(|decision| HistoryEntry {
                    level: step.level,
                    approver: step.approver.clone(),
                    decision,
                    comments: step.comments.clone(),
                    action_at: step.action_at,
                })
            })
            .collect()
    }

    /// Checks that the stored pointer agrees with the step statuses.
    /// The pointer is authoritative; this only refuses records that were
    /// edited into a state no transition could have produced.
    pub fn check_consistency(&self) -> Result<(), ChainError> {
        if self.steps.is_empty() {
            return Err(ChainError::Empty);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.level != level_at(index) {
                return Err(ChainError::Inconsistent(format!(
                    "step at position {} carries level {}",
                    index + 1,
                    step.level
                )));
            }
        }

        let pending = self.steps.iter().filter(|step| step.status == StepStatus::Pending).count();
        match self.overall_status {
            OverallStatus::InProgress => {
                let Some(active) = self.active_index() else {
                    return Err(ChainError::Inconsistent(format!(
                        "current level {} is outside 1..={}",
                        self.current_level,
                        self.steps.len()
                    )));
                };
                if pending != 1 || self.steps[active].status != StepStatus::Pending {
                    return Err(ChainError::Inconsistent(format!(
                        "level {} is not the single pending step",
                        self.current_level
                    )));
                }
                self.expect_prefix_approved(active)?;
                self.expect_suffix_waiting(active + 1)?;
            }
            OverallStatus::Approved => {
                if self.current_level != 0 || pending != 0 {
                    return Err(ChainError::Inconsistent(
                        "approved chain still points at an active level".to_string(),
                    ));
                }
                self.expect_prefix_approved(self.steps.len())?;
            }
            OverallStatus::Rejected => {
                if self.current_level != 0 || pending != 0 {
                    return Err(ChainError::Inconsistent(
                        "rejected chain still points at an active level".to_string(),
                    ));
                }
                let Some(rejected) =
                    self.steps.iter().position(|step| step.status == StepStatus::Rejected)
                else {
                    return Err(ChainError::Inconsistent(
                        "rejected chain has no rejected step".to_string(),
                    ));
                };
                self.expect_prefix_approved(rejected)?;
                self.expect_suffix_waiting(rejected + 1)?;
            }
        }

        Ok(())
    }

    fn expect_prefix_approved(&self, end: usize) -> Result<(), ChainError> {
        match self.steps[..end].iter().find(|step| step.status != StepStatus::Approved) {
            Some(step) => Err(ChainError::Inconsistent(format!(
                "level {} is `{}` but should already be approved",
                step.level,
                step.status.as_str()
            ))),
            None => Ok(()),
        }
    }

    fn expect_suffix_waiting(&self, start: usize) -> Result<(), ChainError> {
        match self.steps.iter().skip(start).find(|step| step.status != StepStatus::Waiting) {
            Some(step) => Err(ChainError::Inconsistent(format!(
                "level {} is `{}` but was never activated",
                step.level,
                step.status.as_str()
            ))),
            None => Ok(()),
        }
    }
}

fn level_at(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}
