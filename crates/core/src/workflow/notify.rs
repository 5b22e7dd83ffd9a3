use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::approval::{ApprovalChain, ApprovalStep};
use crate::domain::subject::{Subject, SubjectId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// One-way sink told about every newly active approver and every terminal
/// outcome. Delivery is best-effort; the engine logs failures and moves on.
pub trait NotificationPort: Send + Sync {
    fn notify_activated(&self, step: &ApprovalStep, subject: &Subject)
        -> Result<(), NotificationError>;

    fn notify_terminal(&self, chain: &ApprovalChain, subject: &Subject)
        -> Result<(), NotificationError>;
}

/// Emits structured log events instead of sending anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl NotificationPort for TracingNotifier {
    fn notify_activated(
        &self,
        step: &ApprovalStep,
        subject: &Subject,
    ) -> Result<(), NotificationError> {
        info!(
            event_name = "workflow.notify.activated",
            subject_id = %subject.id,
            policy_key = subject.policy_key.as_str(),
            level = step.level,
            approver_email = %step.approver.email_key(),
            approver_role = %step.approver.role,
            "approval requested"
        );
        Ok(())
    }

    fn notify_terminal(
        &self,
        chain: &ApprovalChain,
        subject: &Subject,
    ) -> Result<(), NotificationError> {
        info!(
            event_name = "workflow.notify.terminal",
            subject_id = %subject.id,
            policy_key = subject.policy_key.as_str(),
            status = chain.overall_status.as_str(),
            initiator = %subject.initiator,
            "approval finished"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl NotificationPort for NoopNotifier {
    fn notify_activated(&self, _: &ApprovalStep, _: &Subject) -> Result<(), NotificationError> {
        Ok(())
    }

    fn notify_terminal(&self, _: &ApprovalChain, _: &Subject) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Activated { subject_id: SubjectId, level: u32, approver_email: String },
    Terminal { subject_id: SubjectId, status: String },
}

/// Keeps every delivered notification in memory. Can be switched into a
/// failing mode to exercise retry paths.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("recording notifier set to fail".to_string()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}

impl NotificationPort for RecordingNotifier {
    fn notify_activated(
        &self,
        step: &ApprovalStep,
        subject: &Subject,
    ) -> Result<(), NotificationError> {
        self.record(Notification::Activated {
            subject_id: subject.id.clone(),
            level: step.level,
            approver_email: step.approver.email.clone(),
        })
    }

    fn notify_terminal(
        &self,
        chain: &ApprovalChain,
        subject: &Subject,
    ) -> Result<(), NotificationError> {
        self.record(Notification::Terminal {
            subject_id: subject.id.clone(),
            status: chain.overall_status.as_str().to_string(),
        })
    }
}
