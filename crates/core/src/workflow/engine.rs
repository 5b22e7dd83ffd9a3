use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::approvals::{ChainResolver, ResolvedApprover, StartingIdentity};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approval::{
    ApprovalChain, ApprovalStep, Decision, DecisionOutcome, HistoryEntry,
};
use crate::domain::person::Person;
use crate::domain::subject::{PolicyKey, Subject, SubjectId};
use crate::errors::WorkflowError;
use crate::workflow::notify::NotificationPort;

/// Who is acting and under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    pub actor: String,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), actor: actor.into() }
    }

    pub fn system() -> Self {
        Self::new(format!("req-{}", Uuid::new_v4().simple()), "system")
    }
}

/// Notifications actually delivered by one dispatch pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub activation_sent: Option<u32>,
    pub terminal_sent: bool,
    pub failures: Vec<String>,
}

impl DispatchReport {
    /// True when a notified flag flipped and the subject needs saving.
    pub fn changed(&self) -> bool {
        self.activation_sent.is_some() || self.terminal_sent
    }
}

pub struct BatchDecision<'a> {
    pub subject: &'a mut Subject,
    pub approver_email: String,
    pub decision: Decision,
    pub comments: Option<String>,
}

/// Per-subject results of a bulk decision. Callers that persist can carry
/// their own error type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome<E = WorkflowError> {
    pub succeeded: Vec<(SubjectId, ApprovalStep)>,
    pub failed: Vec<(SubjectId, E)>,
    pub cancelled: Vec<SubjectId>,
}

impl<E> Default for BatchOutcome<E> {
    fn default() -> Self {
        Self { succeeded: Vec::new(), failed: Vec::new(), cancelled: Vec::new() }
    }
}

impl<E> BatchOutcome<E> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.cancelled.len()
    }
}

/// Sole mutator of approval chains. Transitions (`apply_*`) and notification
/// dispatch are separate so a caller can persist in between; `assign` and
/// `decide` do both.
pub struct WorkflowEngine {
    resolver: ChainResolver,
    notifier: Arc<dyn NotificationPort>,
    audit: Arc<dyn AuditSink>,
}

impl WorkflowEngine {
    pub fn new(
        resolver: ChainResolver,
        notifier: Arc<dyn NotificationPort>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { resolver, notifier, audit }
    }

    pub fn resolver(&self) -> &ChainResolver {
        &self.resolver
    }

    pub fn resolve_chain(
        &self,
        policy_key: PolicyKey,
        identity: &StartingIdentity,
    ) -> Result<Vec<ResolvedApprover>, WorkflowError> {
        self.resolver.resolve(policy_key, identity)
    }

    pub fn assign(
        &self,
        subject: &mut Subject,
        identity: &StartingIdentity,
        context: &RequestContext,
    ) -> Result<ApprovalChain, WorkflowError> {
        let chain = self.apply_assignment(subject, identity, context)?;
        self.dispatch_notifications(subject, context);
        Ok(chain)
    }

    pub fn decide(
        &self,
        subject: &mut Subject,
        approver_email: &str,
        decision: Decision,
        comments: Option<String>,
        context: &RequestContext,
    ) -> Result<ApprovalStep, WorkflowError> {
        let outcome = self.apply_decision(subject, approver_email, decision, comments, context)?;
        self.dispatch_notifications(subject, context);
        Ok(outcome.decided)
    }

    pub fn apply_assignment(
        &self,
        subject: &mut Subject,
        identity: &StartingIdentity,
        context: &RequestContext,
    ) -> Result<ApprovalChain, WorkflowError> {
        let result = self.build_chain(subject, identity);
        match &result {
            Ok(chain) => {
                info!(
                    event_name = "workflow.chain_assigned",
                    subject_id = %subject.id,
                    correlation_id = %context.correlation_id,
                    policy_key = subject.policy_key.as_str(),
                    cycle = subject.cycle,
                    levels = chain.steps.len(),
                    "approval chain assigned"
                );
                let approvers: Vec<&str> =
                    chain.steps.iter().map(|step| step.approver.email.as_str()).collect();
                self.audit.emit(
                    self.event(subject, context, "workflow.chain_assigned", AuditCategory::Assignment)
                        .with_metadata("policy_key", subject.policy_key.as_str())
                        .with_metadata("identity", identity.to_string())
                        .with_metadata("cycle", subject.cycle.to_string())
                        .with_metadata("approvers", approvers.join(",")),
                );
            }
            Err(error) => {
                warn!(
                    event_name = "workflow.assignment_failed",
                    subject_id = %subject.id,
                    correlation_id = %context.correlation_id,
                    error_class = error.class(),
                    error = %error,
                    "approval chain could not be assigned"
                );
                self.audit.emit(
                    self.failure(subject, context, "workflow.assignment_failed", AuditCategory::Assignment, error)
                        .with_metadata("identity", identity.to_string()),
                );
            }
        }
        result
    }

    fn build_chain(
        &self,
        subject: &mut Subject,
        identity: &StartingIdentity,
    ) -> Result<ApprovalChain, WorkflowError> {
        if subject.approval.is_some() {
            return Err(WorkflowError::AlreadyAssigned { subject_id: subject.id.clone() });
        }

        let approvers: Vec<Person> = self
            .resolver
            .resolve(subject.policy_key, identity)?
            .into_iter()
            .map(|resolved| resolved.person)
            .collect();
        let now = Utc::now();
        let chain = ApprovalChain::assign(subject.policy_key, approvers, now)
            .map_err(|error| WorkflowError::from_chain(&subject.id, error))?;

        subject.approval = Some(chain.clone());
        subject.updated_at = now;
        Ok(chain)
    }

    pub fn apply_decision(
        &self,
        subject: &mut Subject,
        approver_email: &str,
        decision: Decision,
        comments: Option<String>,
        context: &RequestContext,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let now = Utc::now();
        let result = match subject.approval.as_mut() {
            None => Err(WorkflowError::ChainNotFound { subject_id: subject.id.clone() }),
            Some(chain) => chain
                .decide(approver_email, decision, comments, now)
                .map_err(|error| WorkflowError::from_chain(&subject.id, error)),
        };

        match &result {
            Ok(outcome) => {
                subject.updated_at = now;
                info!(
                    event_name = "workflow.step_decided",
                    subject_id = %subject.id,
                    correlation_id = %context.correlation_id,
                    level = outcome.decided.level,
                    decision = decision.as_str(),
                    next_level = outcome.activated.as_ref().map(|step| step.level).unwrap_or(0),
                    "approval step decided"
                );
                let mut event = self
                    .event(subject, context, "workflow.step_decided", AuditCategory::Decision)
                    .with_metadata("approver", outcome.decided.approver.email.clone())
                    .with_metadata("level", outcome.decided.level.to_string())
                    .with_metadata("decision", decision.as_str());
                if let Some(comments) = &outcome.decided.comments {
                    event = event.with_metadata("comments", comments.clone());
                }
                self.audit.emit(event);

                if let Some(status) = outcome.terminal {
                    info!(
                        event_name = "workflow.chain_completed",
                        subject_id = %subject.id,
                        correlation_id = %context.correlation_id,
                        status = status.as_str(),
                        "approval chain finished"
                    );
                    self.audit.emit(
                        self.event(subject, context, "workflow.chain_completed", AuditCategory::Decision)
                            .with_metadata("status", status.as_str()),
                    );
                }
            }
            Err(error) => {
                warn!(
                    event_name = "workflow.decision_rejected",
                    subject_id = %subject.id,
                    correlation_id = %context.correlation_id,
                    approver_email = approver_email.trim(),
                    error_class = error.class(),
                    error = %error,
                    "decision refused"
                );
                self.audit.emit(
                    self.failure(subject, context, "workflow.decision_rejected", AuditCategory::Decision, error)
                        .with_metadata("approver", approver_email.trim())
                        .with_metadata("decision", decision.as_str()),
                );
            }
        }
        result
    }

    /// Sends whatever notification the chain still owes: the activation of
    /// the current step, or the terminal outcome. Each is sent at most once;
    /// failures are logged and left for the next dispatch.
    pub fn dispatch_notifications(
        &self,
        subject: &mut Subject,
        context: &RequestContext,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(chain) = subject.approval.as_ref() else {
            return report;
        };

        if chain.overall_status.is_terminal() {
            if chain.terminal_notified {
                return report;
            }
            match self.notifier.notify_terminal(chain, subject) {
                Ok(()) => {
                    report.terminal_sent = true;
                    if let Some(chain) = subject.approval.as_mut() {
                        chain.terminal_notified = true;
                    }
                    self.audit.emit(
                        self.event(subject, context, "workflow.notification_sent", AuditCategory::Notification)
                            .with_metadata("kind", "terminal"),
                    );
                }
                Err(error) => {
                    self.notification_failed(subject, context, "terminal", &error.to_string());
                    report.failures.push(error.to_string());
                }
            }
            return report;
        }

        let Some(step) = chain.current_step() else {
            return report;
        };
        if step.notified {
            return report;
        }
        let level = step.level;
        match self.notifier.notify_activated(step, subject) {
            Ok(()) => {
                report.activation_sent = Some(level);
                if let Some(step) = subject.approval.as_mut().and_then(ApprovalChain::current_step_mut)
                {
                    step.notified = true;
                }
                self.audit.emit(
                    self.event(subject, context, "workflow.notification_sent", AuditCategory::Notification)
                        .with_metadata("kind", "activated")
                        .with_metadata("level", level.to_string()),
                );
            }
            Err(error) => {
                self.notification_failed(subject, context, "activated", &error.to_string());
                report.failures.push(error.to_string());
            }
        }
        report
    }

    /// Applies each decision independently. A failure never stops the batch;
    /// the cancel flag is only checked between subjects.
    pub fn decide_many<'a, I>(
        &self,
        items: I,
        cancel: &AtomicBool,
        context: &RequestContext,
    ) -> BatchOutcome
    where
        I: IntoIterator<Item = BatchDecision<'a>>,
    {
        let mut outcome = BatchOutcome::default();
        for item in items {
            if cancel.load(Ordering::SeqCst) {
                outcome.cancelled.push(item.subject.id.clone());
                continue;
            }
            let BatchDecision { subject, approver_email, decision, comments } = item;
            match self.decide(subject, &approver_email, decision, comments, context) {
                Ok(step) => outcome.succeeded.push((subject.id.clone(), step)),
                Err(error) => outcome.failed.push((subject.id.clone(), error)),
            }
        }

        info!(
            event_name = "workflow.batch_decided",
            correlation_id = %context.correlation_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            cancelled = outcome.cancelled.len(),
            "batch decision finished"
        );
        outcome
    }

    /// Archives a finished chain so the subject can be assigned again.
    pub fn restart(&self, subject: &mut Subject, context: &RequestContext) -> Result<u32, WorkflowError> {
        let restarted = self.apply_restart(subject, context)?;
        self.record_restart(restarted);
        Ok(subject.cycle)
    }

    /// Transition half of [`restart`](Self::restart). The returned event must
    /// be passed to [`record_restart`](Self::record_restart) once the new
    /// cycle is persisted.
    pub fn apply_restart(
        &self,
        subject: &mut Subject,
        context: &RequestContext,
    ) -> Result<AuditEvent, WorkflowError> {
        let previous = subject.approval_status();
        let cycle = subject.restart_cycle()?;
        Ok(self
            .event(subject, context, "workflow.cycle_restarted", AuditCategory::Assignment)
            .with_metadata("cycle", cycle.to_string())
            .with_metadata("previous_status", previous.as_str()))
    }

    pub fn record_restart(&self, restarted: AuditEvent) {
        info!(
            event_name = "workflow.cycle_restarted",
            subject_id = %restarted.subject_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
            correlation_id = %restarted.correlation_id,
            cycle = restarted.metadata.get("cycle").map(String::as_str).unwrap_or("-"),
            "approval cycle restarted"
        );
        self.audit.emit(restarted);
    }

    pub fn current_approver<'s>(&self, subject: &'s Subject) -> Option<&'s Person> {
        subject.current_approver()
    }

    /// 0 for subjects that were never assigned.
    pub fn progress(&self, subject: &Subject) -> u8 {
        subject.approval.as_ref().map(ApprovalChain::progress).unwrap_or(0)
    }

    pub fn history(&self, subject: &Subject) -> Vec<HistoryEntry> {
        subject.approval.as_ref().map(ApprovalChain::history).unwrap_or_default()
    }

    /// Subjects whose active step belongs to `approver_email`. Later,
    /// not-yet-active levels do not count.
    pub fn pending_for_approver<'s>(
        &self,
        subjects: &'s [Subject],
        approver_email: &str,
    ) -> Vec<&'s Subject> {
        subjects.iter().filter(|subject| subject.is_awaiting(approver_email)).collect()
    }

    fn notification_failed(&self, subject: &Subject, context: &RequestContext, kind: &str, error: &str) {
        warn!(
            event_name = "workflow.notification_failed",
            subject_id = %subject.id,
            correlation_id = %context.correlation_id,
            kind,
            error,
            "notification delivery failed; transition kept"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(subject.id.clone()),
                context.correlation_id.clone(),
                "workflow.notification_failed",
                AuditCategory::Notification,
                context.actor.clone(),
                AuditOutcome::Failed,
            )
            .with_metadata("kind", kind)
            .with_metadata("error", error),
        );
    }

    fn event(
        &self,
        subject: &Subject,
        context: &RequestContext,
        event_type: &str,
        category: AuditCategory,
    ) -> AuditEvent {
        AuditEvent::new(
            Some(subject.id.clone()),
            context.correlation_id.clone(),
            event_type,
            category,
            context.actor.clone(),
            AuditOutcome::Success,
        )
    }

    fn failure(
        &self,
        subject: &Subject,
        context: &RequestContext,
        event_type: &str,
        category: AuditCategory,
        error: &WorkflowError,
    ) -> AuditEvent {
        AuditEvent::new(
            Some(subject.id.clone()),
            context.correlation_id.clone(),
            event_type,
            category,
            context.actor.clone(),
            AuditOutcome::Rejected,
        )
        .with_metadata("error_class", error.class())
        .with_metadata("error", error.to_string())
    }
}
