use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use signoff_core::approvals::{ChainResolver, ResolvedApprover, StartingIdentity};
use signoff_core::audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
use signoff_core::domain::approval::{ApprovalChain, ApprovalStep, Decision, HistoryEntry};
use signoff_core::domain::person::Person;
use signoff_core::domain::subject::{PolicyKey, Subject, SubjectId};
use signoff_core::errors::{ApplicationError, WorkflowError};
use signoff_core::workflow::{
    BatchOutcome, DispatchReport, NotificationPort, RequestContext, WorkflowEngine,
};

use crate::repositories::{AuditEventRepository, RepositoryError, SubjectRepository};

pub const DEFAULT_BATCH_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Repository(RepositoryError),
    #[error("batch of {requested} decisions exceeds the limit of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },
}

impl From<RepositoryError> for ServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { subject_id, expected_version } => {
                Self::Workflow(WorkflowError::Conflict { subject_id, expected_version })
            }
            RepositoryError::NotFound(subject_id) => {
                Self::Workflow(WorkflowError::SubjectNotFound { subject_id })
            }
            other => Self::Repository(other),
        }
    }
}

impl ServiceError {
    pub fn class(&self) -> &'static str {
        match self {
            Self::Workflow(error) => error.class(),
            Self::Repository(RepositoryError::Duplicate(_)) => "duplicate",
            Self::Repository(_) => "persistence",
            Self::BatchTooLarge { .. } => "batch_too_large",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Workflow(error) => error.is_retryable(),
            Self::Repository(RepositoryError::Database(_)) => true,
            _ => false,
        }
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Workflow(error) => Self::Workflow(error),
            ServiceError::Repository(error @ RepositoryError::Duplicate(_)) => {
                Self::InvalidInput(error.to_string())
            }
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
            error @ ServiceError::BatchTooLarge { .. } => Self::InvalidInput(error.to_string()),
        }
    }
}

/// One entry of a bulk decision, addressed by subject id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionRequest {
    pub subject_id: SubjectId,
    pub approver_email: String,
    pub decision: Decision,
    pub comments: Option<String>,
}

/// Async facade over the engine and a subject repository, addressed by id.
///
/// Every mutation loads the subject, applies the transition, saves it with
/// the version it was loaded at, and only then dispatches notifications. The
/// notified flags are saved afterwards on a best-effort basis; a lost save
/// there means a notification may be sent again, never skipped.
pub struct ApprovalService<R> {
    repository: R,
    engine: WorkflowEngine,
    audit_buffer: InMemoryAuditSink,
    audit_log: Option<Arc<dyn AuditEventRepository>>,
    batch_limit: usize,
}

impl<R: SubjectRepository> ApprovalService<R> {
    pub fn new(repository: R, resolver: ChainResolver, notifier: Arc<dyn NotificationPort>) -> Self {
        let audit_buffer = InMemoryAuditSink::default();
        let engine = WorkflowEngine::new(resolver, notifier, Arc::new(audit_buffer.clone()));
        Self {
            repository,
            engine,
            audit_buffer,
            audit_log: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_audit_log(mut self, audit_log: Arc<dyn AuditEventRepository>) -> Self {
        self.audit_log = Some(audit_log);
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub async fn create_subject(
        &self,
        subject: Subject,
        context: &RequestContext,
    ) -> Result<Subject, ServiceError> {
        let result = self.repository.insert(&subject).await.map_err(ServiceError::from);
        if result.is_ok() {
            info!(
                event_name = "service.subject_created",
                subject_id = %subject.id,
                correlation_id = %context.correlation_id,
                policy_key = subject.policy_key.as_str(),
                "subject created"
            );
            self.audit_buffer.emit(
                AuditEvent::new(
                    Some(subject.id.clone()),
                    context.correlation_id.clone(),
                    "workflow.subject_created",
                    AuditCategory::System,
                    context.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("policy_key", subject.policy_key.as_str())
                .with_metadata("initiator", subject.initiator.clone()),
            );
        }
        self.finish(result.map(|()| subject)).await
    }

    pub async fn get(&self, subject_id: &SubjectId) -> Result<Subject, ServiceError> {
        self.repository
            .find_by_id(subject_id)
            .await?
            .ok_or_else(|| WorkflowError::SubjectNotFound { subject_id: subject_id.clone() }.into())
    }

    pub async fn list_all(&self) -> Result<Vec<Subject>, ServiceError> {
        Ok(self.repository.list_all().await?)
    }

    pub fn resolve_chain(
        &self,
        policy_key: PolicyKey,
        identity: &StartingIdentity,
    ) -> Result<Vec<ResolvedApprover>, ServiceError> {
        Ok(self.engine.resolve_chain(policy_key, identity)?)
    }

    pub async fn assign(
        &self,
        subject_id: &SubjectId,
        identity: &StartingIdentity,
        context: &RequestContext,
    ) -> Result<ApprovalChain, ServiceError> {
        let result = self.assign_inner(subject_id, identity, context).await;
        self.finish(result).await
    }

    async fn assign_inner(
        &self,
        subject_id: &SubjectId,
        identity: &StartingIdentity,
        context: &RequestContext,
    ) -> Result<ApprovalChain, ServiceError> {
        let mut subject = self.get(subject_id).await?;
        let loaded_version = subject.version;
        let chain = self.engine.apply_assignment(&mut subject, identity, context)?;
        self.save(&mut subject, loaded_version, context).await?;
        self.dispatch_and_save(&mut subject, context).await;
        Ok(chain)
    }

    pub async fn decide(
        &self,
        subject_id: &SubjectId,
        approver_email: &str,
        decision: Decision,
        comments: Option<String>,
        context: &RequestContext,
    ) -> Result<ApprovalStep, ServiceError> {
        let result = self.decide_inner(subject_id, approver_email, decision, comments, context).await;
        self.finish(result).await
    }

    async fn decide_inner(
        &self,
        subject_id: &SubjectId,
        approver_email: &str,
        decision: Decision,
        comments: Option<String>,
        context: &RequestContext,
    ) -> Result<ApprovalStep, ServiceError> {
        let mut subject = self.get(subject_id).await?;
        let loaded_version = subject.version;
        let outcome =
            self.engine.apply_decision(&mut subject, approver_email, decision, comments, context)?;
        self.save(&mut subject, loaded_version, context).await?;
        self.dispatch_and_save(&mut subject, context).await;
        Ok(outcome.decided)
    }

    pub async fn current_approver(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<Person>, ServiceError> {
        let subject = self.get(subject_id).await?;
        Ok(self.engine.current_approver(&subject).cloned())
    }

    pub async fn progress(&self, subject_id: &SubjectId) -> Result<u8, ServiceError> {
        let subject = self.get(subject_id).await?;
        Ok(self.engine.progress(&subject))
    }

    pub async fn history(&self, subject_id: &SubjectId) -> Result<Vec<HistoryEntry>, ServiceError> {
        let subject = self.get(subject_id).await?;
        Ok(self.engine.history(&subject))
    }

    pub async fn get_pending_for_approver(
        &self,
        approver_email: &str,
    ) -> Result<Vec<Subject>, ServiceError> {
        let subjects = self.repository.list_pending_for_approver(approver_email).await?;
        Ok(subjects.into_iter().filter(|subject| subject.is_awaiting(approver_email)).collect())
    }

    /// Decides each request on its own; one failure does not stop the rest.
    /// The cancel flag is only read between subjects.
    pub async fn decide_many(
        &self,
        requests: Vec<DecisionRequest>,
        cancel: &AtomicBool,
        context: &RequestContext,
    ) -> Result<BatchOutcome<ServiceError>, ServiceError> {
        if requests.len() > self.batch_limit {
            return Err(ServiceError::BatchTooLarge {
                requested: requests.len(),
                limit: self.batch_limit,
            });
        }

        let mut outcome = BatchOutcome::default();
        for request in requests {
            if cancel.load(Ordering::SeqCst) {
                outcome.cancelled.push(request.subject_id);
                continue;
            }
            let DecisionRequest { subject_id, approver_email, decision, comments } = request;
            match self.decide(&subject_id, &approver_email, decision, comments, context).await {
                Ok(step) => outcome.succeeded.push((subject_id, step)),
                Err(error) => outcome.failed.push((subject_id, error)),
            }
        }

        info!(
            event_name = "service.batch_decided",
            correlation_id = %context.correlation_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            cancelled = outcome.cancelled.len(),
            "batch decision finished"
        );
        Ok(outcome)
    }

    /// Starts a new approval cycle for a finished subject and, when an
    /// identity is given, assigns the new chain in the same save.
    pub async fn resubmit(
        &self,
        subject_id: &SubjectId,
        identity: Option<&StartingIdentity>,
        context: &RequestContext,
    ) -> Result<Subject, ServiceError> {
        let result = self.resubmit_inner(subject_id, identity, context).await;
        self.finish(result).await
    }

    async fn resubmit_inner(
        &self,
        subject_id: &SubjectId,
        identity: Option<&StartingIdentity>,
        context: &RequestContext,
    ) -> Result<Subject, ServiceError> {
        let mut subject = self.get(subject_id).await?;
        let loaded_version = subject.version;
        let restarted = self.engine.apply_restart(&mut subject, context)?;
        if let Some(identity) = identity {
            self.engine.apply_assignment(&mut subject, identity, context)?;
        }
        self.save(&mut subject, loaded_version, context).await?;
        self.engine.record_restart(restarted);
        self.dispatch_and_save(&mut subject, context).await;
        Ok(subject)
    }

    /// Sends any notification a subject still owes, e.g. after a delivery
    /// failure on an earlier call.
    pub async fn redeliver_notifications(
        &self,
        subject_id: &SubjectId,
        context: &RequestContext,
    ) -> Result<DispatchReport, ServiceError> {
        let result = match self.get(subject_id).await {
            Ok(mut subject) => Ok(self.dispatch_and_save(&mut subject, context).await),
            Err(error) => Err(error),
        };
        self.finish(result).await
    }

    /// Persisted audit events for a subject; empty without an audit log.
    pub async fn audit_trail(&self, subject_id: &SubjectId) -> Result<Vec<AuditEvent>, ServiceError> {
        match &self.audit_log {
            Some(audit_log) => Ok(audit_log.list_for_subject(subject_id).await?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(
        &self,
        subject: &mut Subject,
        expected_version: u64,
        context: &RequestContext,
    ) -> Result<(), ServiceError> {
        match self.repository.update(subject, expected_version).await {
            Ok(version) => {
                subject.version = version;
                Ok(())
            }
            Err(error) => {
                let error = ServiceError::from(error);
                warn!(
                    event_name = "service.save_failed",
                    subject_id = %subject.id,
                    correlation_id = %context.correlation_id,
                    expected_version,
                    error_class = error.class(),
                    error = %error,
                    "subject was not saved"
                );
                self.audit_buffer.emit(
                    AuditEvent::new(
                        Some(subject.id.clone()),
                        context.correlation_id.clone(),
                        "workflow.save_failed",
                        AuditCategory::Persistence,
                        context.actor.clone(),
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error_class", error.class())
                    .with_metadata("expected_version", expected_version.to_string()),
                );
                Err(error)
            }
        }
    }

    async fn dispatch_and_save(
        &self,
        subject: &mut Subject,
        context: &RequestContext,
    ) -> DispatchReport {
        let report = self.engine.dispatch_notifications(subject, context);
        if report.changed() {
            let version = subject.version;
            if self.save(subject, version, context).await.is_err() {
                warn!(
                    event_name = "service.notified_flag_lost",
                    subject_id = %subject.id,
                    correlation_id = %context.correlation_id,
                    "notification sent but its flag was not saved; it may be sent again"
                );
            }
        }
        report
    }

    async fn finish<T>(&self, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
        let events = self.audit_buffer.drain();
        if let Some(audit_log) = &self.audit_log {
            if let Err(error) = audit_log.append(&events).await {
                warn!(
                    event_name = "service.audit_append_failed",
                    dropped = events.len(),
                    error = %error,
                    "audit events could not be persisted"
                );
            }
        }
        result
    }
}
