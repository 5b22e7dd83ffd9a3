use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use signoff_core::config::LoadOptions;
use signoff_core::domain::approval::{ApprovalStep, Decision};
use signoff_core::domain::subject::SubjectId;
use signoff_core::workflow::RequestContext;
use signoff_db::DecisionRequest;
use tracing::warn;

use crate::commands::{
    block_on_traced, load_config, open_service, service_failure, CommandResult, IdentityInput,
};

#[derive(Debug, Serialize)]
struct AssignedLevel {
    level: u32,
    approver: String,
    email: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct DecidedStep {
    subject_id: String,
    level: u32,
    approver: String,
    status: &'static str,
}

impl DecidedStep {
    fn new(subject_id: &SubjectId, step: &ApprovalStep) -> Self {
        Self {
            subject_id: subject_id.0.clone(),
            level: step.level,
            approver: step.approver.email.clone(),
            status: step.status.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FailedDecision {
    subject_id: String,
    error_class: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    succeeded: Vec<DecidedStep>,
    failed: Vec<FailedDecision>,
    cancelled: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RedeliverySummary {
    activation_sent: Option<u32>,
    terminal_sent: bool,
    failures: Vec<String>,
}

pub fn assign(options: &LoadOptions, subject_id: &str, identity: &IdentityInput) -> CommandResult {
    let config = match load_config("assign", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::system();
    let subject_id = SubjectId(subject_id.to_string());

    let result = block_on_traced("assign", &context.correlation_id, async {
        let identity = identity.to_identity()?;
        let (service, pool) = open_service(&config).await?;
        let chain = service
            .assign(&subject_id, &identity, &context)
            .await
            .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        chain
    });

    match result {
        Ok(chain) => {
            let levels: Vec<AssignedLevel> = chain
                .steps
                .iter()
                .map(|step| AssignedLevel {
                    level: step.level,
                    approver: step.approver.name.clone(),
                    email: step.approver.email.clone(),
                    status: step.status.as_str(),
                })
                .collect();
            let first = levels.first().map(|level| level.email.as_str()).unwrap_or("-");
            CommandResult::success_with_data(
                "assign",
                format!("assigned {} levels to {subject_id}, waiting on {first}", levels.len()),
                &levels,
            )
        }
        Err(result) => result,
    }
}

pub fn decide(
    options: &LoadOptions,
    subject_id: &str,
    approver_email: &str,
    decision: Decision,
    comments: Option<String>,
) -> CommandResult {
    let config = match load_config("decide", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::new(
        RequestContext::system().correlation_id,
        approver_email.trim().to_string(),
    );
    let subject_id = SubjectId(subject_id.to_string());

    let result = block_on_traced("decide", &context.correlation_id, async {
        let (service, pool) = open_service(&config).await?;
        let step = service
            .decide(&subject_id, approver_email, decision, comments, &context)
            .await
            .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        step
    });

    match result {
        Ok(step) => CommandResult::success_with_data(
            "decide",
            format!("level {} of {subject_id} {}", step.level, step.status.as_str()),
            &DecidedStep::new(&subject_id, &step),
        ),
        Err(result) => result,
    }
}

/// Applies one decision to many subjects. Individual failures are reported
/// in the payload; the command only fails when the batch itself is refused.
/// Ctrl-C stops the batch after the subject in flight.
pub fn decide_many(
    options: &LoadOptions,
    subject_ids: &[String],
    approver_email: &str,
    decision: Decision,
    comments: Option<String>,
) -> CommandResult {
    let config = match load_config("decide-many", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::new(
        RequestContext::system().correlation_id,
        approver_email.trim().to_string(),
    );
    let requests: Vec<DecisionRequest> = subject_ids
        .iter()
        .map(|subject_id| DecisionRequest {
            subject_id: SubjectId(subject_id.clone()),
            approver_email: approver_email.to_string(),
            decision,
            comments: comments.clone(),
        })
        .collect();

    let result = block_on_traced("decide-many", &context.correlation_id, async {
        let (service, pool) = open_service(&config).await?;
        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = {
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(event_name = "cli.batch_cancel_requested", "stopping batch after current subject");
                    cancel.store(true, Ordering::SeqCst);
                }
            })
        };
        let outcome = service
            .decide_many(requests, &cancel, &context)
            .await
            .map_err(|error| service_failure(error, &context.correlation_id));
        watcher.abort();
        pool.close().await;
        outcome
    });

    match result {
        Ok(outcome) => {
            let summary = BatchSummary {
                succeeded: outcome
                    .succeeded
                    .iter()
                    .map(|(subject_id, step)| DecidedStep::new(subject_id, step))
                    .collect(),
                failed: outcome
                    .failed
                    .into_iter()
                    .map(|(subject_id, error)| FailedDecision {
                        subject_id: subject_id.0,
                        error_class: error.class(),
                        message: error.to_string(),
                    })
                    .collect(),
                cancelled: outcome.cancelled.into_iter().map(|subject_id| subject_id.0).collect(),
            };
            CommandResult::success_with_data(
                "decide-many",
                format!(
                    "{} decided, {} failed, {} cancelled",
                    summary.succeeded.len(),
                    summary.failed.len(),
                    summary.cancelled.len()
                ),
                &summary,
            )
        }
        Err(result) => result,
    }
}

pub fn resubmit(
    options: &LoadOptions,
    subject_id: &str,
    identity: &IdentityInput,
) -> CommandResult {
    let config = match load_config("resubmit", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::system();
    let subject_id = SubjectId(subject_id.to_string());

    let result = block_on_traced("resubmit", &context.correlation_id, async {
        let identity = if identity.is_empty() { None } else { Some(identity.to_identity()?) };
        let (service, pool) = open_service(&config).await?;
        let subject = service
            .resubmit(&subject_id, identity.as_ref(), &context)
            .await
            .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        subject
    });

    match result {
        Ok(subject) => CommandResult::success_with_data(
            "resubmit",
            format!(
                "{} restarted as cycle {} ({})",
                subject.id,
                subject.cycle,
                subject.approval_status().as_str()
            ),
            &subject,
        ),
        Err(result) => result,
    }
}

pub fn notify(options: &LoadOptions, subject_id: &str) -> CommandResult {
    let config = match load_config("notify", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::system();
    let subject_id = SubjectId(subject_id.to_string());

    let result = block_on_traced("notify", &context.correlation_id, async {
        let (service, pool) = open_service(&config).await?;
        let report = service
            .redeliver_notifications(&subject_id, &context)
            .await
            .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => {
            let message = if report.changed() {
                format!("redelivered outstanding notifications for {subject_id}")
            } else if report.failures.is_empty() {
                format!("nothing outstanding for {subject_id}")
            } else {
                format!("{} notifications still failing for {subject_id}", report.failures.len())
            };
            CommandResult::success_with_data(
                "notify",
                message,
                &RedeliverySummary {
                    activation_sent: report.activation_sent,
                    terminal_sent: report.terminal_sent,
                    failures: report.failures,
                },
            )
        }
        Err(result) => result,
    }
}
