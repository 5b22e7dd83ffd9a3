use serde::Serialize;
use signoff_core::audit::AuditEvent;
use signoff_core::config::LoadOptions;
use signoff_core::domain::approval::HistoryEntry;
use signoff_core::domain::person::Person;
use signoff_core::domain::subject::{PolicyKey, Subject, SubjectId};
use signoff_core::workflow::RequestContext;

use signoff_db::ServiceError;

use crate::commands::{block_on_traced, load_config, open_service, service_failure, CommandResult};

#[derive(Debug, Serialize)]
struct SubjectRow {
    id: String,
    policy_key: &'static str,
    title: String,
    status: &'static str,
    current_level: u32,
    current_approver: Option<String>,
    cycle: u32,
}

impl From<&Subject> for SubjectRow {
    fn from(subject: &Subject) -> Self {
        Self {
            id: subject.id.0.clone(),
            policy_key: subject.policy_key.as_str(),
            title: subject.title.clone(),
            status: subject.approval_status().as_str(),
            current_level: subject.current_approval_level(),
            current_approver: subject.current_approver().map(|person| person.email.clone()),
            cycle: subject.cycle,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubjectStatus {
    subject: Subject,
    current_approver: Option<Person>,
    progress: u8,
    history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    audit: Vec<AuditEvent>,
}

pub fn create(
    options: &LoadOptions,
    policy_key: PolicyKey,
    title: &str,
    initiator: &str,
    id: Option<String>,
) -> CommandResult {
    let config = match load_config("create", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::system();
    let subject_id = id.map(SubjectId).unwrap_or_else(|| SubjectId::generate(policy_key));

    let result = block_on_traced("create", &context.correlation_id, async {
        let (service, pool) = open_service(&config).await?;
        let subject = Subject::new(subject_id, policy_key, title, initiator);
        let created = service
            .create_subject(subject, &context)
            .await
            .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        created
    });

    match result {
        Ok(subject) => CommandResult::success_with_data(
            "create",
            format!("created {} `{}`", subject.id, subject.title),
            &SubjectRow::from(&subject),
        ),
        Err(result) => result,
    }
}

pub fn status(options: &LoadOptions, subject_id: &str, with_audit: bool) -> CommandResult {
    let config = match load_config("status", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::system();
    let subject_id = SubjectId(subject_id.to_string());

    let result = block_on_traced("status", &context.correlation_id, async {
        let (service, pool) = open_service(&config).await?;
        let status = async {
            let subject = service.get(&subject_id).await?;
            let audit =
                if with_audit { service.audit_trail(&subject_id).await? } else { Vec::new() };
            let engine = service.engine();
            Ok::<_, ServiceError>(SubjectStatus {
                current_approver: engine.current_approver(&subject).cloned(),
                progress: engine.progress(&subject),
                history: engine.history(&subject),
                subject,
                audit,
            })
        }
        .await
        .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        status
    });

    match result {
        Ok(status) => {
            let approver = status
                .current_approver
                .as_ref()
                .map(|person| format!(", waiting on {}", person.email))
                .unwrap_or_default();
            CommandResult::success_with_data(
                "status",
                format!(
                    "{} is {} ({}% approved{approver})",
                    status.subject.id,
                    status.subject.approval_status().as_str(),
                    status.progress
                ),
                &status,
            )
        }
        Err(result) => result,
    }
}

pub fn pending(options: &LoadOptions, approver_email: &str) -> CommandResult {
    list_rows("pending", options, Some(approver_email))
}

pub fn list(options: &LoadOptions) -> CommandResult {
    list_rows("list", options, None)
}

fn list_rows(command: &str, options: &LoadOptions, approver_email: Option<&str>) -> CommandResult {
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::system();

    let result = block_on_traced(command, &context.correlation_id, async {
        let (service, pool) = open_service(&config).await?;
        let subjects = match approver_email {
            Some(email) => service.get_pending_for_approver(email).await,
            None => service.list_all().await,
        }
        .map_err(|error| service_failure(error, &context.correlation_id));
        pool.close().await;
        subjects
    });

    match result {
        Ok(subjects) => {
            let rows: Vec<SubjectRow> = subjects.iter().map(SubjectRow::from).collect();
            let message = match approver_email {
                Some(email) => format!("{} subjects waiting on {}", rows.len(), email.trim()),
                None => format!("{} subjects", rows.len()),
            };
            CommandResult::success_with_data(command, message, &rows)
        }
        Err(result) => result,
    }
}
