pub mod config;
pub mod doctor;
pub mod migrate;
pub mod resolve;
pub mod seed;
pub mod subjects;
pub mod workflow;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use signoff_core::approvals::{ChainResolver, StartingIdentity};
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::errors::{ApplicationError, InterfaceError};
use signoff_core::workflow::{NoopNotifier, NotificationPort, TracingNotifier};
use signoff_db::{
    connect_with_config, migrations, ApprovalService, DbPool, ServiceError,
    SqlAuditEventRepository, SqlSubjectRepository,
};

/// `(error_class, message, exit_code)` carried out of a failed command body.
pub(crate) type Failure = (&'static str, String, u8);

pub(crate) type SqlApprovalService = ApprovalService<SqlSubjectRepository>;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: &impl Serialize,
    ) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 1);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Failure carrying the request's correlation id so it can be matched
    /// against the structured logs.
    pub(crate) fn traced_failure(command: &str, failure: Failure, correlation_id: &str) -> Self {
        let (error_class, message, exit_code) = failure;
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message,
            correlation_id: Some(correlation_id.to_string()),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str, options: &LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options.clone()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

/// Runs an async command body on a current-thread runtime.
pub(crate) fn block_on<T>(
    command: &str,
    body: impl Future<Output = Result<T, Failure>>,
) -> Result<T, CommandResult> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
        |error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        },
    )?;

    runtime
        .block_on(body)
        .map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })
}

/// Like [`block_on`], but failures carry the request's correlation id.
pub(crate) fn block_on_traced<T>(
    command: &str,
    correlation_id: &str,
    body: impl Future<Output = Result<T, Failure>>,
) -> Result<T, CommandResult> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(
        |error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        },
    )?;

    runtime
        .block_on(body)
        .map_err(|failure| CommandResult::traced_failure(command, failure, correlation_id))
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub(crate) fn load_resolver(config: &AppConfig) -> Result<ChainResolver, Failure> {
    let resolver = match config.directory.path.as_deref() {
        Some(path) => ChainResolver::load(path),
        None => ChainResolver::sample(),
    };
    resolver.map_err(|error| ("directory_load", error.to_string(), 2u8))
}

pub(crate) fn notifier(config: &AppConfig) -> Arc<dyn NotificationPort> {
    if config.workflow.notifications_enabled {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(NoopNotifier)
    }
}

/// Connects, migrates, and wires the service the way every workflow
/// command needs it.
pub(crate) async fn open_service(config: &AppConfig) -> Result<(SqlApprovalService, DbPool), Failure> {
    let resolver = load_resolver(config)?;
    let pool = open_pool(config).await?;
    let service = ApprovalService::new(
        SqlSubjectRepository::new(pool.clone()),
        resolver,
        notifier(config),
    )
    .with_audit_log(Arc::new(SqlAuditEventRepository::new(pool.clone())))
    .with_batch_limit(config.workflow.batch_limit as usize);
    Ok((service, pool))
}

pub(crate) fn service_failure(error: ServiceError, correlation_id: &str) -> Failure {
    let error_class = error.class();
    let interface = ApplicationError::from(error).into_interface(correlation_id);
    let exit_code = match &interface {
        InterfaceError::BadRequest { .. } => 6,
        InterfaceError::Forbidden { .. } => 7,
        InterfaceError::NotFound { .. } => 8,
        InterfaceError::Conflict { .. } => 9,
        InterfaceError::ServiceUnavailable { .. } => 10,
        InterfaceError::Internal { .. } => 11,
    };
    (error_class, format!("{} {interface}", interface.user_message()), exit_code)
}

/// Identity flags shared by `resolve`, `assign`, and `resubmit`.
#[derive(Clone, Debug, Default)]
pub struct IdentityInput {
    pub person: Option<String>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub supplier_type: Option<String>,
}

impl IdentityInput {
    pub fn is_empty(&self) -> bool {
        self.person.is_none() && self.department.is_none() && self.supplier_type.is_none()
    }

    pub(crate) fn to_identity(&self) -> Result<StartingIdentity, Failure> {
        match (&self.person, &self.department, &self.supplier_type) {
            (Some(person), department, None) => Ok(match department {
                Some(department) => StartingIdentity::person_in(person, department),
                None => StartingIdentity::person(person),
            }),
            (None, Some(department), None) => {
                Ok(StartingIdentity::department(department, self.category.clone()))
            }
            (None, None, Some(supplier_type)) => Ok(StartingIdentity::supplier_type(supplier_type)),
            _ => Err((
                "invalid_identity",
                "pass exactly one of --person, --department, or --supplier-type \
                 (--department may accompany --person)"
                    .to_string(),
                6,
            )),
        }
    }
}

pub(crate) fn config_file_label(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string()).unwrap_or_else(|| "config file".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use signoff_core::domain::subject::SubjectId;
    use signoff_core::errors::WorkflowError;
    use signoff_db::ServiceError;

    use super::{service_failure, CommandResult, IdentityInput};

    #[test]
    fn traced_failure_includes_correlation_id() {
        let failure = service_failure(
            ServiceError::Workflow(WorkflowError::SubjectNotFound {
                subject_id: SubjectId("CR-404".to_string()),
            }),
            "req-42",
        );
        assert_eq!(failure.0, "subject_not_found");
        assert_eq!(failure.2, 8);

        let result = CommandResult::traced_failure("status", failure, "req-42");
        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["correlation_id"], "req-42");
        assert_eq!(payload["status"], "error");
        assert!(payload.get("data").is_none());
    }

    #[test]
    fn identity_flags_must_pick_one_kind() {
        let person = IdentityInput {
            person: Some("Ada Obi".into()),
            department: Some("Technical".into()),
            ..IdentityInput::default()
        };
        assert!(person.to_identity().is_ok());

        let conflicting = IdentityInput {
            person: Some("Ada Obi".into()),
            supplier_type: Some("fuel".into()),
            ..IdentityInput::default()
        };
        let error = conflicting.to_identity().expect_err("two kinds");
        assert_eq!(error.0, "invalid_identity");

        assert!(IdentityInput::default().is_empty());
        assert!(IdentityInput::default().to_identity().is_err());
    }
}
