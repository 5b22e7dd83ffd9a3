use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::{connect_with_config, migrations};

use crate::commands::load_resolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: &LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_directory(&config));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["org_directory", "database_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_directory(config: &AppConfig) -> DoctorCheck {
    match load_resolver(config) {
        Ok(resolver) => {
            let source = config
                .directory
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "bundled sample".to_string());
            DoctorCheck {
                name: "org_directory",
                status: CheckStatus::Pass,
                details: format!(
                    "{} departments, {} invoice routes, {} onboarding routes from {source}",
                    resolver.directory().list_departments().len(),
                    resolver.policies().invoice_routes().len(),
                    resolver.policies().onboarding_routes().len(),
                ),
            }
        }
        Err((_, message, _)) => {
            DoctorCheck { name: "org_directory", status: CheckStatus::Fail, details: message }
        }
    }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| format!("failed to read migration history: {error}"))?;
        pool.close().await;
        Ok::<usize, String>(applied.len())
    });

    match result {
        Ok(applied) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!(
                "connected using `{}` ({applied} of {} migrations applied)",
                config.database.url,
                migrations::MIGRATOR.iter().filter(|m| m.migration_type.is_up_migration()).count()
            ),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
