use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use signoff_cli::commands::{migrate, resolve, seed, subjects, workflow, IdentityInput};
use signoff_core::config::LoadOptions;
use signoff_core::domain::approval::Decision;
use signoff_core::domain::subject::PolicyKey;

const CHIOMA: &str = "chioma.nwosu@signoff.example";
const SAM: &str = "sam.eze@signoff.example";

#[test]
fn migrate_returns_success_with_memory_database() {
    with_env(&[("SIGNOFF_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"], serde_json::json!([1, 2]));
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_batch_limit() {
    with_env(
        &[("SIGNOFF_DATABASE_URL", "sqlite::memory:"), ("SIGNOFF_WORKFLOW_BATCH_LIMIT", "0")],
        || {
            let result = migrate::run(&LoadOptions::default());
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn resolve_prints_supervisor_chain_without_database() {
    with_env(&[("SIGNOFF_DATABASE_URL", "sqlite::memory:")], || {
        let identity =
            IdentityInput { person: Some("Ada Obi".to_string()), ..IdentityInput::default() };
        let result = resolve::run(&LoadOptions::default(), PolicyKey::CashRequest, &identity);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        let levels = payload["data"].as_array().expect("levels array");
        let emails: Vec<&str> =
            levels.iter().filter_map(|level| level["email"].as_str()).collect();
        assert_eq!(emails.first().copied(), Some(SAM));
        assert_eq!(emails.get(1).copied(), Some(CHIOMA));
        assert_eq!(emails.last().copied(), Some("grace.mensah@signoff.example"));
    });
}

#[test]
fn resolve_rejects_conflicting_identity_flags() {
    with_env(&[], || {
        let identity = IdentityInput {
            person: Some("Ada Obi".to_string()),
            supplier_type: Some("fuel".to_string()),
            ..IdentityInput::default()
        };
        let result = resolve::run(&LoadOptions::default(), PolicyKey::CashRequest, &identity);
        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_identity");
    });
}

#[test]
fn seed_is_idempotent_against_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("seed.db"));

    with_env(&[("SIGNOFF_DATABASE_URL", &url)], || {
        let options = LoadOptions::default();

        let first = seed::run(&options, false);
        assert_eq!(first.exit_code, 0, "first seed: {}", first.output);
        let rows = parse_payload(&first.output)["data"].as_array().expect("rows").clone();
        assert!(rows.iter().all(|row| row["created"] == true));

        let second = seed::run(&options, false);
        assert_eq!(second.exit_code, 0, "second seed: {}", second.output);
        let rows = parse_payload(&second.output)["data"].as_array().expect("rows").clone();
        assert!(rows.iter().all(|row| row["created"] == false));

        let pending = subjects::pending(&options, CHIOMA);
        let payload = parse_payload(&pending.output);
        let ids: Vec<&str> = payload["data"]
            .as_array()
            .expect("pending rows")
            .iter()
            .filter_map(|row| row["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["CR-DEMO-001"]);

        let cleaned = seed::run(&options, true);
        assert_eq!(cleaned.exit_code, 0);
        let listed = parse_payload(&subjects::list(&options).output);
        assert_eq!(listed["data"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn subject_flows_from_create_through_first_decision() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("flow.db"));

    with_env(&[("SIGNOFF_DATABASE_URL", &url)], || {
        let options = LoadOptions::default();

        let created = subjects::create(
            &options,
            PolicyKey::CashRequest,
            "Site fuel",
            "Ada Obi",
            Some("CR-FLOW-1".to_string()),
        );
        assert_eq!(created.exit_code, 0, "{}", created.output);
        assert_eq!(parse_payload(&created.output)["data"]["status"], "pending_assignment");

        let identity =
            IdentityInput { person: Some("Ada Obi".to_string()), ..IdentityInput::default() };
        let assigned = workflow::assign(&options, "CR-FLOW-1", &identity);
        assert_eq!(assigned.exit_code, 0, "{}", assigned.output);

        let wrong = workflow::decide(&options, "CR-FLOW-1", CHIOMA, Decision::Approved, None);
        assert_eq!(wrong.exit_code, 7, "{}", wrong.output);
        let payload = parse_payload(&wrong.output);
        assert_eq!(payload["error_class"], "not_current_approver");
        assert!(payload["correlation_id"].is_string());

        let decided = workflow::decide(
            &options,
            "CR-FLOW-1",
            SAM,
            Decision::Approved,
            Some("ok".to_string()),
        );
        assert_eq!(decided.exit_code, 0, "{}", decided.output);
        assert_eq!(parse_payload(&decided.output)["data"]["status"], "approved");

        let status = subjects::status(&options, "CR-FLOW-1", true);
        assert_eq!(status.exit_code, 0, "{}", status.output);
        let payload = parse_payload(&status.output);
        assert_eq!(payload["data"]["current_approver"]["email"], CHIOMA);
        assert_eq!(payload["data"]["history"].as_array().map(Vec::len), Some(1));
        assert!(payload["data"]["audit"].as_array().is_some_and(|events| !events.is_empty()));

        let missing = subjects::status(&options, "CR-NOPE", false);
        assert_eq!(missing.exit_code, 8);
    });
}

#[test]
fn decide_many_reports_per_subject_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir.path().join("batch.db"));

    with_env(&[("SIGNOFF_DATABASE_URL", &url)], || {
        let options = LoadOptions::default();
        assert_eq!(seed::run(&options, false).exit_code, 0);

        let ids = vec!["CR-DEMO-001".to_string(), "INV-DEMO-001".to_string()];
        let result = workflow::decide_many(&options, &ids, CHIOMA, Decision::Approved, None);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["succeeded"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["data"]["failed"][0]["subject_id"], "INV-DEMO-001");
        assert_eq!(payload["data"]["failed"][0]["error_class"], "not_current_approver");
    });
}

fn file_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|error| {
        panic!("expected JSON output, got parse error {error} for output: {output}")
    })
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SIGNOFF_DATABASE_URL",
        "SIGNOFF_DATABASE_MAX_CONNECTIONS",
        "SIGNOFF_DATABASE_TIMEOUT_SECS",
        "SIGNOFF_DIRECTORY_PATH",
        "SIGNOFF_WORKFLOW_NOTIFICATIONS_ENABLED",
        "SIGNOFF_WORKFLOW_BATCH_LIMIT",
        "SIGNOFF_LOGGING_LEVEL",
        "SIGNOFF_LOGGING_FORMAT",
        "SIGNOFF_LOG_LEVEL",
        "SIGNOFF_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
