use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use signoff_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

use crate::commands::config_file_label;

struct Field<'a> {
    key_path: &'static str,
    value: String,
    env_keys: &'a [&'static str],
    overridden: bool,
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let overrides = &options.overrides;

    let fields = [
        Field {
            key_path: "database.url",
            value: config.database.url.clone(),
            env_keys: &["SIGNOFF_DATABASE_URL"],
            overridden: overrides.database_url.is_some(),
        },
        Field {
            key_path: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
            overridden: false,
        },
        Field {
            key_path: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
            overridden: false,
        },
        Field {
            key_path: "directory.path",
            value: config
                .directory
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<bundled sample>".to_string()),
            env_keys: &["SIGNOFF_DIRECTORY_PATH"],
            overridden: overrides.directory_path.is_some(),
        },
        Field {
            key_path: "workflow.notifications_enabled",
            value: config.workflow.notifications_enabled.to_string(),
            env_keys: &["SIGNOFF_WORKFLOW_NOTIFICATIONS_ENABLED"],
            overridden: overrides.notifications_enabled.is_some(),
        },
        Field {
            key_path: "workflow.batch_limit",
            value: config.workflow.batch_limit.to_string(),
            env_keys: &["SIGNOFF_WORKFLOW_BATCH_LIMIT"],
            overridden: false,
        },
        Field {
            key_path: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
            overridden: overrides.log_level.is_some(),
        },
        Field {
            key_path: "logging.format",
            value: config.logging.format.as_str().to_string(),
            env_keys: &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
            overridden: false,
        },
    ];

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(field, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key_path, &field.value, source));
    }
    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field<'_>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if field.overridden {
        return "flag".to_string();
    }

    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key_path) {
            return format!("file ({})", config_file_label(config_file_path));
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_keys_are_found_in_file_document() {
        let doc: toml::Value = "[workflow]\nbatch_limit = 5\n".parse().expect("toml");

        assert!(contains_path(&doc, "workflow.batch_limit"));
        assert!(!contains_path(&doc, "workflow.notifications_enabled"));
        assert!(!contains_path(&doc, "logging.level"));
    }
}
