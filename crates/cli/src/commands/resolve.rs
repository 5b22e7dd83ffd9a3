use serde::Serialize;
use signoff_core::config::LoadOptions;
use signoff_core::domain::subject::PolicyKey;

use crate::commands::{load_config, load_resolver, CommandResult, IdentityInput};

#[derive(Debug, Serialize)]
struct ResolvedLevel {
    level: u32,
    name: String,
    email: String,
    role: String,
    department: String,
}

/// Prints the chain a policy would build without touching the database.
pub fn run(options: &LoadOptions, policy_key: PolicyKey, identity: &IdentityInput) -> CommandResult {
    let config = match load_config("resolve", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let resolved = load_resolver(&config).and_then(|resolver| {
        let identity = identity.to_identity()?;
        resolver
            .resolve(policy_key, &identity)
            .map_err(|error| (error.class(), error.to_string(), 6u8))
    });

    match resolved {
        Ok(approvers) => {
            let levels: Vec<ResolvedLevel> = approvers
                .into_iter()
                .map(|approver| ResolvedLevel {
                    level: approver.level,
                    name: approver.person.name,
                    email: approver.person.email,
                    role: approver.person.role,
                    department: approver.person.department,
                })
                .collect();
            let summary = levels
                .iter()
                .map(|level| format!("{}. {} ({})", level.level, level.name, level.role))
                .collect::<Vec<_>>()
                .join(" -> ");
            CommandResult::success_with_data("resolve", summary, &levels)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("resolve", error_class, message, exit_code)
        }
    }
}
