use serde::Serialize;
use signoff_core::config::LoadOptions;
use signoff_core::workflow::RequestContext;
use signoff_db::DemoSeed;

use crate::commands::{block_on, load_config, open_service, service_failure, CommandResult};

#[derive(Debug, Serialize)]
struct SeedSummary {
    subject_id: String,
    description: &'static str,
    created: bool,
}

pub fn run(options: &LoadOptions, clean: bool) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let context = RequestContext::new(format!("seed-{}", std::process::id()), "signoff-cli");

    if clean {
        let result = block_on("seed", async {
            let (service, pool) = open_service(&config).await?;
            let removed = DemoSeed::clean(&service)
                .await
                .map_err(|error| service_failure(error, &context.correlation_id))?;
            pool.close().await;
            Ok(removed)
        });
        return match result {
            Ok(removed) => CommandResult::success("seed", format!("removed {removed} demo subjects")),
            Err(result) => result,
        };
    }

    let result = block_on("seed", async {
        let (service, pool) = open_service(&config).await?;
        let seeded = DemoSeed::load(&service, &context)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoSeed::verify(&service)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if !verification.all_passed() {
            let failed = verification
                .checks
                .iter()
                .filter(|check| !check.passed)
                .map(|check| format!("{} ({})", check.subject_id, check.detail))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed), 6u8));
        }
        Ok(seeded)
    });

    match result {
        Ok(seeded) => {
            let summary: Vec<SeedSummary> = seeded
                .subjects
                .iter()
                .map(|subject| SeedSummary {
                    subject_id: subject.subject_id.0.clone(),
                    description: subject.description,
                    created: subject.created,
                })
                .collect();
            let lines: Vec<String> = summary
                .iter()
                .map(|subject| format!("  - {}: {}", subject.subject_id, subject.description))
                .collect();
            CommandResult::success_with_data(
                "seed",
                format!("demo subjects ready:\n{}", lines.join("\n")),
                &summary,
            )
        }
        Err(result) => result,
    }
}

fn verification_message(failed: &[String]) -> String {
    if failed.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_subjects() {
        let failed = vec![
            "CR-DEMO-001 (status=approved approver=-)".to_string(),
            "SUP-DEMO-001 (missing)".to_string(),
        ];

        assert_eq!(
            verification_message(&failed),
            "Seed verification failed for: CR-DEMO-001 (status=approved approver=-), SUP-DEMO-001 (missing)"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_nothing_failed() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }
}
