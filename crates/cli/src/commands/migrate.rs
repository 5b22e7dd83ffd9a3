use signoff_core::config::LoadOptions;
use signoff_db::migrations;

use crate::commands::{block_on, load_config, open_pool, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let result = block_on("migrate", async {
        let pool = open_pool(&config).await?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(applied)
    });

    match result {
        Ok(applied) => CommandResult::success_with_data(
            "migrate",
            format!("applied pending migrations; {} recorded", applied.len()),
            &applied,
        ),
        Err(result) => result,
    }
}
