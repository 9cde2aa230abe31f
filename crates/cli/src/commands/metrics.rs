use std::sync::Arc;

use cohortly_core::{ApplicationError, CohortOrchestrator, UserId, UserMetrics};
use cohortly_db::SqlCohortStore;

use crate::commands::{build_runtime, load_config, open_database, CommandFailure, CommandResult};

pub fn run(user_id: &str) -> CommandResult {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return CommandResult::failure("metrics", "bad_request", "user id must not be empty", 2);
    }

    let config = match load_config("metrics") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("metrics") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let id = UserId(user_id.to_string());
    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let orchestrator =
            CohortOrchestrator::new(Arc::new(SqlCohortStore::sqlite(pool.clone())), &config);

        let metrics = orchestrator.compute_metrics(&id).await.map_err(|error| match error {
            ApplicationError::NotFound(_) => ("not_found", error.to_string(), 8u8),
            ApplicationError::Domain(_) => ("invalid_order_data", error.to_string(), 7u8),
            _ => ("persistence", error.to_string(), 7u8),
        })?;
        pool.close().await;
        Ok::<UserMetrics, CommandFailure>(metrics)
    });

    match result {
        Ok(metrics) => CommandResult::success_with_data(
            "metrics",
            format!("metrics derived for user {id}"),
            &metrics,
        ),
        Err(failure) => CommandResult::from_failure("metrics", failure),
    }
}
