use std::sync::Arc;

use cohortly_core::{ApplicationError, CohortOrchestrator};
use cohortly_db::SqlCohortStore;
use serde_json::Value;

use crate::commands::{build_runtime, load_config, open_database, CommandFailure, CommandResult};

pub fn run(full: bool) -> CommandResult {
    let config = match load_config("stats") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("stats") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let orchestrator =
            CohortOrchestrator::new(Arc::new(SqlCohortStore::sqlite(pool.clone())), &config);

        let report = if full {
            let analytics = orchestrator.analytics().await.map_err(persistence_failure)?;
            (analytics.overview.total_users, serde_json::to_value(&analytics))
        } else {
            let statistics = orchestrator.cohort_statistics().await.map_err(persistence_failure)?;
            (statistics.total_users, serde_json::to_value(&statistics))
        };
        pool.close().await;

        let (total_users, data) = report;
        let data = data.map_err(|error| ("serialization", error.to_string(), 9u8))?;
        Ok::<(usize, Value), CommandFailure>((total_users, data))
    });

    match result {
        Ok((total_users, data)) => CommandResult::success_with_data(
            "stats",
            format!("cohort statistics over {total_users} active users"),
            &data,
        ),
        Err(failure) => CommandResult::from_failure("stats", failure),
    }
}

fn persistence_failure(error: ApplicationError) -> CommandFailure {
    ("persistence", error.to_string(), 7)
}
