use std::sync::Arc;

use cohortly_core::{ApplicationError, BatchSummary, CohortOrchestrator};
use cohortly_db::SqlCohortStore;

use crate::commands::{build_runtime, load_config, open_database, CommandFailure, CommandResult};

pub fn run(use_kmeans: bool) -> CommandResult {
    let config = match load_config("generate") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("generate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let orchestrator =
            CohortOrchestrator::new(Arc::new(SqlCohortStore::sqlite(pool.clone())), &config);

        let summary = orchestrator.run_batch(use_kmeans).await.map_err(batch_failure)?;
        pool.close().await;
        Ok::<BatchSummary, CommandFailure>(summary)
    });

    match result {
        Ok(summary) => {
            CommandResult::success_with_data("generate", summary_message(&summary), &summary)
        }
        Err(failure) => CommandResult::from_failure("generate", failure),
    }
}

fn batch_failure(error: ApplicationError) -> CommandFailure {
    let error_class = match error {
        ApplicationError::BatchInProgress => "batch_in_progress",
        ApplicationError::Persistence(_) => "persistence",
        _ => "cohort_batch",
    };
    (error_class, error.to_string(), 7)
}

fn summary_message(summary: &BatchSummary) -> String {
    let mut message = format!(
        "cohorts generated for {}/{} users ({} errors)",
        summary.updated_users,
        summary.total_users,
        summary.errors.len()
    );
    if let Some(reason) = &summary.clustering_unavailable {
        message.push_str(&format!("; clustering unavailable: {reason}"));
    } else if let Some(clusters) = &summary.clustering_results {
        message.push_str(&format!("; {} clusters", clusters.len()));
    }
    message
}
