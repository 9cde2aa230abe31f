use chrono::Utc;
use cohortly_db::{DemoDataset, SeedResult};

use crate::commands::{build_runtime, load_config, open_database, CommandFailure, CommandResult};

pub fn run(seed: Option<u64>) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let dataset = DemoDataset::new(Utc::now()).with_seed(seed.unwrap_or(DemoDataset::DEFAULT_SEED));

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seed_result = dataset
            .load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = dataset
            .verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        pool.close().await;

        if verification.all_present {
            Ok(seed_result)
        } else {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err::<SeedResult, CommandFailure>((
                "seed_verification",
                verification_message(&failed),
                6u8,
            ))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary_message(&seeded)),
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn summary_message(seeded: &SeedResult) -> String {
    let segments = seeded
        .segments
        .iter()
        .map(|segment| format!("  - {}: {} users", segment.segment, segment.users))
        .collect::<Vec<_>>();
    format!(
        "demo dataset loaded: {} users, {} orders, {} order items\n{}",
        seeded.users_seeded,
        seeded.orders_seeded,
        seeded.items_seeded,
        segments.join("\n")
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
