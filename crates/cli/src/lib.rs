pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use cohortly_core::config::{AppConfig, LoadOptions};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cohortly",
    about = "Cohortly operator CLI",
    long_about = "Run cohort batches, inspect cohort statistics and user metrics, manage the database and configuration.",
    after_help = "Examples:\n  cohortly migrate\n  cohortly seed\n  cohortly generate --kmeans\n  cohortly stats --full\n  cohortly metrics usr-0001\n  cohortly doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Replace users and orders with the deterministic demo dataset")]
    Seed {
        #[arg(long, help = "RNG seed for the demo population")]
        seed: Option<u64>,
    },
    #[command(about = "Recompute metrics and cohorts for every active user")]
    Generate {
        #[arg(long, help = "Also run k-means clustering and report cluster analysis")]
        kmeans: bool,
    },
    #[command(about = "Print per-cohort statistics over persisted users")]
    Stats {
        #[arg(long, help = "Include revenue, CLV, churn risk and top segment analytics")]
        full: bool,
    },
    #[command(about = "Derive current metrics for one user without persisting them")]
    Metrics {
        #[arg(help = "User id")]
        user_id: String,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        logging::init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { seed } => commands::seed::run(seed),
        Command::Generate { kmeans } => commands::generate::run(kmeans),
        Command::Stats { full } => commands::stats::run(full),
        Command::Metrics { user_id } => commands::metrics::run(&user_id),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
