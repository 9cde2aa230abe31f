use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cohortly_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

/// Dotted key, rendered value and the env vars that can override it.
type ConfigEntry = (&'static str, String, &'static [&'static str]);

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> ConfigEntry {
    (key, value, env_keys)
}

fn effective_values(config: &AppConfig) -> Vec<ConfigEntry> {
    let thresholds = &config.cohort;
    let clustering = &config.clustering;
    vec![
        entry("database.url", config.database.url.clone(), &["COHORTLY_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["COHORTLY_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["COHORTLY_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["COHORTLY_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["COHORTLY_SERVER_PORT"]),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["COHORTLY_LOGGING_LEVEL", "COHORTLY_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["COHORTLY_LOGGING_FORMAT", "COHORTLY_LOG_FORMAT"],
        ),
        entry(
            "cohort.high_spender_amount",
            thresholds.high_spender_amount.to_string(),
            &["COHORTLY_COHORT_HIGH_SPENDER_AMOUNT"],
        ),
        entry(
            "cohort.frequent_buyer_orders_per_month",
            thresholds.frequent_buyer_orders_per_month.to_string(),
            &["COHORTLY_COHORT_FREQUENT_BUYER_ORDERS_PER_MONTH"],
        ),
        entry(
            "cohort.bulk_buyer_items_per_order",
            thresholds.bulk_buyer_items_per_order.to_string(),
            &["COHORTLY_COHORT_BULK_BUYER_ITEMS_PER_ORDER"],
        ),
        entry(
            "cohort.loyal_customer_min_orders",
            thresholds.loyal_customer_min_orders.to_string(),
            &["COHORTLY_COHORT_LOYAL_CUSTOMER_MIN_ORDERS"],
        ),
        entry(
            "cohort.at_risk_days",
            thresholds.at_risk_days.to_string(),
            &["COHORTLY_COHORT_AT_RISK_DAYS"],
        ),
        entry(
            "cohort.inactive_days",
            thresholds.inactive_days.to_string(),
            &["COHORTLY_COHORT_INACTIVE_DAYS"],
        ),
        entry(
            "cohort.new_customer_days",
            thresholds.new_customer_days.to_string(),
            &["COHORTLY_COHORT_NEW_CUSTOMER_DAYS"],
        ),
        entry("clustering.k", clustering.k.to_string(), &["COHORTLY_CLUSTERING_K"]),
        entry(
            "clustering.max_iterations",
            clustering.max_iterations.to_string(),
            &["COHORTLY_CLUSTERING_MAX_ITERATIONS"],
        ),
        entry(
            "clustering.tolerance",
            clustering.tolerance.to_string(),
            &["COHORTLY_CLUSTERING_TOLERANCE"],
        ),
        entry(
            "clustering.seed",
            clustering.seed.map(|seed| seed.to_string()).unwrap_or_else(|| "<entropy>".to_string()),
            &["COHORTLY_CLUSTERING_SEED"],
        ),
        entry(
            "clustering.timeout_secs",
            clustering.timeout_secs.to_string(),
            &["COHORTLY_CLUSTERING_TIMEOUT_SECS"],
        ),
        entry(
            "batch.max_concurrency",
            config.batch.max_concurrency.to_string(),
            &["COHORTLY_BATCH_MAX_CONCURRENCY"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["cohortly.toml", "config/cohortly.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
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
