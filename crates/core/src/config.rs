use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cohort::classifier::CohortThresholds;
use crate::cohort::cluster::ClusteringConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cohort: CohortThresholds,
    pub clustering: ClusteringConfig,
    pub batch: BatchConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Upper bound on users whose metrics are derived concurrently.
    pub max_concurrency: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub clustering_seed: Option<u64>,
    pub clustering_k: Option<usize>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cohortly.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            cohort: CohortThresholds::default(),
            clustering: ClusteringConfig::default(),
            batch: BatchConfig { max_concurrency: 4 },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cohortly.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(cohort) = patch.cohort {
            let thresholds = &mut self.cohort;
            if let Some(value) = cohort.high_spender_amount {
                thresholds.high_spender_amount = value;
            }
            if let Some(value) = cohort.frequent_buyer_orders_per_month {
                thresholds.frequent_buyer_orders_per_month = value;
            }
            if let Some(value) = cohort.bulk_buyer_items_per_order {
                thresholds.bulk_buyer_items_per_order = value;
            }
            if let Some(value) = cohort.loyal_customer_min_orders {
                thresholds.loyal_customer_min_orders = value;
            }
            if let Some(value) = cohort.at_risk_days {
                thresholds.at_risk_days = value;
            }
            if let Some(value) = cohort.inactive_days {
                thresholds.inactive_days = value;
            }
            if let Some(value) = cohort.new_customer_days {
                thresholds.new_customer_days = value;
            }
        }

        if let Some(clustering) = patch.clustering {
            if let Some(k) = clustering.k {
                self.clustering.k = k;
            }
            if let Some(max_iterations) = clustering.max_iterations {
                self.clustering.max_iterations = max_iterations;
            }
            if let Some(tolerance) = clustering.tolerance {
                self.clustering.tolerance = tolerance;
            }
            if let Some(seed) = clustering.seed {
                self.clustering.seed = Some(seed);
            }
            if let Some(timeout_secs) = clustering.timeout_secs {
                self.clustering.timeout_secs = timeout_secs;
            }
        }

        if let Some(batch) = patch.batch {
            if let Some(max_concurrency) = batch.max_concurrency {
                self.batch.max_concurrency = max_concurrency;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COHORTLY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COHORTLY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("COHORTLY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("COHORTLY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COHORTLY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COHORTLY_SERVER_PORT") {
            self.server.port = parse_env("COHORTLY_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("COHORTLY_LOGGING_LEVEL").or_else(|| read_env("COHORTLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COHORTLY_LOGGING_FORMAT").or_else(|| read_env("COHORTLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("COHORTLY_COHORT_HIGH_SPENDER_AMOUNT") {
            self.cohort.high_spender_amount =
                parse_env::<Decimal>("COHORTLY_COHORT_HIGH_SPENDER_AMOUNT", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_COHORT_FREQUENT_BUYER_ORDERS_PER_MONTH") {
            self.cohort.frequent_buyer_orders_per_month =
                parse_env("COHORTLY_COHORT_FREQUENT_BUYER_ORDERS_PER_MONTH", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_COHORT_BULK_BUYER_ITEMS_PER_ORDER") {
            self.cohort.bulk_buyer_items_per_order =
                parse_env("COHORTLY_COHORT_BULK_BUYER_ITEMS_PER_ORDER", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_COHORT_LOYAL_CUSTOMER_MIN_ORDERS") {
            self.cohort.loyal_customer_min_orders =
                parse_env("COHORTLY_COHORT_LOYAL_CUSTOMER_MIN_ORDERS", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_COHORT_AT_RISK_DAYS") {
            self.cohort.at_risk_days = parse_env("COHORTLY_COHORT_AT_RISK_DAYS", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_COHORT_INACTIVE_DAYS") {
            self.cohort.inactive_days = parse_env("COHORTLY_COHORT_INACTIVE_DAYS", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_COHORT_NEW_CUSTOMER_DAYS") {
            self.cohort.new_customer_days =
                parse_env("COHORTLY_COHORT_NEW_CUSTOMER_DAYS", &value)?;
        }

        if let Some(value) = read_env("COHORTLY_CLUSTERING_K") {
            self.clustering.k = parse_env("COHORTLY_CLUSTERING_K", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_CLUSTERING_MAX_ITERATIONS") {
            self.clustering.max_iterations =
                parse_env("COHORTLY_CLUSTERING_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_CLUSTERING_TOLERANCE") {
            self.clustering.tolerance = parse_env("COHORTLY_CLUSTERING_TOLERANCE", &value)?;
        }
        if let Some(value) = read_env("COHORTLY_CLUSTERING_SEED") {
            self.clustering.seed = Some(parse_env("COHORTLY_CLUSTERING_SEED", &value)?);
        }
        if let Some(value) = read_env("COHORTLY_CLUSTERING_TIMEOUT_SECS") {
            self.clustering.timeout_secs = parse_env("COHORTLY_CLUSTERING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COHORTLY_BATCH_MAX_CONCURRENCY") {
            self.batch.max_concurrency = parse_env("COHORTLY_BATCH_MAX_CONCURRENCY", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(seed) = overrides.clustering_seed {
            self.clustering.seed = Some(seed);
        }
        if let Some(k) = overrides.clustering_k {
            self.clustering.k = k;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_cohort(&self.cohort)?;
        validate_clustering(&self.clustering)?;
        validate_batch(&self.batch)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cohortly.toml"), PathBuf::from("config/cohortly.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_cohort(cohort: &CohortThresholds) -> Result<(), ConfigError> {
    if cohort.high_spender_amount.is_sign_negative() {
        return Err(ConfigError::Validation(
            "cohort.high_spender_amount must not be negative".to_string(),
        ));
    }
    let ratios = [
        ("cohort.frequent_buyer_orders_per_month", cohort.frequent_buyer_orders_per_month),
        ("cohort.bulk_buyer_items_per_order", cohort.bulk_buyer_items_per_order),
    ];
    for (key, value) in ratios {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{key} must be a finite, non-negative number"
            )));
        }
    }
    let days = [
        ("cohort.at_risk_days", cohort.at_risk_days),
        ("cohort.inactive_days", cohort.inactive_days),
        ("cohort.new_customer_days", cohort.new_customer_days),
    ];
    for (key, value) in days {
        if value < 0 {
            return Err(ConfigError::Validation(format!("{key} must not be negative")));
        }
    }
    if cohort.at_risk_days >= cohort.inactive_days {
        return Err(ConfigError::Validation(
            "cohort.at_risk_days must be lower than cohort.inactive_days".to_string(),
        ));
    }
    Ok(())
}

fn validate_clustering(clustering: &ClusteringConfig) -> Result<(), ConfigError> {
    if clustering.k == 0 {
        return Err(ConfigError::Validation("clustering.k must be at least 1".to_string()));
    }
    if clustering.max_iterations == 0 {
        return Err(ConfigError::Validation(
            "clustering.max_iterations must be at least 1".to_string(),
        ));
    }
    if !clustering.tolerance.is_finite() || clustering.tolerance <= 0.0 {
        return Err(ConfigError::Validation(
            "clustering.tolerance must be a finite number greater than zero".to_string(),
        ));
    }
    if clustering.timeout_secs == 0 || clustering.timeout_secs > 3600 {
        return Err(ConfigError::Validation(
            "clustering.timeout_secs must be in range 1..=3600".to_string(),
        ));
    }
    Ok(())
}

fn validate_batch(batch: &BatchConfig) -> Result<(), ConfigError> {
    if batch.max_concurrency == 0 {
        return Err(ConfigError::Validation(
            "batch.max_concurrency must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    cohort: Option<CohortPatch>,
    clustering: Option<ClusteringPatch>,
    batch: Option<BatchPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct CohortPatch {
    high_spender_amount: Option<Decimal>,
    frequent_buyer_orders_per_month: Option<f64>,
    bulk_buyer_items_per_order: Option<f64>,
    loyal_customer_min_orders: Option<u32>,
    at_risk_days: Option<i64>,
    inactive_days: Option<i64>,
    new_customer_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClusteringPatch {
    k: Option<usize>,
    max_iterations: Option<usize>,
    tolerance: Option<f64>,
    seed: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchPatch {
    max_concurrency: Option<usize>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_business_rule_table() -> Result<(), String> {
        let config = AppConfig::default();

        ensure(config.cohort.high_spender_amount == Decimal::new(2000, 0), "high spender 2000")?;
        ensure(config.cohort.frequent_buyer_orders_per_month == 3.0, "frequent buyer 3/month")?;
        ensure(config.cohort.bulk_buyer_items_per_order == 5.0, "bulk buyer 5 items")?;
        ensure(config.cohort.loyal_customer_min_orders == 10, "loyal 10 orders")?;
        ensure(config.cohort.at_risk_days == 30, "at risk 30 days")?;
        ensure(config.cohort.inactive_days == 90, "inactive 90 days")?;
        ensure(config.cohort.new_customer_days == 7, "new customer 7 days")?;
        ensure(config.clustering.k == 4, "k defaults to 4")?;
        ensure(config.clustering.max_iterations == 100, "iteration cap defaults to 100")?;
        ensure(config.clustering.tolerance == 0.01, "tolerance defaults to 0.01")?;
        ensure(config.validate().is_ok(), "defaults should validate")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_COHORTLY_DB_URL", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cohortly.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_COHORTLY_DB_URL}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_COHORTLY_DB_URL"]);
        result
    }

    #[test]
    fn thresholds_are_tunable_from_file_and_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COHORTLY_COHORT_INACTIVE_DAYS", "120");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cohortly.toml");
            fs::write(
                &path,
                r#"
[cohort]
high_spender_amount = 1500
inactive_days = 100
frequent_buyer_orders_per_month = 2.5

[clustering]
k = 3
seed = 42
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.cohort.high_spender_amount == Decimal::new(1500, 0),
                "file should set the high spender threshold",
            )?;
            ensure(config.cohort.inactive_days == 120, "env should win over file")?;
            ensure(
                config.cohort.frequent_buyer_orders_per_month == 2.5,
                "file should set the frequency threshold",
            )?;
            ensure(config.clustering.k == 3, "file should set k")?;
            ensure(config.clustering.seed == Some(42), "file should set the seed")
        })();

        clear_vars(&["COHORTLY_COHORT_INACTIVE_DAYS"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COHORTLY_LOG_LEVEL", "warn");
        env::set_var("COHORTLY_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["COHORTLY_LOG_LEVEL", "COHORTLY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COHORTLY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("COHORTLY_CLUSTERING_SEED", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cohortly.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"

[clustering]
seed = 1
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.clustering.seed == Some(7), "env seed should win over file")
        })();

        clear_vars(&["COHORTLY_DATABASE_URL", "COHORTLY_CLUSTERING_SEED"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COHORTLY_CLUSTERING_K", "four");

        let result = (|| -> Result<(), String> {
            match AppConfig::load(LoadOptions::default()) {
                Ok(_) => Err("expected invalid override to fail".to_string()),
                Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                    ensure(key == "COHORTLY_CLUSTERING_K", "error should name the env key")
                }
                Err(other) => Err(format!("unexpected error: {other}")),
            }
        })();

        clear_vars(&["COHORTLY_CLUSTERING_K"]);
        result
    }

    #[test]
    fn validation_rejects_inverted_recency_thresholds() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.cohort.at_risk_days = 120;

        let error = match config.validate() {
            Ok(()) => return Err("expected validation failure".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("cohort.at_risk_days")
        );
        ensure(has_message, "validation failure should mention cohort.at_risk_days")
    }

    #[test]
    fn validation_rejects_zero_clusters_and_bad_tolerance() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.clustering.k = 0;
        ensure(
            matches!(config.validate(), Err(ConfigError::Validation(ref m)) if m.contains("clustering.k")),
            "k = 0 should fail validation",
        )?;

        let mut config = AppConfig::default();
        config.clustering.tolerance = f64::NAN;
        ensure(
            matches!(config.validate(), Err(ConfigError::Validation(ref m)) if m.contains("clustering.tolerance")),
            "NaN tolerance should fail validation",
        )
    }

    #[test]
    fn validation_rejects_non_sqlite_database() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/cohorts".to_string();

        ensure(
            matches!(config.validate(), Err(ConfigError::Validation(ref m)) if m.contains("database.url")),
            "non-sqlite url should fail validation",
        )
    }
}
