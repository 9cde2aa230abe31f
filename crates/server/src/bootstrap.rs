use std::sync::Arc;

use cohortly_core::config::{AppConfig, ConfigError};
use cohortly_core::CohortOrchestrator;
use cohortly_db::{connect_with_config, migrations, DbPool, SqlCohortStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<CohortOrchestrator<SqlCohortStore>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlCohortStore::sqlite(db_pool.clone()));
    let orchestrator = Arc::new(CohortOrchestrator::new(store, &config));

    Ok(Application { config, db_pool, orchestrator })
}

#[cfg(test)]
mod tests {
    use cohortly_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(database_url: &str) -> Result<Application, BootstrapError> {
        let config = AppConfig::load(options(database_url))?;
        bootstrap_with_config(config).await
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_url() {
        let result = bootstrap("postgres://localhost/cohortly").await;

        let error = result.err().expect("bootstrap should fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_serves_empty_statistics() {
        let app = bootstrap("sqlite::memory:")
            .await
            .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'orders', 'order_items')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("cohort tables should exist after bootstrap");
        assert_eq!(table_count, 3);

        let statistics =
            app.orchestrator.cohort_statistics().await.expect("statistics on empty database");
        assert_eq!(statistics.total_users, 0);
        assert!(statistics.cohorts.is_empty());

        let summary = app.orchestrator.run_batch(false).await.expect("empty batch");
        assert_eq!(summary.total_users, 0);
        assert!(summary.errors.is_empty());

        app.db_pool.close().await;
    }

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
