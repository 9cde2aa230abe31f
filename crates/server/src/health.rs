//! `GET /health`: readiness of the cohort store.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use cohortly_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
}

/// What the store holds right now. `last_cohort_run` is the newest assignment timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub readiness: Readiness,
    pub users: i64,
    pub active_users: i64,
    pub last_cohort_run: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub readiness: Readiness,
    pub version: &'static str,
    pub store: StoreReport,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let store = inspect_store(&state.db_pool).await;
    let readiness = store.readiness;
    let report = HealthReport {
        readiness,
        version: env!("CARGO_PKG_VERSION"),
        store,
        checked_at: Utc::now(),
    };

    match readiness {
        Readiness::Ready => (StatusCode::OK, Json(report)),
        Readiness::Degraded => (StatusCode::SERVICE_UNAVAILABLE, Json(report)),
    }
}

async fn inspect_store(pool: &DbPool) -> StoreReport {
    let row = sqlx::query_as::<_, (i64, Option<i64>, Option<String>)>(
        "SELECT COUNT(*), SUM(is_active), MAX(last_cohort_update) FROM users",
    )
    .fetch_one(pool)
    .await;

    match row {
        Ok((users, active_users, last_cohort_run)) => StoreReport {
            readiness: Readiness::Ready,
            users,
            active_users: active_users.unwrap_or(0),
            last_cohort_run,
            error: None,
        },
        Err(error) => {
            warn!(
                event_name = "system.health.store_unreachable",
                error = %error,
                "health check could not read the users table"
            );
            StoreReport {
                readiness: Readiness::Degraded,
                users: 0,
                active_users: 0,
                last_cohort_run: None,
                error: Some(error.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use chrono::{TimeZone, Utc};
    use cohortly_core::{Cohort, CohortAssignment, User, UserMetrics};
    use cohortly_db::repositories::UserRepository;
    use cohortly_db::{connect_with_settings, migrations, DbPool, SqlCohortStore};

    use super::{health, HealthState, Readiness};

    async fn pool() -> DbPool {
        connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect")
    }

    #[tokio::test]
    async fn empty_schema_is_ready_with_no_cohort_run() {
        let pool = pool().await;
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(report)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.readiness, Readiness::Ready);
        assert_eq!(report.store.users, 0);
        assert_eq!(report.store.active_users, 0);
        assert_eq!(report.store.last_cohort_run, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn report_counts_users_and_the_latest_assignment() {
        let pool = pool().await;
        migrations::run_pending(&pool).await.expect("migrations");
        let store = SqlCohortStore::sqlite(pool.clone());
        let registered = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let mut dormant = User::new("U-2", "Zoya Khan", "zoya@example.com", registered);
        dormant.is_active = false;
        let active = User::new("U-1", "Vihaan Nair", "vihaan@example.com", registered);
        store.users().save(&active).await.expect("save U-1");
        store.users().save(&dormant).await.expect("save U-2");
        let assigned_at = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        store
            .users()
            .save_cohort_assignment(&CohortAssignment {
                user_id: dormant.id.clone(),
                cohort: Cohort::Inactive,
                metrics: UserMetrics::default(),
                cluster_data: None,
                assigned_at,
            })
            .await
            .expect("assign");

        let (status, Json(report)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.store.users, 2);
        assert_eq!(report.store.active_users, 1);
        assert_eq!(report.store.last_cohort_run.as_deref(), Some("2026-06-01T12:00:00.000000Z"));

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_schema_is_degraded() {
        let pool = pool().await;

        let (status, Json(report)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.readiness, Readiness::Degraded);
        assert!(report.store.error.as_deref().is_some_and(|error| error.contains("users")));

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_is_degraded() {
        let pool = pool().await;
        pool.close().await;

        let (status, Json(report)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(report.store.error.is_some());
    }
}
