//! JSON routes over the cohort orchestrator.
//!
//! - `POST /api/cohorts/generate`             recompute metrics and cohorts for active users
//! - `GET  /api/cohorts/stats`                per-cohort counts, shares and averages
//! - `GET  /api/cohorts/analytics`            statistics plus revenue, CLV, behavior and churn
//! - `GET  /api/cohorts/types`                cohort definitions and the active thresholds
//! - `GET  /api/cohorts/trends`               daily orders and revenue (`?start=&end=&cohort=`)
//! - `GET  /api/cohorts/{name}/users`         paged members of one cohort (`?page=&limit=`)
//! - `GET  /api/users/{id}/metrics`           live metrics for one user
//!
//! Every response is wrapped in `{ "success", "message", "data" }`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use cohortly_core::cohort::statistics::{CohortAnalytics, CohortPage, CohortStatistics};
use cohortly_core::{
    ApplicationError, BatchSummary, Cohort, CohortOrchestrator, CohortStore, CohortTypes,
    DailyTrend, InterfaceError, OrderTrendFilter, UserId, UserMetrics,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 200;

pub struct ApiState<S> {
    orchestrator: Arc<CohortOrchestrator<S>>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self { orchestrator: Arc::clone(&self.orchestrator) }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub success: bool,
    pub message: String,
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub use_kmeans: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// Bounds accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates; a plain `end` date covers
/// that whole day.
#[derive(Debug, Default, Deserialize)]
pub struct TrendQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub cohort: Option<String>,
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiError>)>;

pub fn router<S>(orchestrator: Arc<CohortOrchestrator<S>>) -> Router
where
    S: CohortStore + 'static,
{
    Router::new()
        .route("/api/cohorts/generate", post(generate_cohorts::<S>))
        .route("/api/cohorts/stats", get(cohort_stats::<S>))
        .route("/api/cohorts/analytics", get(cohort_analytics::<S>))
        .route("/api/cohorts/types", get(cohort_types::<S>))
        .route("/api/cohorts/trends", get(order_trends::<S>))
        .route("/api/cohorts/{name}/users", get(cohort_users::<S>))
        .route("/api/users/{id}/metrics", get(user_metrics::<S>))
        .with_state(ApiState { orchestrator })
}

async fn generate_cohorts<S>(
    State(state): State<ApiState<S>>,
    Json(body): Json<GenerateRequest>,
) -> ApiResult<BatchSummary>
where
    S: CohortStore + 'static,
{
    let correlation_id = correlation_id();
    let summary = state
        .orchestrator
        .run_batch(body.use_kmeans)
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    info!(
        event_name = "api.cohorts.generated",
        correlation_id = %correlation_id,
        run_id = %summary.run_id,
        updated_users = summary.updated_users,
        errors = summary.errors.len(),
        "cohort generation finished"
    );

    let message = format!(
        "Cohorts generated for {}/{} users",
        summary.updated_users, summary.total_users
    );
    Ok(ok(message, summary))
}

async fn cohort_stats<S>(State(state): State<ApiState<S>>) -> ApiResult<CohortStatistics>
where
    S: CohortStore + 'static,
{
    let correlation_id = correlation_id();
    let statistics = state
        .orchestrator
        .cohort_statistics()
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    Ok(ok("Cohort statistics retrieved", statistics))
}

async fn cohort_analytics<S>(State(state): State<ApiState<S>>) -> ApiResult<CohortAnalytics>
where
    S: CohortStore + 'static,
{
    let correlation_id = correlation_id();
    let analytics = state
        .orchestrator
        .analytics()
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    Ok(ok("Cohort analytics retrieved", analytics))
}

async fn cohort_types<S>(State(state): State<ApiState<S>>) -> ApiResult<CohortTypes>
where
    S: CohortStore + 'static,
{
    Ok(ok("Cohort types retrieved", state.orchestrator.cohort_types()))
}

async fn order_trends<S>(
    Query(query): Query<TrendQuery>,
    State(state): State<ApiState<S>>,
) -> ApiResult<Vec<DailyTrend>>
where
    S: CohortStore + 'static,
{
    let correlation_id = correlation_id();
    let filter = trend_filter(&query).map_err(|message| {
        interface_error(InterfaceError::BadRequest {
            message,
            correlation_id: correlation_id.clone(),
        })
    })?;

    let trends = state
        .orchestrator
        .order_trends(&filter)
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    let message = format!("Order trends for {} days", trends.len());
    Ok(ok(message, trends))
}

fn trend_filter(query: &TrendQuery) -> Result<OrderTrendFilter, String> {
    let start = query.start.as_deref().map(|raw| parse_bound("start", raw, false)).transpose()?;
    let end = query.end.as_deref().map(|raw| parse_bound("end", raw, true)).transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err("`start` must not be after `end`".to_string());
        }
    }
    let cohort = query
        .cohort
        .as_deref()
        .map(|name| Cohort::parse(name).ok_or_else(|| format!("unknown cohort `{name}`")))
        .transpose()?;

    Ok(OrderTrendFilter { start, end, cohort })
}

fn parse_bound(field: &str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Ok(value.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| {
            if end_of_day {
                date.and_hms_micro_opt(23, 59, 59, 999_999)
            } else {
                date.and_hms_opt(0, 0, 0)
            }
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| format!("`{field}` must be a date (YYYY-MM-DD) or an RFC 3339 timestamp"))
}

async fn cohort_users<S>(
    Path(name): Path<String>,
    Query(query): Query<PageQuery>,
    State(state): State<ApiState<S>>,
) -> ApiResult<CohortPage>
where
    S: CohortStore + 'static,
{
    let correlation_id = correlation_id();
    let Some(cohort) = Cohort::parse(&name) else {
        return Err(interface_error(InterfaceError::BadRequest {
            message: format!("unknown cohort `{name}`"),
            correlation_id,
        }));
    };

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let members = state
        .orchestrator
        .users_in_cohort(cohort, page, limit)
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    let message = format!("{} users in {cohort}", members.total);
    Ok(ok(message, members))
}

async fn user_metrics<S>(
    Path(id): Path<String>,
    State(state): State<ApiState<S>>,
) -> ApiResult<UserMetrics>
where
    S: CohortStore + 'static,
{
    let correlation_id = correlation_id();
    let id = id.trim();
    if id.is_empty() {
        return Err(interface_error(InterfaceError::BadRequest {
            message: "user id is required".to_string(),
            correlation_id,
        }));
    }

    let metrics = state
        .orchestrator
        .compute_metrics(&UserId(id.to_string()))
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    Ok(ok("User metrics computed", metrics))
}

fn ok<T>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, message: message.into(), data: Some(data) })
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

fn application_error(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    warn!(
        event_name = "api.request.failed",
        correlation_id = %correlation_id,
        error = %error,
        "request failed"
    );
    interface_error(error.into_interface(correlation_id))
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = ApiError {
        success: false,
        message: error.user_message().to_string(),
        error: error.to_string(),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use cohortly_core::{
        AppConfig, CohortOrchestrator, FixedClock, InMemoryCohortStore, Order, OrderId, OrderItem,
        OrderStatus, User, UserId,
    };
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::router;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn order(id: &str, user_id: &str, days_ago: i64, amount: i64) -> Order {
        Order {
            id: OrderId(id.to_string()),
            user_id: UserId(user_id.to_string()),
            items: vec![OrderItem {
                product_id: "P-1".to_string(),
                product_name: "Desk Lamp".to_string(),
                category: "Home".to_string(),
                quantity: 1,
                unit_price: Decimal::new(amount, 0),
            }],
            total_amount: Decimal::new(amount, 0),
            status: OrderStatus::Delivered,
            order_date: now() - Duration::days(days_ago),
        }
    }

    async fn app(store: Arc<InMemoryCohortStore>) -> Router {
        let mut config = AppConfig::default();
        config.clustering.seed = Some(3);
        let orchestrator =
            CohortOrchestrator::new(store, &config).with_clock(Arc::new(FixedClock(now())));
        router(Arc::new(orchestrator))
    }

    async fn populated_store() -> Arc<InMemoryCohortStore> {
        let store = Arc::new(InMemoryCohortStore::new());
        for index in 0..3 {
            let id = format!("U-new-{index}");
            store
                .insert_user(User::new(&id, "New Shopper", format!("{id}@example.com"), now()))
                .await;
        }
        store
            .insert_user(User::new(
                "U-buyer",
                "Repeat Buyer",
                "buyer@example.com",
                now() - Duration::days(120),
            ))
            .await;
        store.insert_order(order("O-1", "U-buyer", 5, 120)).await;
        store.insert_order(order("O-2", "U-buyer", 40, 80)).await;
        store
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("router should respond");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body bytes");
        let payload = serde_json::from_slice(&bytes).expect("json body");
        (status, payload)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    fn generate(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/cohorts/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn generate_then_stats_reflects_every_active_user() {
        let app = app(populated_store().await).await;

        let (status, payload) = send(&app, generate(r#"{"use_kmeans": false}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["success"], true);
        assert_eq!(payload["data"]["total_users"], 4);
        assert_eq!(payload["data"]["updated_users"], 4);
        assert_eq!(payload["message"], "Cohorts generated for 4/4 users");

        let (status, payload) = send(&app, get("/api/cohorts/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"]["total_users"], 4);
        assert_eq!(payload["data"]["cohorts"]["New Customer"]["count"], 3);
    }

    #[tokio::test]
    async fn generate_accepts_an_empty_body_object() {
        let app = app(populated_store().await).await;

        let (status, payload) = send(&app, generate("{}")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(payload["data"].get("clustering_results").is_some());
        assert!(payload["data"]["clustering_results"].is_null());
    }

    #[tokio::test]
    async fn cohort_users_are_paged() {
        let app = app(populated_store().await).await;
        send(&app, generate("{}")).await;

        let (status, payload) = send(&app, get("/api/cohorts/new-customer/users?page=2&limit=2")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"]["total"], 3);
        assert_eq!(payload["data"]["total_pages"], 2);
        assert_eq!(payload["data"]["page"], 2);
        assert_eq!(payload["data"]["users"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn unknown_cohort_is_a_bad_request() {
        let app = app(populated_store().await).await;

        let (status, payload) = send(&app, get("/api/cohorts/whales/users")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["success"], false);
        assert!(payload["error"].as_str().is_some_and(|error| error.contains("whales")));
        assert!(payload["correlation_id"].as_str().is_some_and(|id| id.starts_with("req-")));
    }

    #[tokio::test]
    async fn user_metrics_are_computed_live() {
        let app = app(populated_store().await).await;

        let (status, payload) = send(&app, get("/api/users/U-buyer/metrics")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"]["total_orders"], 2);
        assert_eq!(payload["data"]["days_since_last_order"], 5);
    }

    #[tokio::test]
    async fn missing_user_metrics_is_not_found() {
        let app = app(populated_store().await).await;

        let (status, payload) = send(&app, get("/api/users/U-ghost/metrics")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload["message"], "The requested resource was not found.");
    }

    #[tokio::test]
    async fn cohort_types_describe_every_cohort_and_threshold() {
        let app = app(Arc::new(InMemoryCohortStore::new())).await;

        let (status, payload) = send(&app, get("/api/cohorts/types")).await;

        assert_eq!(status, StatusCode::OK);
        let types = payload["data"]["cohort_types"].as_array().expect("cohort types");
        assert_eq!(types.len(), 8);
        assert_eq!(types[0]["cohort"], "High Spender");
        assert_eq!(types[7]["description"], "Recently registered customers");
        assert_eq!(payload["data"]["thresholds"]["inactive_days"], 90);
        assert_eq!(payload["data"]["thresholds"]["loyal_customer_min_orders"], 10);
    }

    #[tokio::test]
    async fn order_trends_are_daily_and_filterable() {
        let app = app(populated_store().await).await;
        send(&app, generate("{}")).await;

        let (status, payload) = send(&app, get("/api/cohorts/trends")).await;
        assert_eq!(status, StatusCode::OK);
        let days = payload["data"].as_array().expect("trend days");
        assert_eq!(days.len(), 2);
        assert_eq!(days[0]["date"], "2026-04-22");
        assert_eq!(days[1]["total_orders"], 1);

        let (status, payload) = send(&app, get("/api/cohorts/trends?start=2026-05-22")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(1));

        let (status, payload) =
            send(&app, get("/api/cohorts/trends?start=2026-04-01&end=2026-04-22")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(1));

        let (status, payload) = send(&app, get("/api/cohorts/trends?cohort=new-customer")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn malformed_trend_filters_are_bad_requests() {
        let app = app(populated_store().await).await;

        let (status, _) = send(&app, get("/api/cohorts/trends?start=last-week")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&app, get("/api/cohorts/trends?start=2026-05-02&end=2026-05-01")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, payload) = send(&app, get("/api/cohorts/trends?cohort=whales")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(payload["error"].as_str().is_some_and(|error| error.contains("whales")));
    }

    #[tokio::test]
    async fn analytics_include_behavior_insights() {
        let app = app(populated_store().await).await;
        send(&app, generate("{}")).await;

        let (status, payload) = send(&app, get("/api/cohorts/analytics")).await;

        assert_eq!(status, StatusCode::OK);
        let insights = &payload["data"]["behavior_insights"];
        let categories = insights["category_preferences"].as_array().expect("categories");
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0]["categories"][0]["category"], "Home");
        assert_eq!(categories[0]["categories"][0]["order_count"], 2);
        assert_eq!(insights["seasonal_trends"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn unavailable_store_maps_to_service_unavailable() {
        let store = populated_store().await;
        store.set_unavailable(true).await;
        let app = app(store).await;

        let (status, payload) = send(&app, get("/api/cohorts/analytics")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload["success"], false);
    }
}
