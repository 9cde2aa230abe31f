use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::cohort::classifier::RuleClassifier;
use crate::cohort::cluster::{ClusterAnalysis, ClusterEngine, ClusteringUnavailable};
use crate::cohort::metrics::derive_metrics;
use crate::cohort::normalize::FeatureNormalizer;
use crate::cohort::statistics::{
    self, CohortAnalytics, CohortPage, CohortStatistics, CohortTypes, DailyTrend,
    OrderTrendFilter,
};
use crate::cohort::store::CohortStore;
use crate::config::AppConfig;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::user::{
    ClusterData, ClusterFeatures, Cohort, CohortAssignment, User, UserId, UserMetrics,
};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    pub user_id: UserId,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: String,
    pub as_of: DateTime<Utc>,
    pub total_users: usize,
    pub updated_users: usize,
    pub cohort_distribution: BTreeMap<Cohort, usize>,
    pub errors: Vec<UserError>,
    /// Present only when clustering was requested and produced results.
    pub clustering_results: Option<Vec<ClusterAnalysis>>,
    pub clustering_unavailable: Option<String>,
}

/// Recomputes metrics and cohorts for every active user.
///
/// At most one batch runs per orchestrator at a time; a second caller gets
/// [`ApplicationError::BatchInProgress`].
pub struct CohortOrchestrator<S> {
    store: Arc<S>,
    classifier: RuleClassifier,
    normalizer: FeatureNormalizer,
    engine: ClusterEngine,
    max_concurrency: usize,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    running: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S> CohortOrchestrator<S>
where
    S: CohortStore + 'static,
{
    pub fn new(store: Arc<S>, config: &AppConfig) -> Self {
        Self {
            store,
            classifier: RuleClassifier::new(config.cohort.clone()),
            normalizer: FeatureNormalizer,
            engine: ClusterEngine::new(config.clustering.clone(), config.cohort.clone()),
            max_concurrency: config.batch.max_concurrency.max(1),
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn compute_metrics(&self, user_id: &UserId) -> Result<UserMetrics, ApplicationError> {
        if self.store.find_user(user_id).await?.is_none() {
            return Err(ApplicationError::NotFound(format!("user {user_id}")));
        }
        let orders = self.store.find_orders_by_user(user_id, &OrderStatus::QUALIFYING, true).await?;
        Ok(derive_metrics(&orders, self.clock.now())?)
    }

    pub async fn run_batch(&self, use_clustering: bool) -> Result<BatchSummary, ApplicationError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(event_name = "cohort.batch.rejected", "cohort batch already in progress");
            return Err(ApplicationError::BatchInProgress);
        }
        let _guard = RunGuard(&self.running);

        let run_id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        self.emit(
            AuditEvent::new(
                &run_id,
                None,
                "cohort.batch.started",
                AuditCategory::Batch,
                AuditOutcome::Success,
                now,
            )
            .with_metadata("use_clustering", use_clustering.to_string()),
        );

        let users = self.store.find_active_users().await.map_err(|error| {
            self.emit(
                AuditEvent::new(
                    &run_id,
                    None,
                    "cohort.batch.aborted",
                    AuditCategory::Batch,
                    AuditOutcome::Failed,
                    now,
                )
                .with_metadata("error", error.to_string()),
            );
            ApplicationError::from(error)
        })?;
        let total_users = users.len();
        info!(
            event_name = "cohort.batch.loaded",
            run_id = %run_id,
            total_users,
            "active users loaded"
        );

        let user_ids: Vec<UserId> = users.iter().map(|user| user.id.clone()).collect();
        let outcomes = self.derive_all(user_ids, now).await;

        let mut errors = Vec::new();
        let mut computed = Vec::with_capacity(total_users);
        for (mut user, outcome) in users.into_iter().zip(outcomes) {
            match outcome {
                Ok(metrics) => {
                    user.metrics = metrics;
                    computed.push(user);
                }
                Err(error) => {
                    self.emit(
                        AuditEvent::new(
                            &run_id,
                            Some(user.id.clone()),
                            "cohort.metrics.failed",
                            AuditCategory::Metrics,
                            AuditOutcome::Failed,
                            now,
                        )
                        .with_metadata("error", error.clone()),
                    );
                    errors.push(UserError { user_id: user.id, error });
                }
            }
        }

        let mut clustering_results = None;
        let mut clustering_unavailable = None;
        if use_clustering {
            match self.cluster(&computed).await {
                Ok(outcome) => {
                    for (user, (cluster_id, features)) in computed.iter_mut().zip(outcome.features) {
                        user.cluster_data =
                            Some(ClusterData { cluster_id: Some(cluster_id), features });
                    }
                    self.emit(
                        AuditEvent::new(
                            &run_id,
                            None,
                            "cohort.clustering.completed",
                            AuditCategory::Clustering,
                            AuditOutcome::Success,
                            now,
                        )
                        .with_metadata("clusters", outcome.clusters.len().to_string())
                        .with_metadata("iterations", outcome.iterations.to_string())
                        .with_metadata("converged", outcome.converged.to_string()),
                    );
                    clustering_results = Some(outcome.clusters);
                }
                Err(reason) => {
                    self.emit(
                        AuditEvent::new(
                            &run_id,
                            None,
                            "cohort.clustering.unavailable",
                            AuditCategory::Clustering,
                            AuditOutcome::Skipped,
                            now,
                        )
                        .with_metadata("reason", reason.to_string()),
                    );
                    clustering_unavailable = Some(reason.to_string());
                }
            }
        }

        let mut cohort_distribution = BTreeMap::new();
        let mut updated_users = 0;
        let clustered = clustering_results.is_some();
        for user in computed {
            let previous = user.cohort;
            let assignment = CohortAssignment {
                user_id: user.id.clone(),
                cohort: self.classifier.classify(&user.metrics, user.registration_date, now),
                metrics: user.metrics,
                cluster_data: if clustered { user.cluster_data } else { None },
                assigned_at: now,
            };

            match self.store.save_cohort_assignment(&assignment).await {
                Ok(()) => {
                    updated_users += 1;
                    *cohort_distribution.entry(assignment.cohort).or_insert(0) += 1;
                    if previous != assignment.cohort {
                        self.emit(
                            AuditEvent::new(
                                &run_id,
                                Some(user.id.clone()),
                                "cohort.user.moved",
                                AuditCategory::Classification,
                                AuditOutcome::Success,
                                now,
                            )
                            .with_metadata("from", previous.label())
                            .with_metadata("to", assignment.cohort.label()),
                        );
                    }
                }
                Err(error) => {
                    self.emit(
                        AuditEvent::new(
                            &run_id,
                            Some(user.id.clone()),
                            "cohort.user.save_failed",
                            AuditCategory::Persistence,
                            AuditOutcome::Failed,
                            now,
                        )
                        .with_metadata("error", error.to_string()),
                    );
                    errors.push(UserError { user_id: user.id, error: error.to_string() });
                }
            }
        }

        self.emit(
            AuditEvent::new(
                &run_id,
                None,
                "cohort.batch.completed",
                AuditCategory::Batch,
                if errors.is_empty() { AuditOutcome::Success } else { AuditOutcome::Failed },
                now,
            )
            .with_metadata("total_users", total_users.to_string())
            .with_metadata("updated_users", updated_users.to_string())
            .with_metadata("errors", errors.len().to_string()),
        );

        Ok(BatchSummary {
            run_id,
            as_of: now,
            total_users,
            updated_users,
            cohort_distribution,
            errors,
            clustering_results,
            clustering_unavailable,
        })
    }

    pub async fn cohort_statistics(&self) -> Result<CohortStatistics, ApplicationError> {
        let users = self.store.find_active_users().await?;
        Ok(statistics::cohort_statistics(&users))
    }

    pub async fn analytics(&self) -> Result<CohortAnalytics, ApplicationError> {
        let users = self.store.find_active_users().await?;
        let orders = self.qualifying_orders(&users).await?;
        Ok(CohortAnalytics::from_population(&users, &orders, self.clock.now()))
    }

    pub async fn order_trends(
        &self,
        filter: &OrderTrendFilter,
    ) -> Result<Vec<DailyTrend>, ApplicationError> {
        let users = self.store.find_active_users().await?;
        let orders = self.qualifying_orders(&users).await?;
        Ok(statistics::order_trends(&users, &orders, filter))
    }

    pub fn cohort_types(&self) -> CohortTypes {
        statistics::cohort_types(self.classifier.thresholds())
    }

    pub async fn users_in_cohort(
        &self,
        cohort: Cohort,
        page: usize,
        limit: usize,
    ) -> Result<CohortPage, ApplicationError> {
        let users = self.store.find_active_users().await?;
        Ok(statistics::users_in_cohort(&users, cohort, page, limit))
    }

    async fn qualifying_orders(&self, users: &[User]) -> Result<Vec<Order>, ApplicationError> {
        let mut orders = Vec::new();
        for user in users {
            orders.extend(
                self.store.find_orders_by_user(&user.id, &OrderStatus::QUALIFYING, true).await?,
            );
        }
        Ok(orders)
    }

    /// Derives metrics for every active user with bounded fan-out, returning results in input order.
    async fn derive_all(
        &self,
        user_ids: Vec<UserId>,
        now: DateTime<Utc>,
    ) -> Vec<Result<UserMetrics, String>> {
        let mut results: Vec<Option<Result<UserMetrics, String>>> = vec![None; user_ids.len()];
        let mut tasks = JoinSet::new();

        for (index, user_id) in user_ids.into_iter().enumerate() {
            if tasks.len() >= self.max_concurrency {
                if let Some(joined) = tasks.join_next().await {
                    record(&mut results, joined);
                }
            }
            let store = Arc::clone(&self.store);
            tasks.spawn(async move {
                let outcome = match store
                    .find_orders_by_user(&user_id, &OrderStatus::QUALIFYING, true)
                    .await
                {
                    Ok(orders) => derive_metrics(&orders, now).map_err(|error| error.to_string()),
                    Err(error) => Err(error.to_string()),
                };
                (index, outcome)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            record(&mut results, joined);
        }

        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err("metrics task terminated unexpectedly".to_string()))
            })
            .collect()
    }

    async fn cluster(&self, users: &[User]) -> Result<AssignedClusters, ClusteringUnavailable> {
        let config = self.engine.config();
        if users.len() < config.k {
            return Err(ClusteringUnavailable::InsufficientPopulation {
                users: users.len(),
                k: config.k,
            });
        }

        let population = self.normalizer.normalize(users.iter().map(|user| &user.metrics));
        let engine = self.engine.clone();
        let seed = config.seed;
        let secs = config.timeout_secs;
        let worker_population = population.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            engine.analyze(&worker_population, &mut rng)
        });

        let outcome = match tokio::time::timeout(Duration::from_secs(secs), worker).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => {
                return Err(ClusteringUnavailable::Worker(join_error.to_string()))
            }
            Err(_) => return Err(ClusteringUnavailable::TimedOut { secs }),
        };

        Ok(AssignedClusters {
            features: outcome.assignments.into_iter().zip(population.features).collect(),
            clusters: outcome.clusters,
            iterations: outcome.iterations,
            converged: outcome.converged,
        })
    }

    fn emit(&self, event: AuditEvent) {
        self.audit.emit(event);
    }
}

struct AssignedClusters {
    features: Vec<(usize, ClusterFeatures)>,
    clusters: Vec<ClusterAnalysis>,
    iterations: usize,
    converged: bool,
}

fn record(
    results: &mut [Option<Result<UserMetrics, String>>],
    joined: Result<(usize, Result<UserMetrics, String>), tokio::task::JoinError>,
) {
    match joined {
        Ok((index, outcome)) => {
            if let Some(slot) = results.get_mut(index) {
                *slot = Some(outcome);
            }
        }
        Err(error) => {
            warn!(event_name = "cohort.metrics.task_failed", error = %error, "metrics task failed")
        }
    }
}
