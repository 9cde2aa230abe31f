//! Cohort assignment engine: metrics derivation, rule classification,
//! feature normalization, k-means clustering and the batch orchestrator.

pub mod classifier;
pub mod cluster;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod statistics;
pub mod store;

use rust_decimal::{Decimal, RoundingStrategy};

pub use classifier::{CohortThresholds, RuleClassifier};
pub use cluster::{
    ClusterAnalysis, ClusterCharacteristics, ClusterEngine, ClusterName, ClusteringConfig,
    ClusteringOutcome, ClusteringUnavailable,
};
pub use metrics::derive_metrics;
pub use normalize::{FeatureNormalizer, NormalizedPopulation, PopulationStats};
pub use orchestrator::{BatchSummary, CohortOrchestrator, UserError};
pub use statistics::{
    BehaviorInsights, CohortAnalytics, CohortStatistics, CohortSummary, CohortTypes, DailyTrend,
    OrderTrendFilter,
};
pub use store::{CohortStore, InMemoryCohortStore, StoreError};

/// Rounds half away from zero to two decimals.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
