pub mod audit;
pub mod clock;
pub mod cohort;
pub mod config;
pub mod domain;
pub mod errors;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use cohort::{
    BatchSummary, BehaviorInsights, ClusterAnalysis, CohortAnalytics, CohortOrchestrator,
    CohortStatistics, CohortStore, CohortThresholds, CohortTypes, ClusteringConfig, DailyTrend,
    InMemoryCohortStore, OrderTrendFilter, RuleClassifier, StoreError, UserError,
};
pub use config::AppConfig;
pub use domain::order::{Order, OrderId, OrderItem, OrderStatus};
pub use domain::user::{
    ClusterData, ClusterFeatures, Cohort, CohortAssignment, User, UserId, UserMetrics,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
