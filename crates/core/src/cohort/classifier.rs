use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::whole_days_between;
use crate::domain::user::{Cohort, UserMetrics};

/// Business-rule thresholds shared by the classifier and cluster naming.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortThresholds {
    pub high_spender_amount: Decimal,
    pub frequent_buyer_orders_per_month: f64,
    pub bulk_buyer_items_per_order: f64,
    pub loyal_customer_min_orders: u32,
    pub at_risk_days: i64,
    pub inactive_days: i64,
    pub new_customer_days: i64,
}

impl Default for CohortThresholds {
    fn default() -> Self {
        Self {
            high_spender_amount: Decimal::new(2000, 0),
            frequent_buyer_orders_per_month: 3.0,
            bulk_buyer_items_per_order: 5.0,
            loyal_customer_min_orders: 10,
            at_risk_days: 30,
            inactive_days: 90,
            new_customer_days: 7,
        }
    }
}

/// Ordered decision list mapping metrics to exactly one cohort. First match wins.
#[derive(Clone, Debug, Default)]
pub struct RuleClassifier {
    thresholds: CohortThresholds,
}

impl RuleClassifier {
    pub fn new(thresholds: CohortThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &CohortThresholds {
        &self.thresholds
    }

    pub fn classify(
        &self,
        metrics: &UserMetrics,
        registration_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Cohort {
        let t = &self.thresholds;

        if whole_days_between(registration_date, now) <= t.new_customer_days {
            return Cohort::NewCustomer;
        }
        if metrics.total_orders == 0 {
            return Cohort::NewCustomer;
        }

        let recency = metrics.days_since_last_order;
        if recency.is_some_and(|days| days > t.inactive_days) {
            return Cohort::Inactive;
        }
        if recency.is_some_and(|days| days > t.at_risk_days) {
            return Cohort::AtRisk;
        }
        if metrics.avg_cart_value > t.high_spender_amount {
            return Cohort::HighSpender;
        }
        if metrics.total_orders >= t.loyal_customer_min_orders
            && recency.is_some_and(|days| days <= t.at_risk_days)
        {
            return Cohort::LoyalCustomer;
        }
        if metrics.order_frequency > t.frequent_buyer_orders_per_month {
            return Cohort::FrequentBuyer;
        }
        if metrics.avg_items_per_order > t.bulk_buyer_items_per_order {
            return Cohort::BulkBuyer;
        }
        Cohort::RegularCustomer
    }
}
