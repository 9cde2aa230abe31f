use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Behavioral segment assigned by the rule classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Cohort {
    #[serde(rename = "High Spender")]
    HighSpender,
    #[serde(rename = "Frequent Buyer")]
    FrequentBuyer,
    #[serde(rename = "Bulk Buyer")]
    BulkBuyer,
    #[serde(rename = "Loyal Customer")]
    LoyalCustomer,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Inactive")]
    Inactive,
    #[serde(rename = "Regular Customer")]
    RegularCustomer,
    #[default]
    #[serde(rename = "New Customer")]
    NewCustomer,
}

impl Cohort {
    pub const ALL: [Cohort; 8] = [
        Cohort::HighSpender,
        Cohort::FrequentBuyer,
        Cohort::BulkBuyer,
        Cohort::LoyalCustomer,
        Cohort::AtRisk,
        Cohort::Inactive,
        Cohort::RegularCustomer,
        Cohort::NewCustomer,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::HighSpender => "High Spender",
            Self::FrequentBuyer => "Frequent Buyer",
            Self::BulkBuyer => "Bulk Buyer",
            Self::LoyalCustomer => "Loyal Customer",
            Self::AtRisk => "At Risk",
            Self::Inactive => "Inactive",
            Self::RegularCustomer => "Regular Customer",
            Self::NewCustomer => "New Customer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::HighSpender => "Customers with high average cart values",
            Self::FrequentBuyer => "Customers who place orders regularly",
            Self::BulkBuyer => "Customers who buy many items per order",
            Self::LoyalCustomer => "Long-term customers with consistent engagement",
            Self::AtRisk => "Customers who haven't ordered recently",
            Self::Inactive => "Customers with no recent activity",
            Self::RegularCustomer => "Standard customers with moderate activity",
            Self::NewCustomer => "Recently registered customers",
        }
    }

    /// Accepts the display label ("At Risk") or a slug ("at-risk", "at_risk").
    pub fn parse(value: &str) -> Option<Self> {
        let wanted: String = value
            .trim()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .map(|ch| ch.to_ascii_lowercase())
            .collect();
        Self::ALL.into_iter().find(|cohort| {
            let candidate: String = cohort
                .label()
                .chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .map(|ch| ch.to_ascii_lowercase())
                .collect();
            candidate == wanted
        })
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-user behavioral metrics derived from qualifying orders.
///
/// `Default` is the zero record used for users without qualifying orders.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetrics {
    pub total_orders: u32,
    pub total_spent: Decimal,
    pub avg_cart_value: Decimal,
    pub avg_items_per_order: f64,
    /// Orders per month.
    pub order_frequency: f64,
    pub days_since_last_order: Option<i64>,
    pub days_since_first_order: Option<i64>,
    pub lifetime_value: Decimal,
    pub first_order_date: Option<DateTime<Utc>>,
    pub last_order_date: Option<DateTime<Utc>>,
}

impl UserMetrics {
    pub fn has_orders(&self) -> bool {
        self.total_orders > 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterFeatures {
    pub normalized_cart_value: f64,
    pub normalized_frequency: f64,
    pub normalized_recency: f64,
    pub normalized_lifetime_value: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterData {
    pub cluster_id: Option<usize>,
    pub features: ClusterFeatures,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub registration_date: DateTime<Utc>,
    pub cohort: Cohort,
    pub metrics: UserMetrics,
    pub cluster_data: Option<ClusterData>,
    pub is_active: bool,
    pub last_cohort_update: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        registration_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UserId(id.into()),
            name: name.into(),
            email: email.into().trim().to_ascii_lowercase(),
            registration_date,
            cohort: Cohort::default(),
            metrics: UserMetrics::default(),
            cluster_data: None,
            is_active: true,
            last_cohort_update: None,
        }
    }
}

/// The fields a cohort run owns on a user record. Profile fields are never part of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortAssignment {
    pub user_id: UserId,
    pub cohort: Cohort,
    pub metrics: UserMetrics,
    /// `None` leaves the stored cluster placement untouched.
    pub cluster_data: Option<ClusterData>,
    pub assigned_at: DateTime<Utc>,
}

impl CohortAssignment {
    pub fn apply_to(&self, user: &mut User) {
        user.cohort = self.cohort;
        user.metrics = self.metrics.clone();
        if let Some(cluster_data) = &self.cluster_data {
            user.cluster_data = Some(cluster_data.clone());
        }
        user.last_cohort_update = Some(self.assigned_at);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Cohort, User, UserMetrics};

    #[test]
    fn new_users_start_as_new_customers_with_zero_metrics() {
        let user = User::new("U-1", "Asha Rao", "  Asha.Rao@Example.com ", Utc::now());

        assert_eq!(user.cohort, Cohort::NewCustomer);
        assert_eq!(user.metrics, UserMetrics::default());
        assert_eq!(user.email, "asha.rao@example.com");
        assert!(user.is_active);
        assert!(user.cluster_data.is_none());
    }

    #[test]
    fn cohort_parse_accepts_labels_and_slugs() {
        assert_eq!(Cohort::parse("High Spender"), Some(Cohort::HighSpender));
        assert_eq!(Cohort::parse("at-risk"), Some(Cohort::AtRisk));
        assert_eq!(Cohort::parse("loyal_customer"), Some(Cohort::LoyalCustomer));
        assert_eq!(Cohort::parse("whale"), None);
    }

    #[test]
    fn cohort_serializes_as_display_label() {
        let json = serde_json::to_string(&Cohort::RegularCustomer).expect("serialize cohort");
        assert_eq!(json, "\"Regular Customer\"");

        let parsed: Cohort = serde_json::from_str("\"At Risk\"").expect("deserialize cohort");
        assert_eq!(parsed, Cohort::AtRisk);
    }
}
