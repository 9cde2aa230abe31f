use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use cohortly_core::domain::order::{Order, OrderId, OrderStatus};
use cohortly_core::domain::user::{CohortAssignment, User, UserId};

pub mod memory;
pub mod order;
pub mod user;

pub use memory::{InMemoryOrderRepository, InMemoryUserRepository};
pub use order::SqlOrderRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// Active users ordered by id.
    async fn find_active(&self) -> Result<Vec<User>, RepositoryError>;
    async fn count_active(&self) -> Result<u64, RepositoryError>;
    async fn save(&self, user: &User) -> Result<(), RepositoryError>;
    /// Updates the cohort-owned columns of an existing user. `Ok(false)` when no row matched.
    async fn save_cohort_assignment(
        &self,
        assignment: &CohortAssignment,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    /// Orders of one user with a status in `statuses`, sorted by order date.
    async fn find_by_user(
        &self,
        user_id: &UserId,
        statuses: &[OrderStatus],
        ascending: bool,
    ) -> Result<Vec<Order>, RepositoryError>;
    async fn save(&self, order: &Order) -> Result<(), RepositoryError>;
}

/// Fixed-width RFC 3339 so that stored timestamps sort lexically.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: `{raw}` ({error})")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| decode_timestamp(column, &value)).transpose()
}

pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("{column}: `{raw}` ({error})")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{decode_decimal, decode_timestamp, encode_timestamp, RepositoryError};

    #[test]
    fn timestamps_are_fixed_width_and_sortable() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 11, 2, 3, 4, 5).unwrap();

        let encoded_early = encode_timestamp(&early);
        let encoded_late = encode_timestamp(&late);

        assert_eq!(encoded_early, "2026-01-02T03:04:05.000000Z");
        assert_eq!(encoded_early.len(), encoded_late.len());
        assert!(encoded_early < encoded_late);
        assert_eq!(decode_timestamp("t", &encoded_early).expect("decode"), early);
    }

    #[test]
    fn malformed_columns_surface_as_decode_errors() {
        assert!(matches!(decode_timestamp("order_date", "yesterday"), Err(RepositoryError::Decode(_))));
        assert!(matches!(decode_decimal("total_amount", "12,50"), Err(RepositoryError::Decode(_))));
        assert_eq!(decode_decimal("total_amount", "12.50").expect("decimal"), Decimal::new(1250, 2));
    }
}
