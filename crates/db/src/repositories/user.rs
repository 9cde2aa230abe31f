use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cohortly_core::domain::user::{
    ClusterData, ClusterFeatures, Cohort, CohortAssignment, User, UserId, UserMetrics,
};

use super::{
    decode_decimal, decode_optional_timestamp, decode_timestamp, encode_timestamp,
    RepositoryError, UserRepository,
};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, registration_date, cohort, total_orders, total_spent,
    avg_cart_value, avg_items_per_order, order_frequency, days_since_last_order,
    days_since_first_order, lifetime_value, first_order_date, last_order_date, cluster_id,
    normalized_cart_value, normalized_frequency, normalized_recency, normalized_lifetime_value,
    is_active, last_cohort_update";

const ASSIGNMENT_COLUMNS: &str = "cohort = ?, total_orders = ?, total_spent = ?,
    avg_cart_value = ?, avg_items_per_order = ?, order_frequency = ?, days_since_last_order = ?,
    days_since_first_order = ?, lifetime_value = ?, first_order_date = ?, last_order_date = ?,
    last_cohort_update = ?, updated_at = ?";

const CLUSTER_COLUMNS: &str = "cluster_id = ?, normalized_cart_value = ?,
    normalized_frequency = ?, normalized_recency = ?, normalized_lifetime_value = ?";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let cohort_label: String = get(row, "cohort")?;
    let cohort = Cohort::parse(&cohort_label)
        .ok_or_else(|| RepositoryError::Decode(format!("cohort: unknown `{cohort_label}`")))?;

    let total_orders: i64 = get(row, "total_orders")?;
    let total_orders = u32::try_from(total_orders)
        .map_err(|_| RepositoryError::Decode(format!("total_orders: {total_orders}")))?;

    let metrics = UserMetrics {
        total_orders,
        total_spent: decode_decimal("total_spent", &get::<String>(row, "total_spent")?)?,
        avg_cart_value: decode_decimal("avg_cart_value", &get::<String>(row, "avg_cart_value")?)?,
        avg_items_per_order: get(row, "avg_items_per_order")?,
        order_frequency: get(row, "order_frequency")?,
        days_since_last_order: get(row, "days_since_last_order")?,
        days_since_first_order: get(row, "days_since_first_order")?,
        lifetime_value: decode_decimal("lifetime_value", &get::<String>(row, "lifetime_value")?)?,
        first_order_date: decode_optional_timestamp(
            "first_order_date",
            get(row, "first_order_date")?,
        )?,
        last_order_date: decode_optional_timestamp("last_order_date", get(row, "last_order_date")?)?,
    };

    let cluster_id: Option<i64> = get(row, "cluster_id")?;
    let features = (
        get::<Option<f64>>(row, "normalized_cart_value")?,
        get::<Option<f64>>(row, "normalized_frequency")?,
        get::<Option<f64>>(row, "normalized_recency")?,
        get::<Option<f64>>(row, "normalized_lifetime_value")?,
    );
    let cluster_data = match features {
        (Some(cart), Some(frequency), Some(recency), Some(lifetime_value)) => Some(ClusterData {
            cluster_id: cluster_id.and_then(|id| usize::try_from(id).ok()),
            features: ClusterFeatures {
                normalized_cart_value: cart,
                normalized_frequency: frequency,
                normalized_recency: recency,
                normalized_lifetime_value: lifetime_value,
            },
        }),
        _ => None,
    };

    let registration_date: String = get(row, "registration_date")?;

    Ok(User {
        id: UserId(get(row, "id")?),
        name: get(row, "name")?,
        email: get(row, "email")?,
        registration_date: decode_timestamp("registration_date", &registration_date)?,
        cohort,
        metrics,
        cluster_data,
        is_active: get::<i64>(row, "is_active")? != 0,
        last_cohort_update: decode_optional_timestamp(
            "last_cohort_update",
            get(row, "last_cohort_update")?,
        )?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email.trim().to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_active(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn count_active(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let metrics = &user.metrics;
        let features = user.cluster_data.as_ref().map(|data| data.features);
        let cluster_id = user
            .cluster_data
            .as_ref()
            .and_then(|data| data.cluster_id)
            .and_then(|id| i64::try_from(id).ok());
        let now = encode_timestamp(&Utc::now());

        sqlx::query(
            "INSERT INTO users (id, name, email, registration_date, cohort, total_orders,
                                total_spent, avg_cart_value, avg_items_per_order, order_frequency,
                                days_since_last_order, days_since_first_order, lifetime_value,
                                first_order_date, last_order_date, cluster_id,
                                normalized_cart_value, normalized_frequency, normalized_recency,
                                normalized_lifetime_value, is_active, last_cohort_update,
                                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 registration_date = excluded.registration_date,
                 cohort = excluded.cohort,
                 total_orders = excluded.total_orders,
                 total_spent = excluded.total_spent,
                 avg_cart_value = excluded.avg_cart_value,
                 avg_items_per_order = excluded.avg_items_per_order,
                 order_frequency = excluded.order_frequency,
                 days_since_last_order = excluded.days_since_last_order,
                 days_since_first_order = excluded.days_since_first_order,
                 lifetime_value = excluded.lifetime_value,
                 first_order_date = excluded.first_order_date,
                 last_order_date = excluded.last_order_date,
                 cluster_id = excluded.cluster_id,
                 normalized_cart_value = excluded.normalized_cart_value,
                 normalized_frequency = excluded.normalized_frequency,
                 normalized_recency = excluded.normalized_recency,
                 normalized_lifetime_value = excluded.normalized_lifetime_value,
                 is_active = excluded.is_active,
                 last_cohort_update = excluded.last_cohort_update,
                 updated_at = excluded.updated_at",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.email)
        .bind(encode_timestamp(&user.registration_date))
        .bind(user.cohort.label())
        .bind(i64::from(metrics.total_orders))
        .bind(metrics.total_spent.to_string())
        .bind(metrics.avg_cart_value.to_string())
        .bind(metrics.avg_items_per_order)
        .bind(metrics.order_frequency)
        .bind(metrics.days_since_last_order)
        .bind(metrics.days_since_first_order)
        .bind(metrics.lifetime_value.to_string())
        .bind(metrics.first_order_date.as_ref().map(encode_timestamp))
        .bind(metrics.last_order_date.as_ref().map(encode_timestamp))
        .bind(cluster_id)
        .bind(features.map(|f| f.normalized_cart_value))
        .bind(features.map(|f| f.normalized_frequency))
        .bind(features.map(|f| f.normalized_recency))
        .bind(features.map(|f| f.normalized_lifetime_value))
        .bind(i64::from(user.is_active))
        .bind(user.last_cohort_update.as_ref().map(encode_timestamp))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_cohort_assignment(
        &self,
        assignment: &CohortAssignment,
    ) -> Result<bool, RepositoryError> {
        let sql = match assignment.cluster_data {
            Some(_) => {
                format!("UPDATE users SET {ASSIGNMENT_COLUMNS}, {CLUSTER_COLUMNS} WHERE id = ?")
            }
            None => format!("UPDATE users SET {ASSIGNMENT_COLUMNS} WHERE id = ?"),
        };
        let metrics = &assignment.metrics;

        let mut query = sqlx::query(&sql)
            .bind(assignment.cohort.label())
            .bind(i64::from(metrics.total_orders))
            .bind(metrics.total_spent.to_string())
            .bind(metrics.avg_cart_value.to_string())
            .bind(metrics.avg_items_per_order)
            .bind(metrics.order_frequency)
            .bind(metrics.days_since_last_order)
            .bind(metrics.days_since_first_order)
            .bind(metrics.lifetime_value.to_string())
            .bind(metrics.first_order_date.as_ref().map(encode_timestamp))
            .bind(metrics.last_order_date.as_ref().map(encode_timestamp))
            .bind(encode_timestamp(&assignment.assigned_at))
            .bind(encode_timestamp(&Utc::now()));
        if let Some(cluster) = &assignment.cluster_data {
            query = query
                .bind(cluster.cluster_id.and_then(|id| i64::try_from(id).ok()))
                .bind(cluster.features.normalized_cart_value)
                .bind(cluster.features.normalized_frequency)
                .bind(cluster.features.normalized_recency)
                .bind(cluster.features.normalized_lifetime_value);
        }

        let result = query.bind(&assignment.user_id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
