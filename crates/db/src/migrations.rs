use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

/// Embedded copy of the workspace `migrations/` directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::{run_pending, MIGRATOR};
    use crate::{connect_with_settings, DbPool};

    const COHORT_SCHEMA: [&str; 8] = [
        "idx_order_items_order_id",
        "idx_orders_status",
        "idx_orders_user_date",
        "idx_users_cohort",
        "idx_users_is_active",
        "order_items",
        "orders",
        "users",
    ];

    async fn migrated() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        pool
    }

    /// Name and DDL of every table and index outside sqlx's own bookkeeping.
    async fn schema(pool: &DbPool) -> Vec<(String, String)> {
        sqlx::query_as(
            "SELECT name, IFNULL(sql, '') FROM sqlite_master
             WHERE type IN ('table', 'index')
               AND name NOT LIKE '_sqlx%' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .expect("read sqlite_master")
    }

    async fn count(pool: &DbPool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .expect("count rows")
    }

    #[tokio::test]
    async fn cohort_tables_and_indexes_are_created() {
        let pool = migrated().await;

        let names: Vec<String> = schema(&pool).await.into_iter().map(|(name, _)| name).collect();

        assert_eq!(names, COHORT_SCHEMA);
    }

    #[tokio::test]
    async fn undo_then_rerun_restores_identical_ddl() {
        let pool = migrated().await;
        let before = schema(&pool).await;

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(schema(&pool).await.is_empty());

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(schema(&pool).await, before);
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_orders_and_items() {
        let pool = migrated().await;
        let stamp = "2026-06-01T12:00:00.000000Z";
        sqlx::query(
            "INSERT INTO users (id, name, email, registration_date, created_at, updated_at)
             VALUES ('U-1', 'Tara Bose', 'tara@example.com', ?1, ?1, ?1)",
        )
        .bind(stamp)
        .execute(&pool)
        .await
        .expect("insert user");
        sqlx::query(
            "INSERT INTO orders (id, user_id, total_amount, status, order_date, created_at, updated_at)
             VALUES ('O-1', 'U-1', '42.00', 'delivered', ?1, ?1, ?1)",
        )
        .bind(stamp)
        .execute(&pool)
        .await
        .expect("insert order");
        sqlx::query(
            "INSERT INTO order_items (order_id, line_number, product_id, product_name, category,
                                      quantity, unit_price)
             VALUES ('O-1', 0, 'PROD1002', 'Yoga Mat', 'Sports', 1, '42.00')",
        )
        .execute(&pool)
        .await
        .expect("insert item");

        let (cohort,): (String,) = sqlx::query_as("SELECT cohort FROM users WHERE id = 'U-1'")
            .fetch_one(&pool)
            .await
            .expect("read cohort");
        assert_eq!(cohort, "New Customer");

        sqlx::query("DELETE FROM users WHERE id = 'U-1'").execute(&pool).await.expect("delete");

        assert_eq!(count(&pool, "orders").await, 0);
        assert_eq!(count(&pool, "order_items").await, 0);
    }

    #[tokio::test]
    async fn unknown_order_status_is_refused() {
        let pool = migrated().await;
        sqlx::query(
            "INSERT INTO users (id, name, email, registration_date, created_at, updated_at)
             VALUES ('U-1', 'Tara Bose', 'tara@example.com', 'x', 'x', 'x')",
        )
        .execute(&pool)
        .await
        .expect("insert user");

        let refused = sqlx::query(
            "INSERT INTO orders (id, user_id, total_amount, status, order_date, created_at, updated_at)
             VALUES ('O-1', 'U-1', '10', 'lost', 'x', 'x', 'x')",
        )
        .execute(&pool)
        .await;

        assert!(refused.is_err());
        assert_eq!(count(&pool, "orders").await, 0);
    }
}
