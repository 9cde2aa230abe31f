use std::collections::HashMap;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cohortly_core::domain::order::{Order, OrderId, OrderItem, OrderStatus};
use cohortly_core::domain::user::UserId;

use super::{decode_decimal, decode_timestamp, encode_timestamp, OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_items(
        &self,
        order_ids: &[String],
    ) -> Result<HashMap<String, Vec<OrderItem>>, RepositoryError> {
        let mut items: HashMap<String, Vec<OrderItem>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(items);
        }

        let sql = format!(
            "SELECT order_id, product_id, product_name, category, quantity, unit_price
             FROM order_items
             WHERE order_id IN ({})
             ORDER BY order_id ASC, line_number ASC",
            placeholders(order_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in order_ids {
            query = query.bind(id);
        }

        for row in query.fetch_all(&self.pool).await? {
            let order_id: String = decode(&row, "order_id")?;
            items.entry(order_id).or_default().push(row_to_item(&row)?);
        }
        Ok(items)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn decode<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn row_to_item(row: &SqliteRow) -> Result<OrderItem, RepositoryError> {
    let quantity: i64 = decode(row, "quantity")?;
    let unit_price: String = decode(row, "unit_price")?;

    Ok(OrderItem {
        product_id: decode(row, "product_id")?,
        product_name: decode(row, "product_name")?,
        category: decode(row, "category")?,
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode(format!("quantity: {quantity}")))?,
        unit_price: decode_decimal("unit_price", &unit_price)?,
    })
}

fn row_to_order(row: &SqliteRow) -> Result<Order, RepositoryError> {
    let status: String = decode(row, "status")?;
    let total_amount: String = decode(row, "total_amount")?;
    let order_date: String = decode(row, "order_date")?;

    Ok(Order {
        id: OrderId(decode(row, "id")?),
        user_id: UserId(decode(row, "user_id")?),
        items: Vec::new(),
        total_amount: decode_decimal("total_amount", &total_amount)?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("status: unknown `{status}`")))?,
        order_date: decode_timestamp("order_date", &order_date)?,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, total_amount, status, order_date FROM orders WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = row_to_order(&row)?;
        let mut items = self.load_items(std::slice::from_ref(&order.id.0)).await?;
        order.items = items.remove(&order.id.0).unwrap_or_default();
        Ok(Some(order))
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        statuses: &[OrderStatus],
        ascending: bool,
    ) -> Result<Vec<Order>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let direction = if ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT id, user_id, total_amount, status, order_date
             FROM orders
             WHERE user_id = ? AND status IN ({})
             ORDER BY order_date {direction}, id {direction}",
            placeholders(statuses.len())
        );
        let mut query = sqlx::query(&sql).bind(&user_id.0);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<String> = orders.iter().map(|order| order.id.0.clone()).collect();
        let mut items = self.load_items(&ids).await?;
        for order in &mut orders {
            order.items = items.remove(&order.id.0).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        let now = encode_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, user_id, total_amount, status, order_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 user_id = excluded.user_id,
                 total_amount = excluded.total_amount,
                 status = excluded.status,
                 order_date = excluded.order_date,
                 updated_at = excluded.updated_at",
        )
        .bind(&order.id.0)
        .bind(&order.user_id.0)
        .bind(order.total_amount.to_string())
        .bind(order.status.as_str())
        .bind(encode_timestamp(&order.order_date))
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = ?")
            .bind(&order.id.0)
            .execute(&mut *tx)
            .await?;

        for (line_number, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items
                    (order_id, line_number, product_id, product_name, category, quantity, unit_price)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&order.id.0)
            .bind(line_number as i64)
            .bind(&item.product_id)
            .bind(&item.product_name)
            .bind(&item.category)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
