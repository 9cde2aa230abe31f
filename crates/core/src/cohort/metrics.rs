use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::clock::whole_days_between;
use crate::cohort::{round2, round_money};
use crate::domain::order::Order;
use crate::domain::user::UserMetrics;
use crate::errors::DomainError;

/// Average days per month used to turn order counts into a monthly rate.
pub const DAYS_PER_MONTH: f64 = 30.44;

/// Derives a user's behavioral metrics from their order history as of `now`.
///
/// Non-qualifying orders are ignored. With no qualifying orders the zero record is returned.
pub fn derive_metrics(orders: &[Order], now: DateTime<Utc>) -> Result<UserMetrics, DomainError> {
    let mut qualifying: Vec<&Order> =
        orders.iter().filter(|order| order.status.is_qualifying()).collect();
    if qualifying.is_empty() {
        return Ok(UserMetrics::default());
    }
    qualifying.sort_by_key(|order| order.order_date);

    let mut total_spent = Decimal::ZERO;
    let mut total_items: u64 = 0;
    for order in &qualifying {
        validate_order(order)?;
        total_spent += order.total_amount;
        total_items += order.total_items();
    }

    let total_orders = u32::try_from(qualifying.len()).map_err(|_| {
        DomainError::InvariantViolation(format!("order count {} overflows", qualifying.len()))
    })?;

    let (first, last) = match (qualifying.first(), qualifying.last()) {
        (Some(first), Some(last)) => (first.order_date, last.order_date),
        _ => return Ok(UserMetrics::default()),
    };

    let days_since_first_order = whole_days_between(first, now);
    let days_since_last_order = whole_days_between(last, now);

    let orders_f64 = f64::from(total_orders);
    let months_active = (days_since_first_order as f64 / DAYS_PER_MONTH).max(1.0);

    Ok(UserMetrics {
        total_orders,
        total_spent,
        avg_cart_value: round_money(total_spent / Decimal::from(total_orders)),
        avg_items_per_order: round2(total_items as f64 / orders_f64),
        order_frequency: round2(orders_f64 / months_active),
        days_since_last_order: Some(days_since_last_order),
        days_since_first_order: Some(days_since_first_order),
        lifetime_value: total_spent,
        first_order_date: Some(first),
        last_order_date: Some(last),
    })
}

fn validate_order(order: &Order) -> Result<(), DomainError> {
    if order.total_amount < Decimal::ZERO {
        return Err(DomainError::NegativeOrderAmount { order_id: order.id.clone() });
    }
    if order.items.iter().any(|item| item.quantity == 0) {
        return Err(DomainError::ZeroQuantityItem { order_id: order.id.clone() });
    }
    Ok(())
}
