//! Read-only aggregations over persisted cohort assignments and metrics.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cohort::{round2, round_money, CohortThresholds};
use crate::domain::order::Order;
use crate::domain::user::{Cohort, User, UserId};

pub const DEFAULT_TOP_SEGMENTS: usize = 5;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortSummary {
    pub count: usize,
    pub percentage: f64,
    pub avg_lifetime_value: Decimal,
    pub avg_cart_value: Decimal,
    pub avg_order_frequency: f64,
    pub total_revenue: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortStatistics {
    pub total_users: usize,
    pub cohorts: BTreeMap<Cohort, CohortSummary>,
    pub total_revenue: Decimal,
}

impl CohortStatistics {
    /// Cohorts by descending size, ties by label order.
    pub fn ordered(&self) -> Vec<(Cohort, &CohortSummary)> {
        let mut rows: Vec<(Cohort, &CohortSummary)> =
            self.cohorts.iter().map(|(cohort, summary)| (*cohort, summary)).collect();
        rows.sort_by(|left, right| right.1.count.cmp(&left.1.count).then(left.0.cmp(&right.0)));
        rows
    }
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    revenue: Decimal,
    cart_value: Decimal,
    frequency: f64,
    orders: u64,
}

impl Accumulator {
    fn add(&mut self, user: &User) {
        self.count += 1;
        self.revenue += user.metrics.lifetime_value;
        self.cart_value += user.metrics.avg_cart_value;
        self.frequency += user.metrics.order_frequency;
        self.orders += u64::from(user.metrics.total_orders);
    }

    fn avg_decimal(&self, total: Decimal) -> Decimal {
        if self.count == 0 {
            return Decimal::ZERO;
        }
        round_money(total / Decimal::from(self.count))
    }

    fn avg_lifetime_value(&self) -> Decimal {
        self.avg_decimal(self.revenue)
    }

    fn avg_cart_value(&self) -> Decimal {
        self.avg_decimal(self.cart_value)
    }

    fn avg_frequency(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        round2(self.frequency / self.count as f64)
    }

    fn avg_orders(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        round2(self.orders as f64 / self.count as f64)
    }
}

fn by_cohort<'a>(users: impl IntoIterator<Item = &'a User>) -> BTreeMap<Cohort, Accumulator> {
    let mut groups: BTreeMap<Cohort, Accumulator> = BTreeMap::new();
    for user in users {
        groups.entry(user.cohort).or_default().add(user);
    }
    groups
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

pub fn cohort_statistics(users: &[User]) -> CohortStatistics {
    let total_users = users.len();
    let groups = by_cohort(users);
    let total_revenue = groups.values().map(|group| group.revenue).sum();
    let cohorts = groups
        .into_iter()
        .map(|(cohort, group)| {
            let summary = CohortSummary {
                count: group.count,
                percentage: percentage(group.count, total_users),
                avg_lifetime_value: group.avg_lifetime_value(),
                avg_cart_value: group.avg_cart_value(),
                avg_order_frequency: group.avg_frequency(),
                total_revenue: group.revenue,
            };
            (cohort, summary)
        })
        .collect();

    CohortStatistics { total_users, cohorts, total_revenue }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortRevenue {
    pub cohort: Cohort,
    pub user_count: usize,
    pub total_revenue: Decimal,
    pub avg_lifetime_value: Decimal,
    pub avg_cart_value: Decimal,
    pub total_orders: u64,
    pub revenue_per_user: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueTotals {
    pub total_users: usize,
    pub total_revenue: Decimal,
    pub total_orders: u64,
    pub avg_revenue_per_user: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueAnalysis {
    pub cohorts: Vec<CohortRevenue>,
    pub totals: RevenueTotals,
}

pub fn revenue_analysis(users: &[User]) -> RevenueAnalysis {
    let mut cohorts: Vec<CohortRevenue> = by_cohort(users)
        .into_iter()
        .map(|(cohort, group)| CohortRevenue {
            cohort,
            user_count: group.count,
            total_revenue: group.revenue,
            avg_lifetime_value: group.avg_lifetime_value(),
            avg_cart_value: group.avg_cart_value(),
            total_orders: group.orders,
            revenue_per_user: group.avg_lifetime_value(),
        })
        .collect();
    cohorts.sort_by(|left, right| right.total_revenue.cmp(&left.total_revenue));

    let total_revenue: Decimal = cohorts.iter().map(|row| row.total_revenue).sum();
    let total_orders = cohorts.iter().map(|row| row.total_orders).sum();
    let avg_revenue_per_user = if users.is_empty() {
        Decimal::ZERO
    } else {
        round_money(total_revenue / Decimal::from(users.len()))
    };

    RevenueAnalysis {
        cohorts,
        totals: RevenueTotals {
            total_users: users.len(),
            total_revenue,
            total_orders,
            avg_revenue_per_user,
        },
    }
}

/// Lifetime-value bucket boundaries; the last bucket is open-ended.
pub const CLV_BOUNDARIES: [i64; 7] = [0, 1_000, 5_000, 10_000, 25_000, 50_000, 100_000];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClvBucket {
    pub range: String,
    pub lower: Decimal,
    pub upper: Option<Decimal>,
    pub user_count: usize,
    pub total_revenue: Decimal,
    pub avg_orders: f64,
    pub cohorts: BTreeMap<Cohort, usize>,
}

pub fn clv_distribution(users: &[User]) -> Vec<ClvBucket> {
    let mut buckets: Vec<(Accumulator, BTreeMap<Cohort, usize>)> =
        CLV_BOUNDARIES.iter().map(|_| (Accumulator::default(), BTreeMap::new())).collect();

    for user in users {
        let value = user.metrics.lifetime_value;
        let index = CLV_BOUNDARIES
            .iter()
            .rposition(|lower| value >= Decimal::from(*lower))
            .unwrap_or(0);
        let (group, cohorts) = &mut buckets[index];
        group.add(user);
        *cohorts.entry(user.cohort).or_default() += 1;
    }

    buckets
        .into_iter()
        .enumerate()
        .filter(|(_, (group, _))| group.count > 0)
        .map(|(index, (group, cohorts))| {
            let lower = CLV_BOUNDARIES[index];
            let upper = CLV_BOUNDARIES.get(index + 1).copied();
            let range = match upper {
                Some(upper) => format!("{lower}-{upper}"),
                None => format!("{lower}+"),
            };
            ClvBucket {
                range,
                lower: Decimal::from(lower),
                upper: upper.map(Decimal::from),
                user_count: group.count,
                total_revenue: group.revenue,
                avg_orders: group.avg_orders(),
                cohorts,
            }
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChurnRisk {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "Low Risk")]
    Low,
    Active,
}

impl ChurnRisk {
    /// Users without orders are not scored as churn risks.
    pub fn for_recency(days_since_last_order: Option<i64>) -> Self {
        match days_since_last_order {
            Some(days) if days >= 90 => Self::High,
            Some(days) if days >= 60 => Self::Medium,
            Some(days) if days >= 30 => Self::Low,
            _ => Self::Active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChurnBucket {
    pub risk: ChurnRisk,
    pub user_count: usize,
    pub avg_lifetime_value: Decimal,
    pub revenue_at_risk: Decimal,
    pub cohorts: BTreeMap<Cohort, usize>,
}

pub fn churn_risk_analysis(users: &[User]) -> Vec<ChurnBucket> {
    let mut buckets: BTreeMap<ChurnRisk, (Accumulator, BTreeMap<Cohort, usize>)> = BTreeMap::new();
    for user in users {
        let (group, cohorts) =
            buckets.entry(ChurnRisk::for_recency(user.metrics.days_since_last_order)).or_default();
        group.add(user);
        *cohorts.entry(user.cohort).or_default() += 1;
    }

    buckets
        .into_iter()
        .map(|(risk, (group, cohorts))| ChurnBucket {
            risk,
            user_count: group.count,
            avg_lifetime_value: group.avg_lifetime_value(),
            revenue_at_risk: group.revenue,
            cohorts,
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentValue {
    pub cohort: Cohort,
    pub user_count: usize,
    pub avg_lifetime_value: Decimal,
    pub total_revenue: Decimal,
    pub avg_order_frequency: f64,
}

pub fn top_segments(users: &[User], limit: usize) -> Vec<SegmentValue> {
    let mut segments: Vec<SegmentValue> = by_cohort(users)
        .into_iter()
        .map(|(cohort, group)| SegmentValue {
            cohort,
            user_count: group.count,
            avg_lifetime_value: group.avg_lifetime_value(),
            total_revenue: group.revenue,
            avg_order_frequency: group.avg_frequency(),
        })
        .collect();
    segments.sort_by(|left, right| right.avg_lifetime_value.cmp(&left.avg_lifetime_value));
    segments.truncate(limit);
    segments
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortPage {
    pub cohort: Cohort,
    pub users: Vec<User>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// One page of a cohort's members, highest lifetime value first. `page` is 1-based.
pub fn users_in_cohort(users: &[User], cohort: Cohort, page: usize, limit: usize) -> CohortPage {
    let page = page.max(1);
    let limit = limit.max(1);
    let mut members: Vec<&User> = users.iter().filter(|user| user.cohort == cohort).collect();
    members.sort_by(|left, right| {
        right.metrics.lifetime_value.cmp(&left.metrics.lifetime_value).then(left.id.cmp(&right.id))
    });

    let total = members.len();
    let users = members
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .cloned()
        .collect();

    CohortPage { cohort, users, page, limit, total, total_pages: total.div_ceil(limit) }
}

fn average(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    round_money(total / Decimal::from(count))
}

/// Orders whose owner is in `users`, paired with that owner's cohort.
fn orders_by_cohort<'a>(
    users: &[User],
    orders: &'a [Order],
) -> impl Iterator<Item = (Cohort, &'a Order)> {
    let cohorts: HashMap<UserId, Cohort> =
        users.iter().map(|user| (user.id.clone(), user.cohort)).collect();
    orders
        .iter()
        .filter_map(move |order| cohorts.get(&order.user_id).map(|cohort| (*cohort, order)))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryPreference {
    pub category: String,
    pub total_quantity: u64,
    pub total_revenue: Decimal,
    /// Distinct orders containing at least one item of the category.
    pub order_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortCategories {
    pub cohort: Cohort,
    pub categories: Vec<CategoryPreference>,
}

/// Item categories bought by each cohort, highest item revenue first.
pub fn category_preferences(users: &[User], orders: &[Order]) -> Vec<CohortCategories> {
    let mut groups: BTreeMap<Cohort, BTreeMap<&str, (u64, Decimal, BTreeSet<&str>)>> =
        BTreeMap::new();
    for (cohort, order) in orders_by_cohort(users, orders) {
        let categories = groups.entry(cohort).or_default();
        for item in &order.items {
            let (quantity, revenue, seen) = categories.entry(item.category.as_str()).or_default();
            *quantity += u64::from(item.quantity);
            *revenue += item.unit_price * Decimal::from(item.quantity);
            seen.insert(order.id.0.as_str());
        }
    }

    groups
        .into_iter()
        .map(|(cohort, categories)| {
            let mut categories: Vec<CategoryPreference> = categories
                .into_iter()
                .map(|(category, (total_quantity, total_revenue, seen))| CategoryPreference {
                    category: category.to_string(),
                    total_quantity,
                    total_revenue: round_money(total_revenue),
                    order_count: seen.len(),
                })
                .collect();
            categories.sort_by(|left, right| {
                right
                    .total_revenue
                    .cmp(&left.total_revenue)
                    .then_with(|| left.category.cmp(&right.category))
            });
            CohortCategories { cohort, categories }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTrend {
    pub year: i32,
    pub month: u32,
    pub total_orders: usize,
    pub total_revenue: Decimal,
    pub avg_order_value: Decimal,
}

/// Calendar-month (UTC) order volume, oldest month first.
pub fn seasonal_trends(users: &[User], orders: &[Order]) -> Vec<MonthlyTrend> {
    let mut months: BTreeMap<(i32, u32), (usize, Decimal)> = BTreeMap::new();
    for (_, order) in orders_by_cohort(users, orders) {
        let date = order.order_date.date_naive();
        let (count, revenue) = months.entry((date.year(), date.month())).or_default();
        *count += 1;
        *revenue += order.total_amount;
    }

    months
        .into_iter()
        .map(|((year, month), (total_orders, revenue))| MonthlyTrend {
            year,
            month,
            total_orders,
            total_revenue: round_money(revenue),
            avg_order_value: average(revenue, total_orders),
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorInsights {
    pub top_performing_segments: Vec<SegmentValue>,
    pub category_preferences: Vec<CohortCategories>,
    pub seasonal_trends: Vec<MonthlyTrend>,
}

pub fn behavior_insights(users: &[User], orders: &[Order]) -> BehaviorInsights {
    BehaviorInsights {
        top_performing_segments: top_segments(users, DEFAULT_TOP_SEGMENTS),
        category_preferences: category_preferences(users, orders),
        seasonal_trends: seasonal_trends(users, orders),
    }
}

/// Restricts [`order_trends`]. Bounds are inclusive and apply independently.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderTrendFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub cohort: Option<Cohort>,
}

impl OrderTrendFilter {
    fn admits(&self, cohort: Cohort, order: &Order) -> bool {
        !matches!(self.start, Some(start) if order.order_date < start)
            && !matches!(self.end, Some(end) if order.order_date > end)
            && !matches!(self.cohort, Some(wanted) if wanted != cohort)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub total_orders: usize,
    pub total_revenue: Decimal,
    pub avg_order_value: Decimal,
    pub total_items: u64,
    pub unique_customers: usize,
}

/// Per-day (UTC) order volume and revenue, oldest day first.
pub fn order_trends(
    users: &[User],
    orders: &[Order],
    filter: &OrderTrendFilter,
) -> Vec<DailyTrend> {
    let mut days: BTreeMap<NaiveDate, (usize, Decimal, u64, BTreeSet<&UserId>)> = BTreeMap::new();
    for (cohort, order) in orders_by_cohort(users, orders) {
        if !filter.admits(cohort, order) {
            continue;
        }
        let (count, revenue, items, customers) =
            days.entry(order.order_date.date_naive()).or_default();
        *count += 1;
        *revenue += order.total_amount;
        *items += order.total_items();
        customers.insert(&order.user_id);
    }

    days
        .into_iter()
        .map(|(date, (total_orders, revenue, total_items, customers))| DailyTrend {
            date,
            total_orders,
            total_revenue: round_money(revenue),
            avg_order_value: average(revenue, total_orders),
            total_items,
            unique_customers: customers.len(),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortDefinition {
    pub cohort: Cohort,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortTypes {
    pub cohort_types: Vec<CohortDefinition>,
    pub thresholds: CohortThresholds,
    pub description: String,
}

/// Every cohort in rule order with the thresholds that currently decide membership.
pub fn cohort_types(thresholds: &CohortThresholds) -> CohortTypes {
    CohortTypes {
        cohort_types: Cohort::ALL
            .into_iter()
            .map(|cohort| CohortDefinition {
                cohort,
                description: cohort.description().to_string(),
            })
            .collect(),
        thresholds: thresholds.clone(),
        description: "Available cohort types and their business rules".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortAnalytics {
    pub overview: CohortStatistics,
    pub revenue: RevenueAnalysis,
    pub clv_distribution: Vec<ClvBucket>,
    pub behavior_insights: BehaviorInsights,
    pub churn_risk: Vec<ChurnBucket>,
    pub top_segments: Vec<SegmentValue>,
    pub generated_at: DateTime<Utc>,
}

impl CohortAnalytics {
    /// `orders` are joined to `users` by owner; orders of other users are ignored.
    pub fn from_population(users: &[User], orders: &[Order], generated_at: DateTime<Utc>) -> Self {
        Self {
            overview: cohort_statistics(users),
            revenue: revenue_analysis(users),
            clv_distribution: clv_distribution(users),
            behavior_insights: behavior_insights(users, orders),
            churn_risk: churn_risk_analysis(users),
            top_segments: top_segments(users, DEFAULT_TOP_SEGMENTS),
            generated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        category_preferences, churn_risk_analysis, clv_distribution, cohort_statistics,
        cohort_types, order_trends, revenue_analysis, seasonal_trends, top_segments,
        users_in_cohort, ChurnRisk, CohortAnalytics, OrderTrendFilter,
    };
    use crate::cohort::CohortThresholds;
    use crate::domain::order::{Order, OrderId, OrderItem, OrderStatus};
    use crate::domain::user::{Cohort, User, UserId, UserMetrics};

    fn user(id: &str, cohort: Cohort, ltv: i64, orders: u32, recency: Option<i64>) -> User {
        let registered = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut user = User::new(id, id, format!("{id}@example.com"), registered);
        user.cohort = cohort;
        user.metrics = UserMetrics {
            total_orders: orders,
            total_spent: Decimal::new(ltv, 0),
            lifetime_value: Decimal::new(ltv, 0),
            avg_cart_value: if orders == 0 {
                Decimal::ZERO
            } else {
                Decimal::new(ltv, 0) / Decimal::from(orders)
            },
            order_frequency: f64::from(orders) / 4.0,
            days_since_last_order: recency,
            ..UserMetrics::default()
        };
        user
    }

    fn population() -> Vec<User> {
        vec![
            user("U-1", Cohort::HighSpender, 30_000, 12, Some(10)),
            user("U-2", Cohort::HighSpender, 12_000, 4, Some(20)),
            user("U-3", Cohort::RegularCustomer, 600, 3, Some(12)),
            user("U-4", Cohort::Inactive, 900, 2, Some(120)),
            user("U-5", Cohort::AtRisk, 2_000, 4, Some(65)),
            user("U-6", Cohort::NewCustomer, 0, 0, None),
        ]
    }

    #[test]
    fn statistics_group_by_cohort_with_percentages() {
        let stats = cohort_statistics(&population());

        assert_eq!(stats.total_users, 6);
        assert_eq!(stats.total_revenue, Decimal::new(45_500, 0));
        let high = &stats.cohorts[&Cohort::HighSpender];
        assert_eq!(high.count, 2);
        assert_eq!(high.percentage, 33.33);
        assert_eq!(high.avg_lifetime_value, Decimal::new(21_000, 0));
        assert_eq!(high.avg_cart_value, Decimal::new(2750, 0));
        assert_eq!(high.avg_order_frequency, 2.0);
        assert_eq!(high.total_revenue, Decimal::new(42_000, 0));
        assert!(!stats.cohorts.contains_key(&Cohort::BulkBuyer));

        let counted: usize = stats.cohorts.values().map(|summary| summary.count).sum();
        assert_eq!(counted, stats.total_users);
        assert_eq!(stats.ordered()[0].0, Cohort::HighSpender);
    }

    #[test]
    fn statistics_over_empty_population_are_zero() {
        let stats = cohort_statistics(&[]);
        assert_eq!(stats.total_users, 0);
        assert!(stats.cohorts.is_empty());
        assert_eq!(stats.total_revenue, Decimal::ZERO);
    }

    #[test]
    fn revenue_is_sorted_descending_with_totals() {
        let revenue = revenue_analysis(&population());

        assert_eq!(revenue.cohorts[0].cohort, Cohort::HighSpender);
        assert_eq!(revenue.cohorts[0].revenue_per_user, Decimal::new(21_000, 0));
        assert_eq!(revenue.totals.total_users, 6);
        assert_eq!(revenue.totals.total_orders, 25);
        assert_eq!(revenue.totals.avg_revenue_per_user, Decimal::new(758_333, 2));
    }

    #[test]
    fn clv_buckets_are_lower_inclusive_and_skip_empty_ranges() {
        let buckets = clv_distribution(&population());
        let ranges: Vec<&str> = buckets.iter().map(|bucket| bucket.range.as_str()).collect();

        assert_eq!(ranges, vec!["0-1000", "1000-5000", "10000-25000", "25000-50000"]);
        assert_eq!(buckets[0].user_count, 3);
        assert_eq!(buckets[1].user_count, 1);
        assert_eq!(buckets[1].cohorts.get(&Cohort::AtRisk), Some(&1));
        assert_eq!(buckets[3].upper, Some(Decimal::new(50_000, 0)));
    }

    #[test]
    fn churn_buckets_follow_recency() {
        assert_eq!(ChurnRisk::for_recency(Some(90)), ChurnRisk::High);
        assert_eq!(ChurnRisk::for_recency(Some(60)), ChurnRisk::Medium);
        assert_eq!(ChurnRisk::for_recency(Some(30)), ChurnRisk::Low);
        assert_eq!(ChurnRisk::for_recency(Some(29)), ChurnRisk::Active);
        assert_eq!(ChurnRisk::for_recency(None), ChurnRisk::Active);

        let buckets = churn_risk_analysis(&population());
        let high = buckets.iter().find(|bucket| bucket.risk == ChurnRisk::High).expect("high");
        assert_eq!(high.user_count, 1);
        assert_eq!(high.revenue_at_risk, Decimal::new(900, 0));
        let active = buckets.iter().find(|bucket| bucket.risk == ChurnRisk::Active).expect("active");
        assert_eq!(active.user_count, 4);
    }

    #[test]
    fn top_segments_rank_by_lifetime_value() {
        let segments = top_segments(&population(), 2);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].cohort, Cohort::HighSpender);
        assert_eq!(segments[1].cohort, Cohort::AtRisk);
    }

    #[test]
    fn cohort_pages_are_ordered_by_lifetime_value() {
        let users = population();
        let first = users_in_cohort(&users, Cohort::HighSpender, 1, 1);
        assert_eq!(first.total, 2);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.users[0].id.0, "U-1");

        let second = users_in_cohort(&users, Cohort::HighSpender, 2, 1);
        assert_eq!(second.users[0].id.0, "U-2");

        let beyond = users_in_cohort(&users, Cohort::HighSpender, 5, 1);
        assert!(beyond.users.is_empty());

        let clamped = users_in_cohort(&users, Cohort::BulkBuyer, 0, 0);
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.limit, 1);
        assert_eq!(clamped.total_pages, 0);
    }

    fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, month, day, hour, 0, 0).unwrap()
    }

    fn item(category: &str, quantity: u32, unit_price: i64) -> OrderItem {
        OrderItem {
            product_id: format!("PROD-{category}"),
            product_name: format!("{category} item"),
            category: category.to_string(),
            quantity,
            unit_price: Decimal::new(unit_price, 0),
        }
    }

    fn order(id: &str, user_id: &str, order_date: DateTime<Utc>, items: Vec<OrderItem>) -> Order {
        let total_amount =
            items.iter().map(|item| item.unit_price * Decimal::from(item.quantity)).sum();
        Order {
            id: OrderId(id.to_string()),
            user_id: UserId(user_id.to_string()),
            items,
            total_amount,
            status: OrderStatus::Delivered,
            order_date,
        }
    }

    fn orders() -> Vec<Order> {
        vec![
            order(
                "O-1",
                "U-1",
                at(4, 3, 9),
                vec![item("Electronics", 1, 2_000), item("Books", 2, 15)],
            ),
            order("O-2", "U-1", at(4, 3, 18), vec![item("Electronics", 1, 1_000)]),
            order("O-3", "U-2", at(5, 20, 11), vec![item("Fashion", 3, 50)]),
            order("O-4", "U-3", at(4, 3, 12), vec![item("Books", 1, 20)]),
            order("O-5", "U-404", at(4, 3, 12), vec![item("Toys", 9, 10)]),
        ]
    }

    #[test]
    fn category_preferences_rank_categories_within_each_cohort() {
        let preferences = category_preferences(&population(), &orders());

        let cohorts: Vec<Cohort> = preferences.iter().map(|entry| entry.cohort).collect();
        assert_eq!(cohorts, vec![Cohort::HighSpender, Cohort::RegularCustomer]);

        let high = &preferences[0].categories;
        let names: Vec<&str> = high.iter().map(|entry| entry.category.as_str()).collect();
        assert_eq!(names, vec!["Electronics", "Fashion", "Books"]);
        assert_eq!(high[0].total_quantity, 2);
        assert_eq!(high[0].total_revenue, Decimal::new(3_000, 0));
        assert_eq!(high[0].order_count, 2);
        assert_eq!(high[2].total_revenue, Decimal::new(30, 0));
        assert_eq!(high[2].order_count, 1);
    }

    #[test]
    fn seasonal_trends_group_by_calendar_month() {
        let trends = seasonal_trends(&population(), &orders());

        assert_eq!(trends.len(), 2);
        assert_eq!((trends[0].year, trends[0].month), (2026, 4));
        assert_eq!(trends[0].total_orders, 3);
        assert_eq!(trends[0].total_revenue, Decimal::new(3_050, 0));
        assert_eq!(trends[0].avg_order_value, Decimal::new(101_667, 2));
        assert_eq!((trends[1].month, trends[1].total_orders), (5, 1));
    }

    #[test]
    fn order_trends_are_daily_and_honor_filters() {
        let users = population();
        let orders = orders();

        let all = order_trends(&users, &orders, &OrderTrendFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].date, NaiveDate::from_ymd_opt(2026, 4, 3).unwrap());
        assert_eq!(all[0].total_orders, 3);
        assert_eq!(all[0].total_items, 5);
        assert_eq!(all[0].unique_customers, 2);

        let regular = OrderTrendFilter {
            cohort: Some(Cohort::RegularCustomer),
            ..OrderTrendFilter::default()
        };
        let trends = order_trends(&users, &orders, &regular);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].total_revenue, Decimal::new(20, 0));

        let window = OrderTrendFilter {
            start: Some(at(4, 3, 12)),
            end: Some(at(5, 1, 0)),
            cohort: None,
        };
        let trends = order_trends(&users, &orders, &window);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].total_orders, 2);
        assert_eq!(trends[0].avg_order_value, Decimal::new(510, 0));
    }

    #[test]
    fn cohort_types_list_every_cohort_with_thresholds() {
        let thresholds = CohortThresholds::default();
        let types = cohort_types(&thresholds);

        assert_eq!(types.cohort_types.len(), Cohort::ALL.len());
        assert_eq!(types.cohort_types[0].cohort, Cohort::HighSpender);
        assert_eq!(types.cohort_types[4].description, "Customers who haven't ordered recently");
        assert_eq!(types.thresholds, thresholds);
    }

    #[test]
    fn analytics_bundle_combines_every_view() {
        let generated_at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let analytics = CohortAnalytics::from_population(&population(), &orders(), generated_at);

        assert_eq!(analytics.overview.total_users, 6);
        assert!(analytics.top_segments.len() <= 5);
        assert_eq!(analytics.behavior_insights.top_performing_segments, analytics.top_segments);
        assert_eq!(analytics.behavior_insights.seasonal_trends.len(), 2);
        assert_eq!(analytics.generated_at, generated_at);
    }
}
