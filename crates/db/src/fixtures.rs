use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use sqlx::Executor;
use tracing::info;

use cohortly_core::domain::order::{Order, OrderId, OrderItem, OrderStatus};
use cohortly_core::domain::user::User;

use crate::connection::DbPool;
use crate::repositories::{
    OrderRepository, RepositoryError, SqlOrderRepository, SqlUserRepository, UserRepository,
};

struct Product {
    name: &'static str,
    category: &'static str,
    base_price: i64,
}

const PRODUCTS: &[Product] = &[
    Product { name: "Smartphone", category: "Electronics", base_price: 15_000 },
    Product { name: "Laptop", category: "Electronics", base_price: 45_000 },
    Product { name: "Headphones", category: "Electronics", base_price: 2_000 },
    Product { name: "Smart Watch", category: "Electronics", base_price: 8_000 },
    Product { name: "Tablet", category: "Electronics", base_price: 25_000 },
    Product { name: "T-Shirt", category: "Clothing", base_price: 500 },
    Product { name: "Jeans", category: "Clothing", base_price: 1_200 },
    Product { name: "Dress", category: "Clothing", base_price: 1_500 },
    Product { name: "Shoes", category: "Clothing", base_price: 2_500 },
    Product { name: "Jacket", category: "Clothing", base_price: 3_000 },
    Product { name: "Coffee Maker", category: "Home & Garden", base_price: 3_500 },
    Product { name: "Vacuum Cleaner", category: "Home & Garden", base_price: 8_000 },
    Product { name: "Bedsheet Set", category: "Home & Garden", base_price: 1_000 },
    Product { name: "Garden Tools", category: "Home & Garden", base_price: 1_500 },
    Product { name: "Kitchen Knife Set", category: "Home & Garden", base_price: 2_000 },
    Product { name: "Programming Book", category: "Books", base_price: 800 },
    Product { name: "Novel", category: "Books", base_price: 300 },
    Product { name: "Cookbook", category: "Books", base_price: 600 },
    Product { name: "Self-Help Book", category: "Books", base_price: 400 },
    Product { name: "Biography", category: "Books", base_price: 500 },
    Product { name: "Cricket Bat", category: "Sports & Outdoors", base_price: 2_500 },
    Product { name: "Football", category: "Sports & Outdoors", base_price: 800 },
    Product { name: "Gym Bag", category: "Sports & Outdoors", base_price: 1_200 },
    Product { name: "Yoga Mat", category: "Sports & Outdoors", base_price: 600 },
    Product { name: "Dumbbells", category: "Sports & Outdoors", base_price: 1_500 },
];

const NAMES: &[&str] = &[
    "Aarav Sharma",
    "Vivaan Patel",
    "Aditya Singh",
    "Vihaan Kumar",
    "Arjun Gupta",
    "Sai Reddy",
    "Reyansh Agarwal",
    "Ayaan Shah",
    "Krishna Jain",
    "Ishaan Mishra",
    "Saanvi Sharma",
    "Ananya Patel",
    "Diya Singh",
    "Pihu Kumar",
    "Priya Gupta",
    "Anvi Reddy",
    "Kavya Agarwal",
    "Meera Iyer",
    "Riya Verma",
    "Nisha Tiwari",
];

const EMAIL_DOMAINS: &[&str] =
    &["gmail.com", "yahoo.com", "hotmail.com", "outlook.com", "rediffmail.com"];

const SEED_STATUSES: &[OrderStatus] = &[
    OrderStatus::Delivered,
    OrderStatus::Shipped,
    OrderStatus::Processing,
    OrderStatus::Cancelled,
];

const CANCELLED_ONLY: &[OrderStatus] = &[OrderStatus::Cancelled];

/// Shape of one behavioral segment in the demo population.
struct SegmentProfile {
    segment: &'static str,
    users: usize,
    min_orders: usize,
    max_orders: usize,
    /// Registration window, in days before `now`.
    registered_days_ago: (i64, i64),
    /// Orders are placed no later than this many days before `now`.
    quiet_days: i64,
    /// Unit price multiplier, in tenths.
    price_tenths: i64,
    items_per_order: (usize, usize),
    quantity: (u32, u32),
    statuses: &'static [OrderStatus],
}

const SEGMENTS: &[SegmentProfile] = &[
    SegmentProfile {
        segment: "high_spender",
        users: 10,
        min_orders: 8,
        max_orders: 25,
        registered_days_ago: (120, 600),
        quiet_days: 0,
        price_tenths: 15,
        items_per_order: (1, 8),
        quantity: (1, 5),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "frequent_buyer",
        users: 15,
        min_orders: 5,
        max_orders: 15,
        registered_days_ago: (120, 600),
        quiet_days: 0,
        price_tenths: 10,
        items_per_order: (1, 8),
        quantity: (1, 5),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "bulk_buyer",
        users: 10,
        min_orders: 3,
        max_orders: 8,
        registered_days_ago: (120, 600),
        quiet_days: 0,
        price_tenths: 10,
        items_per_order: (4, 8),
        quantity: (2, 5),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "regular",
        users: 40,
        min_orders: 2,
        max_orders: 8,
        registered_days_ago: (120, 600),
        quiet_days: 0,
        price_tenths: 10,
        items_per_order: (1, 8),
        quantity: (1, 5),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "lapsing",
        users: 10,
        min_orders: 2,
        max_orders: 6,
        registered_days_ago: (150, 400),
        quiet_days: 35,
        price_tenths: 10,
        items_per_order: (1, 4),
        quantity: (1, 3),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "inactive",
        users: 20,
        min_orders: 1,
        max_orders: 4,
        registered_days_ago: (450, 650),
        quiet_days: 200,
        price_tenths: 10,
        items_per_order: (1, 8),
        quantity: (1, 5),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "new",
        users: 15,
        min_orders: 0,
        max_orders: 3,
        registered_days_ago: (0, 90),
        quiet_days: 0,
        price_tenths: 10,
        items_per_order: (1, 8),
        quantity: (1, 5),
        statuses: SEED_STATUSES,
    },
    SegmentProfile {
        segment: "cancelled_only",
        users: 5,
        min_orders: 1,
        max_orders: 3,
        registered_days_ago: (30, 300),
        quiet_days: 0,
        price_tenths: 10,
        items_per_order: (1, 4),
        quantity: (1, 3),
        statuses: CANCELLED_ONLY,
    },
];

/// Deterministic demo population for local runs and integration tests.
///
/// All dates are relative to `now`, so the same seed always yields the same
/// cohort mix no matter when the dataset is generated.
pub struct DemoDataset {
    seed: u64,
    now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DemoData {
    pub users: Vec<User>,
    pub orders: Vec<Order>,
    /// Segment name of each user, parallel to `users`.
    pub segments: Vec<&'static str>,
}

impl DemoData {
    pub fn users_in_segment(&self, segment: &str) -> Vec<&User> {
        self.users
            .iter()
            .zip(&self.segments)
            .filter(|(_, name)| **name == segment)
            .map(|(user, _)| user)
            .collect()
    }
}

impl DemoDataset {
    pub const DEFAULT_SEED: u64 = 42;

    pub fn new(now: DateTime<Utc>) -> Self {
        Self { seed: Self::DEFAULT_SEED, now }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn expected_users() -> usize {
        SEGMENTS.iter().map(|segment| segment.users).sum()
    }

    pub fn generate(&self) -> DemoData {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut users = Vec::with_capacity(Self::expected_users());
        let mut orders = Vec::new();
        let mut segments = Vec::with_capacity(Self::expected_users());

        for profile in SEGMENTS {
            for _ in 0..profile.users {
                let index = users.len() + 1;
                let user = self.generate_user(&mut rng, profile, index);
                let order_count = rng.gen_range(profile.min_orders..=profile.max_orders);
                for sequence in 1..=order_count {
                    orders.push(self.generate_order(&mut rng, profile, &user, sequence));
                }
                users.push(user);
                segments.push(profile.segment);
            }
        }

        DemoData { users, orders, segments }
    }

    fn generate_user(&self, rng: &mut StdRng, profile: &SegmentProfile, index: usize) -> User {
        let name = NAMES[rng.gen_range(0..NAMES.len())];
        let domain = EMAIL_DOMAINS[rng.gen_range(0..EMAIL_DOMAINS.len())];
        let email = format!("{}{index}@{domain}", name.to_ascii_lowercase().replace(' ', "."));
        let (newest, oldest) = profile.registered_days_ago;
        let registered = random_between(
            rng,
            self.now - Duration::days(oldest),
            self.now - Duration::days(newest),
        );

        User::new(format!("usr-{index:04}"), name, email, registered)
    }

    fn generate_order(
        &self,
        rng: &mut StdRng,
        profile: &SegmentProfile,
        user: &User,
        sequence: usize,
    ) -> Order {
        let latest = (self.now - Duration::days(profile.quiet_days)).max(user.registration_date);
        let order_date = random_between(rng, user.registration_date, latest);

        let (min_items, max_items) = profile.items_per_order;
        let item_count = rng.gen_range(min_items..=max_items);
        let mut items = Vec::with_capacity(item_count);
        let mut subtotal: i64 = 0;
        for _ in 0..item_count {
            let product = &PRODUCTS[rng.gen_range(0..PRODUCTS.len())];
            let quantity: u32 = rng.gen_range(profile.quantity.0..=profile.quantity.1);
            let jitter = rng.gen_range(-(product.base_price * 3 / 10)..=product.base_price / 2);
            let unit_price = (product.base_price + jitter) * profile.price_tenths / 10;
            subtotal += unit_price * i64::from(quantity);
            items.push(OrderItem {
                product_id: format!("PROD{}", rng.gen_range(1000..=9999)),
                product_name: product.name.to_string(),
                category: product.category.to_string(),
                quantity,
                unit_price: Decimal::from(unit_price),
            });
        }

        // 0-15% discount, 18% GST, flat shipping on small baskets.
        let discount = rng.gen_range(0..=subtotal * 15 / 100);
        let tax = (subtotal - discount) * 18 / 100;
        let shipping = if subtotal > 500 { 0 } else { rng.gen_range(50..=150) };

        Order {
            id: OrderId(format!("ord-{}-{sequence:02}", user.id.0.trim_start_matches("usr-"))),
            user_id: user.id.clone(),
            items,
            total_amount: Decimal::from(subtotal - discount + tax + shipping),
            status: profile.statuses[rng.gen_range(0..profile.statuses.len())],
            order_date,
        }
    }

    /// Replaces all users and orders with the generated population.
    pub async fn load(&self, pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let data = self.generate();
        Self::clean(pool).await?;

        let users = SqlUserRepository::new(pool.clone());
        for user in &data.users {
            users.save(user).await?;
        }
        let orders = SqlOrderRepository::new(pool.clone());
        for order in &data.orders {
            orders.save(order).await?;
        }

        let segments = SEGMENTS
            .iter()
            .map(|profile| SegmentSeedInfo { segment: profile.segment, users: profile.users })
            .collect::<Vec<_>>();
        info!(
            users = data.users.len(),
            orders = data.orders.len(),
            seed = self.seed,
            "demo dataset loaded"
        );

        Ok(SeedResult {
            users_seeded: data.users.len(),
            orders_seeded: data.orders.len(),
            items_seeded: data.orders.iter().map(|order| order.items.len()).sum(),
            segments,
        })
    }

    /// Verify that the stored rows match what this dataset generates.
    pub async fn verify(&self, pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let data = self.generate();
        let mut checks = Vec::new();

        let user_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users")
            .fetch_one(pool)
            .await?;
        checks.push(("users", user_count as usize == data.users.len()));

        let order_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM orders")
            .fetch_one(pool)
            .await?;
        checks.push(("orders", order_count as usize == data.orders.len()));

        let item_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM order_items")
            .fetch_one(pool)
            .await?;
        let expected_items: usize = data.orders.iter().map(|order| order.items.len()).sum();
        checks.push(("order-items", item_count as usize == expected_items));

        let distinct_emails: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT email) FROM users")
            .fetch_one(pool)
            .await?;
        checks.push(("unique-emails", distinct_emails == user_count));

        let orphaned_orders: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM orders o LEFT JOIN users u ON u.id = o.user_id WHERE u.id IS NULL",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("order-owners", orphaned_orders == 0));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query("DELETE FROM order_items")).await?;
        tx.execute(sqlx::query("DELETE FROM orders")).await?;
        tx.execute(sqlx::query("DELETE FROM users")).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn random_between(rng: &mut StdRng, start: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    let span = (end - start).num_seconds().max(0);
    start + Duration::seconds(rng.gen_range(0..=span))
}

#[derive(Debug)]
pub struct SeedResult {
    pub users_seeded: usize,
    pub orders_seeded: usize,
    pub items_seeded: usize,
    pub segments: Vec<SegmentSeedInfo>,
}

#[derive(Debug)]
pub struct SegmentSeedInfo {
    pub segment: &'static str,
    pub users: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
