use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::order::{Order, OrderStatus};
use crate::domain::user::{CohortAssignment, User, UserId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored record could not be decoded: {0}")]
    Malformed(String),
    #[error("write rejected for user {0}")]
    Rejected(UserId),
    #[error("user {0} no longer exists")]
    Missing(UserId),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

/// Persistence collaborator the cohort engine reads from and writes to.
#[async_trait]
pub trait CohortStore: Send + Sync {
    async fn find_orders_by_user(
        &self,
        user_id: &UserId,
        statuses: &[OrderStatus],
        ascending: bool,
    ) -> Result<Vec<Order>, StoreError>;

    async fn find_active_users(&self) -> Result<Vec<User>, StoreError>;

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError>;

    /// Writes only the cohort-owned fields of an existing user; never inserts.
    async fn save_cohort_assignment(
        &self,
        assignment: &CohortAssignment,
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryCohortStore {
    users: RwLock<HashMap<UserId, User>>,
    orders: RwLock<Vec<Order>>,
    rejected_saves: RwLock<HashSet<UserId>>,
    unavailable: RwLock<bool>,
}

impl InMemoryCohortStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_order(&self, order: Order) {
        self.orders.write().await.push(order);
    }

    pub async fn user(&self, user_id: &UserId) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }

    /// Makes every subsequent assignment write for `user_id` fail.
    pub async fn reject_saves_for(&self, user_id: UserId) {
        self.rejected_saves.write().await.insert(user_id);
    }

    pub async fn remove_user(&self, user_id: &UserId) {
        self.users.write().await.remove(user_id);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    async fn ensure_available(&self) -> Result<(), StoreError> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CohortStore for InMemoryCohortStore {
    async fn find_orders_by_user(
        &self,
        user_id: &UserId,
        statuses: &[OrderStatus],
        ascending: bool,
    ) -> Result<Vec<Order>, StoreError> {
        self.ensure_available().await?;
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .iter()
            .filter(|order| &order.user_id == user_id && statuses.contains(&order.status))
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.order_date);
        if !ascending {
            orders.reverse();
        }
        Ok(orders)
    }

    async fn find_active_users(&self) -> Result<Vec<User>, StoreError> {
        self.ensure_available().await?;
        let mut users: Vec<User> =
            self.users.read().await.values().filter(|user| user.is_active).cloned().collect();
        users.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(users)
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        self.ensure_available().await?;
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn save_cohort_assignment(
        &self,
        assignment: &CohortAssignment,
    ) -> Result<(), StoreError> {
        self.ensure_available().await?;
        if self.rejected_saves.read().await.contains(&assignment.user_id) {
            return Err(StoreError::Rejected(assignment.user_id.clone()));
        }
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&assignment.user_id)
            .ok_or_else(|| StoreError::Missing(assignment.user_id.clone()))?;
        assignment.apply_to(user);
        Ok(())
    }
}
