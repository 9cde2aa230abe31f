use std::collections::HashMap;

use tokio::sync::RwLock;

use cohortly_core::domain::order::{Order, OrderId, OrderStatus};
use cohortly_core::domain::user::{CohortAssignment, User, UserId};

use super::{OrderRepository, RepositoryError, UserRepository};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let wanted = email.trim().to_ascii_lowercase();
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email == wanted).cloned())
    }

    async fn find_active(&self) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut active: Vec<User> = users.values().filter(|user| user.is_active).cloned().collect();
        active.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(active)
    }

    async fn count_active(&self) -> Result<u64, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().filter(|user| user.is_active).count() as u64)
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user.clone());
        Ok(())
    }

    async fn save_cohort_assignment(
        &self,
        assignment: &CohortAssignment,
    ) -> Result<bool, RepositoryError> {
        let mut users = self.users.write().await;
        match users.get_mut(&assignment.user_id.0) {
            Some(user) => {
                assignment.apply_to(user);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        statuses: &[OrderStatus],
        ascending: bool,
    ) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|order| &order.user_id == user_id && statuses.contains(&order.status))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            left.order_date.cmp(&right.order_date).then_with(|| left.id.0.cmp(&right.id.0))
        });
        if !ascending {
            matching.reverse();
        }
        Ok(matching)
    }

    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.0.clone(), order.clone());
        Ok(())
    }
}
