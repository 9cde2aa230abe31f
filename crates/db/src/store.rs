use async_trait::async_trait;
use tracing::warn;

use cohortly_core::cohort::{CohortStore, StoreError};
use cohortly_core::domain::order::{Order, OrderStatus};
use cohortly_core::domain::user::{CohortAssignment, User, UserId};

use crate::repositories::{
    OrderRepository, RepositoryError, SqlOrderRepository, SqlUserRepository, UserRepository,
};
use crate::DbPool;

/// Adapts a user and an order repository to the cohort engine's store seam.
pub struct RepositoryCohortStore<U, O> {
    users: U,
    orders: O,
}

pub type SqlCohortStore = RepositoryCohortStore<SqlUserRepository, SqlOrderRepository>;

impl<U, O> RepositoryCohortStore<U, O>
where
    U: UserRepository,
    O: OrderRepository,
{
    pub fn new(users: U, orders: O) -> Self {
        Self { users, orders }
    }

    pub fn users(&self) -> &U {
        &self.users
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }
}

impl SqlCohortStore {
    pub fn sqlite(pool: DbPool) -> Self {
        Self::new(SqlUserRepository::new(pool.clone()), SqlOrderRepository::new(pool))
    }
}

fn store_error(error: RepositoryError) -> StoreError {
    match error {
        RepositoryError::Database(source) => StoreError::Unavailable(source.to_string()),
        RepositoryError::Decode(detail) => StoreError::Malformed(detail),
        RepositoryError::NotFound(detail) => StoreError::Unavailable(detail),
    }
}

#[async_trait]
impl<U, O> CohortStore for RepositoryCohortStore<U, O>
where
    U: UserRepository,
    O: OrderRepository,
{
    async fn find_orders_by_user(
        &self,
        user_id: &UserId,
        statuses: &[OrderStatus],
        ascending: bool,
    ) -> Result<Vec<Order>, StoreError> {
        self.orders.find_by_user(user_id, statuses, ascending).await.map_err(store_error)
    }

    async fn find_active_users(&self) -> Result<Vec<User>, StoreError> {
        self.users.find_active().await.map_err(store_error)
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<User>, StoreError> {
        self.users.find_by_id(user_id).await.map_err(store_error)
    }

    async fn save_cohort_assignment(
        &self,
        assignment: &CohortAssignment,
    ) -> Result<(), StoreError> {
        let user_id = &assignment.user_id;
        match self.users.save_cohort_assignment(assignment).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(user_id = %user_id, "user disappeared before its cohort could be written");
                Err(StoreError::Missing(user_id.clone()))
            }
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "failed to persist cohort assignment");
                Err(match error {
                    RepositoryError::Database(_) => StoreError::Rejected(user_id.clone()),
                    other => store_error(other),
                })
            }
        }
    }
}
