//! State persistence layer
//!
//! Responsible for storing and loading budgets, comments and users.
//! In-memory for development and tests; Postgres when a database URL is set.

use crate::error::LedgerError;
use crate::models::{Budget, Comment, NewBudget, User};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod postgres;
pub use postgres::PostgresStore;

/// Trait for budget and comment persistence
#[async_trait::async_trait]
pub trait BudgetStore: Send + Sync {
    async fn insert_budget(&self, budget: NewBudget) -> Result<Budget>;
    async fn list_budgets(&self) -> Result<Vec<Budget>>;
    async fn count_budgets(&self) -> Result<usize>;
    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>>;

    /// Atomically add `amount` to the department's spending and overwrite the
    /// vendor when one is given. `None` when no budget has that department.
    async fn apply_expense(
        &self,
        department: &str,
        amount: f64,
        vendor: Option<&str>,
    ) -> Result<Option<Budget>>;

    /// Store the comment and append it to its budget as one unit.
    /// Fails with `NotFound` and stores nothing when the budget is missing.
    async fn append_comment(&self, comment: Comment) -> Result<Comment>;

    async fn list_comments(&self, budget_id: Uuid) -> Result<Vec<Comment>>;
    async fn list_all_comments(&self) -> Result<Vec<Comment>>;
}

/// Trait for user persistence
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the email is already registered
    async fn insert_user(&self, user: User) -> Result<User>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;
}

/// Everything the service needs from a back-end
pub trait Store: BudgetStore + UserStore {}

impl<T: BudgetStore + UserStore> Store for T {}

#[derive(Default)]
struct LedgerTables {
    /// Insertion order doubles as iteration order
    budgets: Vec<Budget>,
    comments: HashMap<Uuid, Comment>,
}

/// In-memory store for development and tests
pub struct InMemoryStore {
    ledger: Arc<RwLock<LedgerTables>>,
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(RwLock::new(LedgerTables::default())),
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BudgetStore for InMemoryStore {

    async fn insert_budget(&self, budget: NewBudget) -> Result<Budget> {
        let mut tables = self.ledger.write().await;

        if tables
            .budgets
            .iter()
            .any(|b| b.department == budget.department)
        {
            return Err(LedgerError::Conflict(format!(
                "Department already exists: {}",
                budget.department
            )));
        }

        let record = Budget {
            id: Uuid::new_v4(),
            department: budget.department,
            allocated: budget.allocated,
            spent: budget.spent,
            vendor: None,
            comments: Vec::new(),
        };
        tables.budgets.push(record.clone());
        Ok(record)
    }

    async fn list_budgets(&self) -> Result<Vec<Budget>> {
        let tables = self.ledger.read().await;
        Ok(tables.budgets.clone())
    }

    async fn count_budgets(&self) -> Result<usize> {
        let tables = self.ledger.read().await;
        Ok(tables.budgets.len())
    }

    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>> {
        let tables = self.ledger.read().await;
        Ok(tables.budgets.iter().find(|b| b.id == budget_id).cloned())
    }

    async fn apply_expense(
        &self,
        department: &str,
        amount: f64,
        vendor: Option<&str>,
    ) -> Result<Option<Budget>> {
        // Write lock held across read-modify-write
        let mut tables = self.ledger.write().await;

        let Some(budget) = tables
            .budgets
            .iter_mut()
            .find(|b| b.department == department)
        else {
            return Ok(None);
        };

        let spent = budget.spent + amount;
        if !spent.is_finite() {
            return Err(LedgerError::InvalidInput(format!(
                "Expense of {} would overflow spent for {}",
                amount, department
            )));
        }

        budget.spent = spent;
        if let Some(vendor) = vendor {
            budget.vendor = Some(vendor.to_string());
        }

        Ok(Some(budget.clone()))
    }

    async fn append_comment(&self, comment: Comment) -> Result<Comment> {
        let mut tables = self.ledger.write().await;

        let Some(budget) = tables
            .budgets
            .iter_mut()
            .find(|b| b.id == comment.budget_id)
        else {
            return Err(LedgerError::NotFound(format!(
                "Budget not found: {}",
                comment.budget_id
            )));
        };

        budget.comments.push(comment.id);
        tables.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn list_comments(&self, budget_id: Uuid) -> Result<Vec<Comment>> {
        let tables = self.ledger.read().await;

        let Some(budget) = tables.budgets.iter().find(|b| b.id == budget_id) else {
            return Ok(Vec::new());
        };

        Ok(budget
            .comments
            .iter()
            .filter_map(|id| tables.comments.get(id))
            .cloned()
            .collect())
    }

    async fn list_all_comments(&self) -> Result<Vec<Comment>> {
        let tables = self.ledger.read().await;

        Ok(tables
            .budgets
            .iter()
            .flat_map(|b| b.comments.iter())
            .filter_map(|id| tables.comments.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryStore {

    async fn insert_user(&self, user: User) -> Result<User> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.email == user.email) {
            return Err(LedgerError::Conflict(format!(
                "Email already registered: {}",
                user.email
            )));
        }

        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).cloned())
    }
}
