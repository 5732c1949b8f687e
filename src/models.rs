//! Core data models for the budget ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::Currency;

//
// ================= Budget =================
//

/// One department's allocated vs. spent record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: Uuid,
    pub department: String,
    pub allocated: f64,
    pub spent: f64,
    pub vendor: Option<String>,
    /// Comment ids in creation order
    #[serde(default)]
    pub comments: Vec<Uuid>,
}

impl Budget {
    pub fn is_over_budget(&self) -> bool {
        self.spent > self.allocated
    }
}

/// Fields required to create a budget record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBudget {
    pub department: String,
    pub allocated: f64,
    pub spent: f64,
}

//
// ================= Comment =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub text: String,
    pub author_id: Uuid,
    pub budget_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(budget_id: Uuid, author_id: Uuid, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            author_id,
            budget_id,
            created_at: Utc::now(),
        }
    }
}

//
// ================= User =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The part of a user that is safe to hand out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

//
// ================= Read Views =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: Uuid,
    pub text: String,
    pub budget_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user: PublicUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetView {
    pub id: Uuid,
    pub department: String,
    pub allocated: f64,
    pub spent: f64,
    pub vendor: Option<String>,
    pub over_budget: bool,
    pub currency: Currency,
    pub comments: Vec<CommentView>,
}

/// A budget whose spending exceeds its allocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub budget_id: Uuid,
    pub department: String,
    pub allocated: f64,
    pub spent: f64,
    pub overrun: f64,
}

impl Anomaly {
    pub fn from_budget(budget: &Budget) -> Option<Self> {
        if !budget.is_over_budget() {
            return None;
        }
        Some(Self {
            budget_id: budget.id,
            department: budget.department.clone(),
            allocated: budget.allocated,
            spent: budget.spent,
            overrun: budget.spent - budget.allocated,
        })
    }

    /// Human-readable alert line
    pub fn alert(&self) -> String {
        format!(
            "Budget overrun in {}: allocated {}, spent {} (over by {})",
            self.department, self.allocated, self.spent, self.overrun
        )
    }
}

//
// ================= Assistant Context =================
//

/// Budget figures handed to the conversational assistant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetContext {
    pub department: String,
    pub allocated: f64,
    pub spent: f64,
    #[serde(default)]
    pub vendor: Option<String>,
}

impl From<&Budget> for BudgetContext {
    fn from(budget: &Budget) -> Self {
        Self {
            department: budget.department.clone(),
            allocated: budget.allocated,
            spent: budget.spent,
            vendor: budget.vendor.clone(),
        }
    }
}
