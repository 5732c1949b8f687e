//! Budget ledger
//!
//! Owns the rules for budget records: expense postings, overrun detection,
//! search and comment threads. Persistence is delegated to a `Store`; the
//! ledger itself holds no locks.

pub mod seed;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::currency::Currency;
use crate::error::LedgerError;
use crate::models::{Anomaly, Budget, BudgetView, Comment, CommentView, NewBudget, PublicUser};
use crate::state::{BudgetStore, Store, UserStore};
use crate::Result;

const UNKNOWN_AUTHOR: &str = "unknown";

pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    // =============================
    // Reads
    // =============================

    /// Every budget with its comments resolved, amounts in `currency`
    pub async fn list_budgets(&self, currency: Currency) -> Result<Vec<BudgetView>> {
        let budgets = self.store.list_budgets().await?;
        let comments = self.store.list_all_comments().await?;
        let authors = self.resolve_authors(&comments).await?;

        let mut by_id: HashMap<Uuid, Comment> =
            comments.into_iter().map(|c| (c.id, c)).collect();

        Ok(budgets
            .into_iter()
            .map(|budget| {
                let threads = budget
                    .comments
                    .iter()
                    .filter_map(|id| by_id.remove(id))
                    .map(|c| comment_view(c, &authors))
                    .collect();
                budget_view(budget, threads, currency)
            })
            .collect())
    }

    /// Structured overrun list, recomputed from current figures
    pub async fn anomalies(&self) -> Result<Vec<Anomaly>> {
        let budgets = self.store.list_budgets().await?;
        Ok(budgets.iter().filter_map(Anomaly::from_budget).collect())
    }

    /// One alert line per over-budget department
    pub async fn list_anomalies(&self) -> Result<Vec<String>> {
        let anomalies = self.anomalies().await?;
        if !anomalies.is_empty() {
            debug!(count = anomalies.len(), "Budget anomalies detected");
        }
        Ok(anomalies.iter().map(Anomaly::alert).collect())
    }

    /// Case-insensitive substring match on department or vendor.
    /// A blank query returns every budget.
    pub async fn search(&self, query: &str) -> Result<Vec<Budget>> {
        let budgets = self.store.list_budgets().await?;
        let needle = query.trim().to_lowercase();

        if needle.is_empty() {
            return Ok(budgets);
        }

        Ok(budgets
            .into_iter()
            .filter(|b| {
                b.department.to_lowercase().contains(&needle)
                    || b
                        .vendor
                        .as_deref()
                        .is_some_and(|v| v.to_lowercase().contains(&needle))
            })
            .collect())
    }

    pub async fn list_comments(&self, budget_id: Uuid) -> Result<Vec<CommentView>> {
        if self.store.get_budget(budget_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("Budget not found: {}", budget_id)));
        }

        let comments = self.store.list_comments(budget_id).await?;
        let authors = self.resolve_authors(&comments).await?;

        Ok(comments
            .into_iter()
            .map(|c| comment_view(c, &authors))
            .collect())
    }

    // =============================
    // Writes
    // =============================

    pub async fn post_expense(
        &self,
        department: &str,
        amount: f64,
        vendor: Option<&str>,
    ) -> Result<Budget> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "Expense amount must be a positive number, got {}",
                amount
            )));
        }

        let vendor = vendor.map(str::trim).filter(|v| !v.is_empty());

        let Some(budget) = self.store.apply_expense(department, amount, vendor).await? else {
            warn!(department = %department, "Expense posted to unknown department");
            return Err(LedgerError::NotFound(format!(
                "Department not found: {}",
                department
            )));
        };

        info!(
            department = %budget.department,
            amount,
            spent = budget.spent,
            allocated = budget.allocated,
            "Expense posted"
        );
        if budget.is_over_budget() {
            warn!(department = %budget.department, "Department is over budget");
        }

        Ok(budget)
    }

    pub async fn add_comment(
        &self,
        budget_id: Uuid,
        text: &str,
        author_id: Uuid,
    ) -> Result<Comment> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LedgerError::InvalidInput("Comment text cannot be empty".to_string()));
        }

        let comment = self
            .store
            .append_comment(Comment::new(budget_id, author_id, text.to_string()))
            .await?;

        info!(budget_id = %budget_id, comment_id = %comment.id, "Comment added");
        Ok(comment)
    }

    /// Administrative creation; not reachable over HTTP
    pub async fn create_budget(
        &self,
        department: &str,
        allocated: f64,
        spent: f64,
    ) -> Result<Budget> {
        let department = department.trim();
        if department.is_empty() {
            return Err(LedgerError::InvalidInput("Department cannot be empty".to_string()));
        }
        for (field, value) in [("allocated", allocated), ("spent", spent)] {
            if !value.is_finite() || value < 0.0 {
                return Err(LedgerError::InvalidInput(format!(
                    "{} must be a non-negative number, got {}",
                    field, value
                )));
            }
        }

        self.store
            .insert_budget(NewBudget {
                department: department.to_string(),
                allocated,
                spent,
            })
            .await
    }

    /// Insert `seed` only when the ledger has no budgets; returns how many
    /// were inserted.
    pub async fn seed_if_empty(&self, seed: &[NewBudget]) -> Result<usize> {
        if self.store.count_budgets().await? > 0 {
            return Ok(0);
        }

        info!("No budgets found. Seeding ledger...");
        for budget in seed {
            self.create_budget(&budget.department, budget.allocated, budget.spent)
                .await?;
        }
        info!(count = seed.len(), "Ledger seeded");

        Ok(seed.len())
    }

    async fn resolve_authors(&self, comments: &[Comment]) -> Result<HashMap<Uuid, String>> {
        let mut authors = HashMap::new();
        for comment in comments {
            if authors.contains_key(&comment.author_id) {
                continue;
            }
            let name = self
                .store
                .get_user(comment.author_id)
                .await?
                .map(|u| u.username)
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
            authors.insert(comment.author_id, name);
        }
        Ok(authors)
    }
}

fn comment_view(comment: Comment, authors: &HashMap<Uuid, String>) -> CommentView {
    let username = authors
        .get(&comment.author_id)
        .cloned()
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    CommentView {
        id: comment.id,
        text: comment.text,
        budget_id: comment.budget_id,
        created_at: comment.created_at,
        user: PublicUser {
            id: comment.author_id,
            username,
        },
    }
}

fn budget_view(budget: Budget, comments: Vec<CommentView>, currency: Currency) -> BudgetView {
    BudgetView {
        id: budget.id,
        over_budget: budget.is_over_budget(),
        department: budget.department,
        allocated: currency.from_inr(budget.allocated),
        spent: currency.from_inr(budget.spent),
        vendor: budget.vendor,
        currency,
        comments,
    }
}
