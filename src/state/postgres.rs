//! Postgres-backed store
//!
//! Expense postings are a single `UPDATE ... RETURNING`, so concurrent
//! postings to one department never lose an increment. Comment appends run
//! in a transaction that locks the owning budget row.

use crate::error::LedgerError;
use crate::models::{Budget, Comment, NewBudget, User};
use crate::state::{BudgetStore, UserStore};
use crate::Result;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const NUMERIC_OUT_OF_RANGE: &str = "22003";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS budgets (
      seq BIGSERIAL,
      id UUID PRIMARY KEY,
      department TEXT NOT NULL UNIQUE,
      allocated DOUBLE PRECISION NOT NULL CHECK (allocated >= 0),
      spent DOUBLE PRECISION NOT NULL CHECK (spent >= 0),
      vendor TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
      id UUID PRIMARY KEY,
      username TEXT NOT NULL,
      email TEXT NOT NULL UNIQUE,
      password_hash TEXT NOT NULL,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
      seq BIGSERIAL,
      id UUID PRIMARY KEY,
      budget_id UUID NOT NULL REFERENCES budgets (id) ON DELETE CASCADE,
      author_id UUID NOT NULL,
      text TEXT NOT NULL,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_comments_budget_seq
    ON comments (budget_id, seq);
    "#,
];

pub struct PostgresStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresStore {
    /// Build a lazily-connecting pool; nothing touches the network until the
    /// first query.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| storage_error("Failed to configure postgres pool", e))?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                info!("Postgres schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| storage_error("Failed to initialize ledger schema", e))?;

        Ok(())
    }

    async fn comment_ids_for(&self, budget_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM comments WHERE budget_id = $1 ORDER BY seq ASC")
            .bind(budget_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load comment ids", e))?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(LedgerError::from))
            .collect()
    }
}

fn storage_error(context: &str, err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(format!("{}: {}", context, err))
}

fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(code),
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, UNIQUE_VIOLATION)
}

fn is_out_of_range(err: &sqlx::Error) -> bool {
    has_sqlstate(err, NUMERIC_OUT_OF_RANGE)
}

fn budget_from_row(row: &PgRow, comments: Vec<Uuid>) -> Result<Budget> {
    Ok(Budget {
        id: row.try_get("id")?,
        department: row.try_get("department")?,
        allocated: row.try_get("allocated")?,
        spent: row.try_get("spent")?,
        vendor: row.try_get("vendor")?,
        comments,
    })
}

fn comment_from_row(row: &PgRow) -> Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        author_id: row.try_get("author_id")?,
        budget_id: row.try_get("budget_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl BudgetStore for PostgresStore {

    async fn insert_budget(&self, budget: NewBudget) -> Result<Budget> {
        self.ensure_schema().await?;

        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO budgets (id, department, allocated, spent)
            VALUES ($1, $2, $3, $4)
            RETURNING id, department, allocated, spent, vendor
            "#,
        )
        .bind(id)
        .bind(&budget.department)
        .bind(budget.allocated)
        .bind(budget.spent)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::Conflict(format!("Department already exists: {}", budget.department))
            } else {
                storage_error("Failed to insert budget", e)
            }
        })?;

        budget_from_row(&row, Vec::new())
    }

    async fn list_budgets(&self) -> Result<Vec<Budget>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT id, department, allocated, spent, vendor FROM budgets ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load budgets", e))?;

        let comment_rows = sqlx::query("SELECT id, budget_id FROM comments ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to load comment ids", e))?;

        let mut by_budget: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in &comment_rows {
            let budget_id: Uuid = row.try_get("budget_id")?;
            by_budget.entry(budget_id).or_default().push(row.try_get("id")?);
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                budget_from_row(row, by_budget.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn count_budgets(&self) -> Result<usize> {
        self.ensure_schema().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM budgets")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to count budgets", e))?;

        Ok(count.max(0) as usize)
    }

    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, department, allocated, spent, vendor FROM budgets WHERE id = $1",
        )
        .bind(budget_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load budget", e))?;

        match row {
            Some(row) => {
                let comments = self.comment_ids_for(budget_id).await?;
                Ok(Some(budget_from_row(&row, comments)?))
            }
            None => Ok(None),
        }
    }

    async fn apply_expense(
        &self,
        department: &str,
        amount: f64,
        vendor: Option<&str>,
    ) -> Result<Option<Budget>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            UPDATE budgets
            SET spent = spent + $2,
                vendor = COALESCE($3, vendor)
            WHERE department = $1
            RETURNING id, department, allocated, spent, vendor
            "#,
        )
        .bind(department)
        .bind(amount)
        .bind(vendor)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_out_of_range(&e) {
                LedgerError::InvalidInput(format!(
                    "Expense of {} would overflow spent for {}",
                    amount, department
                ))
            } else {
                storage_error("Failed to apply expense", e)
            }
        })?;

        match row {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let comments = self.comment_ids_for(id).await?;
                Ok(Some(budget_from_row(&row, comments)?))
            }
            None => Ok(None),
        }
    }

    async fn append_comment(&self, comment: Comment) -> Result<Comment> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin comment transaction", e))?;

        let exists = sqlx::query("SELECT id FROM budgets WHERE id = $1 FOR UPDATE")
            .bind(comment.budget_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_error("Failed to lock budget", e))?;

        if exists.is_none() {
            // Dropping the transaction rolls it back
            return Err(LedgerError::NotFound(format!(
                "Budget not found: {}",
                comment.budget_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO comments (id, budget_id, author_id, text, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(comment.id)
        .bind(comment.budget_id)
        .bind(comment.author_id)
        .bind(&comment.text)
        .bind(comment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("Failed to insert comment", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit comment transaction", e))?;

        Ok(comment)
    }

    async fn list_comments(&self, budget_id: Uuid) -> Result<Vec<Comment>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, budget_id, author_id, text, created_at
            FROM comments
            WHERE budget_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(budget_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load comments", e))?;

        rows.iter().map(comment_from_row).collect()
    }

    async fn list_all_comments(&self) -> Result<Vec<Comment>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT id, budget_id, author_id, text, created_at FROM comments ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load comments", e))?;

        rows.iter().map(comment_from_row).collect()
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {

    async fn insert_user(&self, user: User) -> Result<User> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::Conflict(format!("Email already registered: {}", user.email))
            } else {
                storage_error("Failed to insert user", e)
            }
        })?;

        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load user", e))?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to load user", e))?;

        row.as_ref().map(user_from_row).transpose()
    }
}
