//! FinSight budget ledger service
//!
//! A REST backend for departmental budget tracking:
//! - Budgets per department, with expense postings applied atomically
//! - Overrun detection recomputed on every read (spent > allocated)
//! - Case-insensitive search over department and vendor
//! - Comment threads attached to budgets by authenticated users
//! - A chat endpoint that hands budget context to an LLM assistant
//!
//! REQUEST FLOW:
//! HTTP → BEARER GATE → LEDGER → STORE (in-memory | Postgres)

pub mod api;
pub mod assistant;
pub mod auth;
pub mod config;
pub mod currency;
pub mod error;
pub mod ledger;
pub mod models;
pub mod state;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use currency::Currency;
pub use ledger::Ledger;
