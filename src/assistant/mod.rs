//! Conversational assistant
//!
//! One-shot, stateless chat replies. The ledger hands the assistant budget
//! context but never interprets what comes back.

use async_trait::async_trait;

use crate::models::BudgetContext;
use crate::Result;

pub mod gemini;
pub use gemini::GeminiAssistant;

/// Trait for reply generation (LLM controlled)
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, message: &str, context: &[BudgetContext]) -> Result<String>;
}

const SYSTEM_PROMPT: &str = r#"You are a budget assistant for an institution's finance office.

Guidelines:
- Answer using the department budget figures provided, when they are relevant
- Amounts are in Indian rupees unless the user says otherwise
- Point out departments that are over budget when asked about spending
- Be concise and factual; do not invent figures that are not in the context"#;

/// Render budget figures as a prompt block
pub fn render_context(context: &[BudgetContext]) -> String {
    if context.is_empty() {
        return "No budget data is available.".to_string();
    }

    let mut block = String::from("## Current budgets\n");
    for item in context {
        let status = if item.spent > item.allocated {
            "OVER BUDGET"
        } else {
            "within budget"
        };
        block.push_str(&format!(
            "- {}: allocated {}, spent {}, vendor {} ({})\n",
            item.department,
            item.allocated,
            item.spent,
            item.vendor.as_deref().unwrap_or("N/A"),
            status
        ));
    }
    block
}

/// Full user-turn prompt: context block followed by the question
pub fn build_prompt(message: &str, context: &[BudgetContext]) -> String {
    format!(
        "{}\n---\n\nQuestion: {}",
        render_context(context),
        message.trim()
    )
}
