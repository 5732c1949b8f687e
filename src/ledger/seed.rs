//! Demo departments inserted into an empty ledger

use crate::models::NewBudget;

const DEFAULT_DEPARTMENTS: &[(&str, f64, f64)] = &[
    ("Academics & Curriculum", 150_000_000.0, 40_000_000.0),
    ("Infrastructure & Maintenance", 200_000_000.0, 55_000_000.0),
    ("Student Affairs & Events", 50_000_000.0, 10_000_000.0),
    ("Research & Development", 100_000_000.0, 20_000_000.0),
];

pub fn default_budgets() -> Vec<NewBudget> {
    DEFAULT_DEPARTMENTS
        .iter()
        .map(|(department, allocated, spent)| NewBudget {
            department: department.to_string(),
            allocated: *allocated,
            spent: *spent,
        })
        .collect()
}
