//! Aggregates computed from the transaction store.

use crate::model::{Amount, Category, Month};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Totals for a single month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub month: Option<Month>,
    pub year: i32,
    /// Sum of all categories except `Savings`.
    pub total_spent: Amount,
    pub savings: Amount,
    pub by_category: BTreeMap<Category, Amount>,
    pub transaction_count: u64,
}

impl MonthlySummary {
    /// Folds one transaction into the totals.
    pub fn add(&mut self, category: Category, amount: Amount) {
        if category.is_spending() {
            self.total_spent += amount;
        } else {
            self.savings += amount;
        }
        *self.by_category.entry(category).or_default() += amount;
        self.transaction_count += 1;
    }
}

/// Totals for a calendar year with a per-month breakdown of the months that have data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct YearlySummary {
    pub year: i32,
    pub total_spent: Amount,
    pub savings: Amount,
    pub transaction_count: u64,
    pub months: Vec<MonthlySummary>,
}

/// Store-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub transaction_count: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Sum of all categories except `Savings`.
    pub total_spent: Amount,
    /// Number of days between the first and last transaction, inclusive.
    pub period_days: i64,
}
