// Pure computations over ledger records: filtering, budget-vs-actual, and
// period summaries. Nothing here touches the store.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::{Budget, Transaction, TransactionKind, TransactionStatus};

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Conjunctive filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl TransactionFilter {
    pub fn for_project(project_id: &str) -> Self {
        TransactionFilter {
            project_id: Some(project_id.to_string()),
            ..Default::default()
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        TransactionFilter {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(project_id) = &self.project_id {
            if tx.project_id.as_deref() != Some(project_id.as_str()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            match &tx.category {
                Some(c) if c.eq_ignore_ascii_case(category) => {}
                _ => return false,
            }
        }
        if self.status.is_some_and(|s| s != tx.status) {
            return false;
        }
        if self.kind.is_some_and(|k| k != tx.kind) {
            return false;
        }
        if self.from.is_some_and(|from| tx.date < from) {
            return false;
        }
        if self.to.is_some_and(|to| tx.date > to) {
            return false;
        }
        true
    }

    pub fn apply<'a>(&self, txs: &'a [Transaction]) -> Vec<&'a Transaction> {
        txs.iter().filter(|tx| self.matches(tx)).collect()
    }
}

// ---------------------------------------------------------------------------
// Budget comparison
// ---------------------------------------------------------------------------

/// One row of the budget-vs-actual chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetComparison {
    pub budget_id: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub budgeted: f64,
    pub actual: f64,
    /// `budgeted - actual`; negative when overspent.
    pub remaining: f64,
    /// `actual / budgeted * 100`, or `None` for a zero budget.
    pub percent_used: Option<f64>,
}

impl BudgetComparison {
    pub fn is_over(&self) -> bool {
        self.remaining < 0.0
    }
}

/// Realized spend counted against a budget: expenses in the budget's
/// category (case-insensitive) that are completed or on credit, limited to
/// the budget's project when it names one.
pub fn actual_spend(budget: &Budget, txs: &[Transaction]) -> f64 {
    txs.iter()
        .filter(|tx| tx.kind == TransactionKind::Expense && tx.status.is_realized())
        .filter(|tx| {
            tx.category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(&budget.category))
        })
        .filter(|tx| match &budget.project_id {
            Some(p) => tx.project_id.as_deref() == Some(p.as_str()),
            None => true,
        })
        .map(|tx| tx.amount)
        .sum()
}

/// Compare each budget with its realized spend, in budget order.
pub fn budget_comparison(budgets: &[Budget], txs: &[Transaction]) -> Vec<BudgetComparison> {
    budgets
        .iter()
        .map(|b| {
            let actual = actual_spend(b, txs);
            BudgetComparison {
                budget_id: b.id.clone(),
                category: b.category.clone(),
                project_id: b.project_id.clone(),
                budgeted: b.amount,
                actual,
                remaining: b.amount - actual,
                percent_used: (b.amount > 0.0).then(|| actual / b.amount * 100.0),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub transaction_count: usize,
    /// Realized income (completed + credit).
    pub total_income: f64,
    /// Realized expenses (completed + credit).
    pub total_expense: f64,
    pub net: f64,
    /// Expenses still owed to vendors.
    pub outstanding_credit: f64,
    pub expected_income: f64,
    pub expected_expense: f64,
}

pub fn summarize(txs: &[Transaction]) -> LedgerSummary {
    let mut s = LedgerSummary {
        transaction_count: txs.len(),
        ..Default::default()
    };
    for tx in txs {
        match (tx.kind, tx.status) {
            (TransactionKind::Income, TransactionStatus::Expected) => s.expected_income += tx.amount,
            (TransactionKind::Expense, TransactionStatus::Expected) => s.expected_expense += tx.amount,
            (TransactionKind::Income, _) => s.total_income += tx.amount,
            (TransactionKind::Expense, status) => {
                s.total_expense += tx.amount;
                if status == TransactionStatus::Credit {
                    s.outstanding_credit += tx.amount;
                }
            }
        }
    }
    s.net = s.total_income - s.total_expense;
    s
}

/// Realized expense per category, uncategorized under `"Uncategorized"`.
pub fn spend_by_category(txs: &[Transaction]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for tx in txs
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Expense && tx.status.is_realized())
    {
        let key = tx
            .category
            .clone()
            .unwrap_or_else(|| "Uncategorized".to_string());
        *totals.entry(key).or_insert(0.0) += tx.amount;
    }
    totals
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthTotals {
    /// `YYYY-MM`
    pub month: String,
    pub income: f64,
    pub expense: f64,
}

/// Realized income and expense per calendar month, oldest first.
pub fn monthly_totals(txs: &[Transaction]) -> Vec<MonthTotals> {
    let mut months: BTreeMap<(i32, u32), MonthTotals> = BTreeMap::new();
    for tx in txs.iter().filter(|tx| tx.status.is_realized()) {
        let entry = months
            .entry((tx.date.year(), tx.date.month()))
            .or_insert_with(|| MonthTotals {
                month: format!("{:04}-{:02}", tx.date.year(), tx.date.month()),
                ..Default::default()
            });
        match tx.kind {
            TransactionKind::Income => entry.income += tx.amount,
            TransactionKind::Expense => entry.expense += tx.amount,
        }
    }
    months.into_values().collect()
}
