// Period reports assembled from the ledger, and the CSV export.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use pondledger_core::analytics::{
    self, BudgetComparison, LedgerSummary, MonthTotals, TransactionFilter,
};
use pondledger_core::attendance::{self, EmployeeAttendance};
use pondledger_core::export::transactions_to_csv;
use pondledger_core::ledger::{Ledger, LedgerResult};
use pondledger_core::model::{Category, Transaction};
use pondledger_llm::prompt::InsightContext;

/// An inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Period {
    /// From the first of `today`'s month through `today`.
    pub fn month_to_date(today: NaiveDate) -> Self {
        Self {
            from: today.with_day(1).unwrap_or(today),
            to: today,
        }
    }

    /// Fill in whichever bound is missing from the month-to-date default.
    pub fn resolve(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> Self {
        let default = Self::month_to_date(today);
        Self {
            from: from.unwrap_or(default.from),
            to: to.unwrap_or(default.to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub period: Period,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub summary: LedgerSummary,
    pub budgets: Vec<BudgetComparison>,
    pub spend_by_category: BTreeMap<String, f64>,
    pub monthly: Vec<MonthTotals>,
    pub attendance: Vec<EmployeeAttendance>,
}

impl Report {
    /// Figures for an insight prompt.
    pub fn insight_context<'a>(
        &'a self,
        currency: &'a str,
        question: Option<&'a str>,
    ) -> InsightContext<'a> {
        InsightContext {
            from: self.period.from,
            to: self.period.to,
            currency,
            summary: &self.summary,
            budgets: &self.budgets,
            by_category: &self.spend_by_category,
            months: &self.monthly,
            attendance: &self.attendance,
            question,
        }
    }
}

fn period_transactions(
    ledger: &Ledger,
    period: Period,
    project_id: Option<&str>,
) -> LedgerResult<Vec<Transaction>> {
    let filter = TransactionFilter {
        project_id: project_id.map(str::to_string),
        ..TransactionFilter::between(period.from, period.to)
    };
    let txs = ledger.list_transactions()?;
    Ok(filter.apply(&txs).into_iter().cloned().collect())
}

/// Build the report for `period`, optionally limited to one project.
/// Attendance always covers every employee.
pub fn build_report(
    ledger: &Ledger,
    period: Period,
    project_id: Option<&str>,
) -> LedgerResult<Report> {
    let txs = period_transactions(ledger, period, project_id)?;

    let mut budgets = ledger.list_budgets()?;
    if let Some(project_id) = project_id {
        budgets.retain(|b| b.project_id.as_deref() == Some(project_id));
    }

    let employees = ledger.list_employees()?;
    let marks = ledger.attendance_between(period.from, period.to)?;

    Ok(Report {
        period,
        project_id: project_id.map(str::to_string),
        summary: analytics::summarize(&txs),
        budgets: analytics::budget_comparison(&budgets, &txs),
        spend_by_category: analytics::spend_by_category(&txs),
        monthly: analytics::monthly_totals(&txs),
        attendance: attendance::summarize(&employees, &marks),
    })
}

/// The period's transactions as CSV, oldest first, with project names.
pub fn export_csv(
    ledger: &Ledger,
    categories: &[Category],
    period: Period,
    project_id: Option<&str>,
) -> anyhow::Result<String> {
    let mut txs = period_transactions(ledger, period, project_id)?;
    txs.sort_by(|a, b| a.date.cmp(&b.date));

    let projects = ledger.list_projects()?;
    transactions_to_csv(&txs, categories, |id| {
        projects.iter().find(|p| p.id == id).map(|p| p.name.clone())
    })
}
