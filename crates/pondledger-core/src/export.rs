// CSV export of transactions for spreadsheet reporting.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::{Category, Transaction};

/// Flat row layout of the exported file.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    date: String,
    kind: &'a str,
    status: &'a str,
    amount: String,
    title: &'a str,
    category: &'a str,
    gl_code: &'a str,
    project: &'a str,
    vendor: &'a str,
    description: &'a str,
    receipt: &'a str,
}

/// Write `txs` as CSV with a header row. `project_name` resolves project ids
/// to display names; unknown ids are written as-is. GL codes come from the
/// configured categories.
pub fn transactions_to_csv<F>(
    txs: &[Transaction],
    categories: &[Category],
    project_name: F,
) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());

    for tx in txs {
        let category = tx.category.as_deref().unwrap_or("");
        let gl_code = categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(category))
            .and_then(|c| c.gl_code.as_deref())
            .unwrap_or("");
        let project = tx
            .project_id
            .as_deref()
            .map(|id| project_name(id).unwrap_or_else(|| id.to_string()))
            .unwrap_or_default();

        writer
            .serialize(CsvRow {
                date: tx.date.format("%Y-%m-%d").to_string(),
                kind: tx.kind.as_str(),
                status: tx.status.as_str(),
                amount: format!("{:.2}", tx.amount),
                title: tx.title.as_deref().unwrap_or(""),
                category,
                gl_code,
                project: &project,
                vendor: tx.vendor.as_deref().unwrap_or(""),
                description: tx.description.as_deref().unwrap_or(""),
                receipt: tx.receipt_ref.as_deref().unwrap_or(""),
            })
            .context("failed to write CSV row")?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV writer: {e}"))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
