// Prompt templates for transaction extraction, receipt reading and ledger
// insights.
//
// Prompts are compact markdown-ish sections. Figures are pre-computed so the
// model explains and interprets rather than doing arithmetic.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use pondledger_core::analytics::{BudgetComparison, LedgerSummary, MonthTotals};
use pondledger_core::attendance::EmployeeAttendance;

use crate::extractor::{ExtractionRequest, COMPLETION_MESSAGE};

// ---------------------------------------------------------------------------
// Transaction extraction
// ---------------------------------------------------------------------------

/// System prompt for one extraction turn. `today` resolves relative dates
/// such as "yesterday" or "last Friday".
pub fn extraction_system_prompt(today: NaiveDate) -> String {
    format!(
        "You help a farm office record income and expense transactions by voice.\n\
         Today is {today} ({weekday}).\n\
         \n\
         Each turn you receive the transaction recorded so far, the valid projects and \
         categories, the questions already asked and the user's latest message. Update the \
         transaction with anything the message tells you, then ask ONE short question for the \
         most important missing detail.\n\
         \n\
         Rules:\n\
         - type is \"expense\" or \"income\". Infer it from wording like paid, bought, spent \
         (expense) or sold, received, got paid (income).\n\
         - amount is a plain number with no currency symbol. Convert words like \"two thousand\" \
         or \"4.5k\" to digits.\n\
         - date is YYYY-MM-DD. Resolve relative dates against today. Leave it null if not said.\n\
         - project and category must be copied exactly from the valid lists. Pick the closest \
         match for misspellings or synonyms. If nothing fits, leave it null and ask.\n\
         - status is \"completed\" (paid), \"credit\" (bought on credit, still owed) or \
         \"expected\" (not happened yet).\n\
         - title is a short label of a few words, e.g. \"Feed bags\" or \"Harvest sale\".\n\
         - Use null for anything you do not know. Never invent values.\n\
         - Do not repeat a question that was already asked unless the answer is still missing.\n\
         \n\
         Required: type, amount, title, project, and category when type is expense.\n\
         When every required field is known, set nextQuestion to exactly:\n\
         {COMPLETION_MESSAGE}\n\
         \n\
         Reply with JSON only, no commentary:\n\
         {{\"updatedState\": {{\"type\": ..., \"amount\": ..., \"title\": ..., \"date\": ..., \
         \"project\": ..., \"category\": ..., \"status\": ..., \"vendor\": ..., \
         \"description\": ...}}, \"nextQuestion\": \"...\"}}",
        weekday = today.format("%A"),
    )
}

/// Build the user message for one extraction turn.
pub fn build_extraction_prompt(request: &ExtractionRequest) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("## VALID PROJECTS\n");
    prompt.push_str(&format_name_list(&request.projects));
    prompt.push('\n');

    prompt.push_str("## VALID CATEGORIES\n");
    prompt.push_str(&format_name_list(&request.categories));
    prompt.push('\n');

    prompt.push_str("## TRANSACTION SO FAR\n");
    let state = serde_json::to_string_pretty(&request.state).unwrap_or_else(|_| "{}".into());
    prompt.push_str(&state);
    prompt.push_str("\n\n");

    if !request.previous_questions.is_empty() {
        prompt.push_str("## QUESTIONS ALREADY ASKED\n");
        for (i, q) in request.previous_questions.iter().enumerate() {
            prompt.push_str(&format!("  {}. {}\n", i + 1, q));
        }
        prompt.push('\n');
    }

    prompt.push_str("## LATEST MESSAGE\n");
    prompt.push_str(request.utterance.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## RESPOND\nReturn the updated transaction and your next question as JSON.");
    prompt
}

fn format_name_list(names: &[String]) -> String {
    if names.is_empty() {
        return "  (none)\n".to_string();
    }
    names.iter().map(|n| format!("  - {n}\n")).collect()
}

// ---------------------------------------------------------------------------
// Receipt analysis
// ---------------------------------------------------------------------------

pub fn receipt_system_prompt() -> String {
    "You read purchase receipts and bills for a shrimp farm office.\n\
     Extract the vendor name, the receipt date (YYYY-MM-DD), the grand total as a plain \
     number, the best matching expense category from the list provided, and the line items.\n\
     Use null for anything you cannot read. Do not guess totals.\n\
     \n\
     Reply with JSON only:\n\
     {\"vendor\": ..., \"date\": ..., \"total\": ..., \"category\": ..., \
     \"items\": [{\"description\": ..., \"amount\": ...}]}"
        .to_string()
}

/// Build the user message for a receipt. `ocr_text` is absent when the
/// receipt is sent as an image block instead.
pub fn build_receipt_prompt(categories: &[String], ocr_text: Option<&str>) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str("## CATEGORIES\n");
    prompt.push_str(&format_name_list(categories));
    prompt.push('\n');

    match ocr_text {
        Some(text) => {
            prompt.push_str("## RECEIPT TEXT\n");
            prompt.push_str(text.trim());
            prompt.push_str("\n\n");
        }
        None => prompt.push_str("## RECEIPT\nThe receipt is in the attached image.\n\n"),
    }

    prompt.push_str("## RESPOND\nReturn the receipt details as JSON.");
    prompt
}

// ---------------------------------------------------------------------------
// Ledger insights
// ---------------------------------------------------------------------------

/// Pre-computed report figures for an insight request.
#[derive(Debug, Clone)]
pub struct InsightContext<'a> {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub currency: &'a str,
    pub summary: &'a LedgerSummary,
    pub budgets: &'a [BudgetComparison],
    pub by_category: &'a BTreeMap<String, f64>,
    pub months: &'a [MonthTotals],
    pub attendance: &'a [EmployeeAttendance],
    /// A specific question from the user; general review when absent.
    pub question: Option<&'a str>,
}

pub fn insight_system_prompt() -> String {
    "You are a finance assistant for a small aquaculture business.\n\
     Review the figures provided and give practical observations: where money is going, \
     budgets at risk, credit that needs paying, cash-flow trends and labour costs.\n\
     Use the numbers given, do NOT recompute them. Be concise: short paragraphs or bullets, \
     at most about 250 words."
        .to_string()
}

pub fn build_insight_prompt(ctx: &InsightContext<'_>) -> String {
    let cur = ctx.currency;
    let s = ctx.summary;
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(&format!(
        "## PERIOD\n{} to {}\n\n\
         ## SUMMARY\n\
         Transactions: {}\n\
         Income: {cur} {:.2} | Expense: {cur} {:.2} | Net: {cur} {:.2}\n\
         Outstanding credit: {cur} {:.2}\n\
         Expected income: {cur} {:.2} | Expected expense: {cur} {:.2}\n\n",
        ctx.from,
        ctx.to,
        s.transaction_count,
        s.total_income,
        s.total_expense,
        s.net,
        s.outstanding_credit,
        s.expected_income,
        s.expected_expense,
    ));

    if !ctx.budgets.is_empty() {
        prompt.push_str("## BUDGETS\n");
        for b in ctx.budgets {
            let used = b
                .percent_used
                .map(|p| format!("{p:.0}%"))
                .unwrap_or_else(|| "n/a".into());
            prompt.push_str(&format!(
                "  {}: budget {cur} {:.2}, spent {cur} {:.2}, remaining {cur} {:.2} ({used} used){}\n",
                b.category,
                b.budgeted,
                b.actual,
                b.remaining,
                if b.is_over() { " OVER" } else { "" },
            ));
        }
        prompt.push('\n');
    }

    if !ctx.by_category.is_empty() {
        prompt.push_str("## SPEND BY CATEGORY\n");
        for (category, amount) in ctx.by_category {
            prompt.push_str(&format!("  {category}: {cur} {amount:.2}\n"));
        }
        prompt.push('\n');
    }

    if !ctx.months.is_empty() {
        prompt.push_str("## MONTHLY TOTALS\n");
        for m in ctx.months {
            prompt.push_str(&format!(
                "  {}: income {cur} {:.2}, expense {cur} {:.2}\n",
                m.month, m.income, m.expense
            ));
        }
        prompt.push('\n');
    }

    if !ctx.attendance.is_empty() {
        prompt.push_str("## LABOUR\n");
        for a in ctx.attendance {
            let wages = a
                .wages_due
                .map(|w| format!(", wages due {cur} {w:.2}"))
                .unwrap_or_default();
            prompt.push_str(&format!(
                "  {}: {:.1} days worked ({} full, {} half, {} absent){wages}\n",
                a.name, a.days_worked, a.full_days, a.half_days, a.absent_days
            ));
        }
        prompt.push('\n');
    }

    match ctx.question.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => {
            prompt.push_str("## QUESTION\n");
            prompt.push_str(q);
        }
        None => prompt.push_str(
            "## WHAT SHOULD I KNOW?\nGive me the three most useful observations and one action to take.",
        ),
    }

    prompt
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PartialTransaction;
    use pondledger_core::model::TransactionKind;

    #[test]
    fn extraction_system_prompt_anchors_date_and_completion() {
        let sp = extraction_system_prompt(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert!(sp.contains("Today is 2026-03-14 (Saturday)"));
        assert!(sp.contains(COMPLETION_MESSAGE));
        assert!(sp.contains("\"nextQuestion\""));
    }

    #[test]
    fn extraction_prompt_contains_sections() {
        let request = ExtractionRequest {
            state: PartialTransaction {
                kind: Some(TransactionKind::Expense),
                ..Default::default()
            },
            projects: vec!["North Block".into(), "South Block".into()],
            categories: vec![],
            utterance: "  paid 2000 for diesel  ".into(),
            previous_questions: vec!["How much was it?".into()],
        };
        let p = build_extraction_prompt(&request);

        assert!(p.contains("## VALID PROJECTS\n  - North Block\n  - South Block\n"));
        assert!(p.contains("## VALID CATEGORIES\n  (none)\n"));
        assert!(p.contains("\"type\": \"expense\""));
        assert!(p.contains("  1. How much was it?"));
        assert!(p.contains("## LATEST MESSAGE\npaid 2000 for diesel\n"));
    }

    #[test]
    fn first_turn_omits_question_history() {
        let request = ExtractionRequest {
            utterance: "sold 500 kg".into(),
            ..Default::default()
        };
        assert!(!build_extraction_prompt(&request).contains("QUESTIONS ALREADY ASKED"));
    }

    #[test]
    fn receipt_prompt_text_or_image() {
        let cats = vec!["Feed".to_string()];
        let text = build_receipt_prompt(&cats, Some("AVANTI FEEDS\nTOTAL 4500"));
        assert!(text.contains("## RECEIPT TEXT\nAVANTI FEEDS"));
        let image = build_receipt_prompt(&cats, None);
        assert!(image.contains("attached image"));
        assert!(image.contains("  - Feed"));
    }

    #[test]
    fn insight_prompt_includes_figures() {
        let summary = LedgerSummary {
            transaction_count: 3,
            total_income: 10_000.0,
            total_expense: 7_500.0,
            net: 2_500.0,
            outstanding_credit: 1_000.0,
            ..Default::default()
        };
        let budgets = vec![BudgetComparison {
            budget_id: "b1".into(),
            category: "Feed".into(),
            project_id: None,
            budgeted: 5_000.0,
            actual: 6_000.0,
            remaining: -1_000.0,
            percent_used: Some(120.0),
        }];
        let by_category = BTreeMap::from([("Feed".to_string(), 6_000.0)]);
        let ctx = InsightContext {
            from: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            currency: "INR",
            summary: &summary,
            budgets: &budgets,
            by_category: &by_category,
            months: &[],
            attendance: &[],
            question: Some("Why is feed so high?"),
        };
        let p = build_insight_prompt(&ctx);

        assert!(p.contains("## PERIOD\n2026-03-01 to 2026-03-31"));
        assert!(p.contains("Net: INR 2500.00"));
        assert!(p.contains("Feed: budget INR 5000.00, spent INR 6000.00, remaining INR -1000.00 (120% used) OVER"));
        assert!(p.contains("## SPEND BY CATEGORY\n  Feed: INR 6000.00"));
        assert!(!p.contains("## LABOUR"));
        assert!(p.ends_with("## QUESTION\nWhy is feed so high?"));
    }
}
