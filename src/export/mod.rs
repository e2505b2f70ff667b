//! Expense Export
//!
//! Turns a filtered set of expenses into a downloadable report. Every format
//! carries the same columns in the same order: `Date, Merchant, Amount,
//! Category, Receipt`, followed by a total.

mod delimited;
mod pdf;
mod spreadsheet;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use crate::models::{format_amount, Expense};
use crate::receipts::Attachment;

/// Column order shared by all formats
pub const COLUMNS: [&str; 5] = ["Date", "Merchant", "Amount", "Category", "Receipt"];

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Csv,
    Excel,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Excel => "excel",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Excel => "xls",
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
            Self::Excel => "application/vnd.ms-excel",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            "excel" | "xlsx" | "xls" => Ok(Self::Excel),
            other => Err(format!("unsupported export format: {}", other)),
        }
    }
}

/// One report line
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub date: String,
    pub merchant: String,
    pub amount: Decimal,
    pub category: String,
    pub receipt: String,
}

impl ReportRow {
    fn cells(&self) -> [String; 5] {
        [
            self.date.clone(),
            self.merchant.clone(),
            format_amount(self.amount),
            self.category.clone(),
            self.receipt.clone(),
        ]
    }
}

/// Format-independent report model
#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub period: String,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<ReportRow>,
    pub total: Decimal,
}

impl Report {
    pub fn from_expenses(
        expenses: &[Expense],
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let rows: Vec<ReportRow> = expenses
            .iter()
            .map(|e| ReportRow {
                date: e.date.format("%Y-%m-%d").to_string(),
                merchant: e.merchant_name.clone(),
                amount: e.amount,
                category: e.category_label.clone().unwrap_or_default(),
                receipt: receipt_cell(e),
            })
            .collect();
        let total = rows.iter().map(|r| r.amount).sum();

        let period = match (from, to) {
            (Some(f), Some(t)) => format!("{} to {}", f, t),
            (Some(f), None) => format!("From {}", f),
            (None, Some(t)) => format!("Until {}", t),
            (None, None) => "All dates".to_string(),
        };

        Self {
            title: "Expense Report".to_string(),
            period,
            generated_at,
            rows,
            total,
        }
    }
}

fn receipt_cell(expense: &Expense) -> String {
    match expense.receipt_ref.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
        Some(_) => expense
            .receipt_filename
            .clone()
            .unwrap_or_else(|| "Attached".to_string()),
        None => String::new(),
    }
}

/// Render a report as a downloadable file
pub fn render(format: ExportFormat, report: &Report) -> Result<Attachment> {
    let bytes = match format {
        ExportFormat::Csv => delimited::render(report)?,
        ExportFormat::Excel => spreadsheet::render(report),
        ExportFormat::Pdf => pdf::render(report),
    };

    Ok(Attachment {
        filename: format!(
            "expenses-{}.{}",
            report.generated_at.format("%Y%m%d"),
            format.extension()
        ),
        content_type: format.content_type().to_string(),
        bytes,
    })
}

#[cfg(test)]
pub(crate) fn sample_report() -> Report {
    Report {
        title: "Expense Report".to_string(),
        period: "All dates".to_string(),
        generated_at: DateTime::from_timestamp(1_721_390_400, 0).unwrap_or_default(),
        rows: vec![
            ReportRow {
                date: "2024-07-19".to_string(),
                merchant: "Joe's Diner, Downtown".to_string(),
                amount: Decimal::from_str("12.34").unwrap(),
                category: "Food".to_string(),
                receipt: "lunch.png".to_string(),
            },
            ReportRow {
                date: "2024-07-18".to_string(),
                merchant: "Grab".to_string(),
                amount: Decimal::from_str("25.3").unwrap(),
                category: String::new(),
                receipt: String::new(),
            },
        ],
        total: Decimal::from_str("37.64").unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Expense;

    #[test]
    fn test_format_parsing() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!(" csv ".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert!("docx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_report_from_expenses() {
        let now = Utc::now();
        let expense = Expense {
            id: "e1".to_string(),
            owner_account_id: "acct-1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 7, 19).unwrap(),
            merchant_name: "Joe's Diner".to_string(),
            amount: Decimal::from_str("12.34").unwrap(),
            category_id: Some("c1".to_string()),
            category_label: Some("Food".to_string()),
            receipt_ref: Some("https://files.example.com/r/1.jpg".to_string()),
            receipt_filename: None,
            receipt_hash: None,
            created_at: now,
            updated_at: now,
        };
        let mut inline = expense.clone();
        inline.receipt_ref = Some("data:image/png;base64,AA==".to_string());
        inline.receipt_filename = Some("lunch.png".to_string());
        inline.amount = Decimal::from(10);

        let report = Report::from_expenses(
            &[expense, inline],
            NaiveDate::from_ymd_opt(2024, 7, 1),
            None,
            now,
        );
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].receipt, "https://files.example.com/r/1.jpg");
        assert_eq!(report.rows[1].receipt, "lunch.png");
        assert_eq!(report.total, Decimal::from_str("22.34").unwrap());
        assert_eq!(report.period, "From 2024-07-01");
    }

    #[test]
    fn test_render_names_file_by_format() {
        let report = sample_report();
        let csv = render(ExportFormat::Csv, &report).unwrap();
        assert_eq!(csv.filename, "expenses-20240719.csv");
        assert_eq!(csv.content_type, "text/csv");

        let excel = render(ExportFormat::Excel, &report).unwrap();
        assert!(excel.filename.ends_with(".xls"));

        let pdf = render(ExportFormat::Pdf, &report).unwrap();
        assert_eq!(pdf.content_type, "application/pdf");
        assert!(pdf.bytes.starts_with(b"%PDF-1.4"));
    }
}
