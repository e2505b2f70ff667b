//! CSV rendering

use anyhow::Result;
use csv::{QuoteStyle, WriterBuilder};

use super::{Report, COLUMNS};
use crate::models::format_amount;

/// Header row, one row per expense, then a total row. Text fields are quoted.
pub(super) fn render(report: &Report) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(Vec::new());

    writer.write_record(COLUMNS)?;
    for row in &report.rows {
        writer.write_record(row.cells())?;
    }
    let total = format_amount(report.total);
    writer.write_record(["Total", "", total.as_str(), "", ""])?;

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to finish CSV export: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::sample_report;

    #[test]
    fn test_csv_columns_and_quoting() {
        let bytes = render(&sample_report()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], r#""Date","Merchant","Amount","Category","Receipt""#);
        assert_eq!(
            lines[1],
            r#""2024-07-19","Joe's Diner, Downtown",12.34,"Food","lunch.png""#
        );
        assert!(lines[2].starts_with(r#""2024-07-18","Grab",25.30,"#));
        assert!(lines[3].starts_with(r#""Total","#));
        assert!(lines[3].contains(",37.64,"));
        assert_eq!(lines.len(), 4);
    }
}
