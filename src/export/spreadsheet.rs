//! Spreadsheet rendering (SpreadsheetML 2003, opens in Excel and LibreOffice)

use super::{Report, COLUMNS};
use crate::models::format_amount;

/// Fixed widths in points, per column
const COLUMN_WIDTHS: [u32; 5] = [80, 180, 80, 120, 200];

pub(super) fn render(report: &Report) -> Vec<u8> {
    let mut xml = String::with_capacity(1024 + report.rows.len() * 256);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
    xml.push_str(
        "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
         xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
    );
    xml.push_str(
        "<Styles><Style ss:ID=\"header\"><Font ss:Bold=\"1\"/></Style>\
         <Style ss:ID=\"money\"><NumberFormat ss:Format=\"0.00\"/></Style></Styles>\n",
    );
    xml.push_str("<Worksheet ss:Name=\"Expenses\">\n<Table>\n");

    for width in COLUMN_WIDTHS {
        xml.push_str(&format!("<Column ss:Width=\"{}\"/>\n", width));
    }

    xml.push_str("<Row>");
    for column in COLUMNS {
        xml.push_str(&string_cell(column, Some("header")));
    }
    xml.push_str("</Row>\n");

    for row in &report.rows {
        xml.push_str("<Row>");
        xml.push_str(&string_cell(&row.date, None));
        xml.push_str(&string_cell(&row.merchant, None));
        xml.push_str(&number_cell(&format_amount(row.amount)));
        xml.push_str(&string_cell(&row.category, None));
        xml.push_str(&string_cell(&row.receipt, None));
        xml.push_str("</Row>\n");
    }

    xml.push_str("<Row>");
    xml.push_str(&string_cell("Total", Some("header")));
    xml.push_str(&string_cell("", None));
    xml.push_str(&number_cell(&format_amount(report.total)));
    xml.push_str("</Row>\n");

    xml.push_str("</Table>\n</Worksheet>\n</Workbook>\n");
    xml.into_bytes()
}

fn string_cell(value: &str, style: Option<&str>) -> String {
    let style = style
        .map(|s| format!(" ss:StyleID=\"{}\"", s))
        .unwrap_or_default();
    format!(
        "<Cell{}><Data ss:Type=\"String\">{}</Data></Cell>",
        style,
        escape_xml(value)
    )
}

fn number_cell(value: &str) -> String {
    format!(
        "<Cell ss:StyleID=\"money\"><Data ss:Type=\"Number\">{}</Data></Cell>",
        value
    )
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
