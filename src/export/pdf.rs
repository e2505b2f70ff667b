//! PDF rendering
//!
//! Writes a plain PDF 1.4 document with the built-in Courier fonts, so the
//! table lines up without embedding font metrics.

use super::{Report, COLUMNS};
use crate::models::format_amount;

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN_LEFT: u32 = 40;
const TOP_Y: u32 = 750;
const FONT_SIZE: u32 = 8;
const LEADING: u32 = 12;
const LINES_PER_PAGE: usize = 58;

/// Character widths of the Date, Merchant, Amount, Category and Receipt columns
const COLUMN_CHARS: [usize; 5] = [11, 30, 12, 18, 38];

struct Line {
    bold: bool,
    text: String,
}

impl Line {
    fn plain(text: String) -> Self {
        Self { bold: false, text }
    }

    fn bold(text: String) -> Self {
        Self { bold: true, text }
    }
}

pub(super) fn render(report: &Report) -> Vec<u8> {
    let header = table_line(&COLUMNS.map(str::to_string));
    let rule = "-".repeat(header.len());

    let mut lines = vec![
        Line::bold(report.title.clone()),
        Line::plain(format!("Period: {}", report.period)),
        Line::plain(format!(
            "Generated: {}",
            report.generated_at.format("%Y-%m-%d %H:%M UTC")
        )),
        Line::plain(String::new()),
        Line::bold(header),
        Line::plain(rule.clone()),
    ];
    for row in &report.rows {
        lines.push(Line::plain(table_line(&row.cells())));
    }
    lines.push(Line::plain(rule));
    lines.push(Line::bold(table_line(&[
        "Total".to_string(),
        String::new(),
        format_amount(report.total),
        String::new(),
        String::new(),
    ])));

    let pages: Vec<&[Line]> = lines.chunks(LINES_PER_PAGE).collect();
    write_document(&pages)
}

fn table_line(cells: &[String; 5]) -> String {
    let mut out = String::new();
    for (i, (cell, width)) in cells.iter().zip(COLUMN_CHARS).enumerate() {
        let fitted = fit(cell, width - 1);
        if i == 2 {
            // amounts right-aligned
            out.push_str(&format!("{:>w$} ", fitted, w = width - 1));
        } else {
            out.push_str(&format!("{:<w$} ", fitted, w = width - 1));
        }
    }
    out.trim_end().to_string()
}

fn fit(text: &str, width: usize) -> String {
    let ascii: String = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    if ascii.len() <= width {
        ascii
    } else {
        format!("{}~", &ascii[..width.saturating_sub(1)])
    }
}

fn escape_pdf(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(ch);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn content_stream(lines: &[Line]) -> String {
    let mut stream = format!(
        "BT\n{} TL\n{} {} Td\n",
        LEADING, MARGIN_LEFT, TOP_Y
    );
    let mut current_bold: Option<bool> = None;
    for line in lines {
        if current_bold != Some(line.bold) {
            let font = if line.bold { "F2" } else { "F1" };
            stream.push_str(&format!("/{} {} Tf\n", font, FONT_SIZE));
            current_bold = Some(line.bold);
        }
        stream.push_str(&format!("({}) Tj T*\n", escape_pdf(&line.text)));
    }
    stream.push_str("ET\n");
    stream
}

fn write_document(pages: &[&[Line]]) -> Vec<u8> {
    // 1 catalog, 2 page tree, 3-4 fonts, then a page and its content per page
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 5 + i * 2).collect();

    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages.len()
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_string());
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Courier-Bold >>".to_string());

    for (page, id) in pages.iter().zip(&page_ids) {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
            PAGE_WIDTH,
            PAGE_HEIGHT,
            id + 1
        ));
        let stream = content_stream(page);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }

    let xref_at = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in offsets {
        out.push_str(&format!("{:010} 00000 n \n", offset));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_at
    ));
    out.into_bytes()
}
