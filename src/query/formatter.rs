//! Result rendering in the style of the `mysql` command-line client.

use std::fmt::Write;

use crate::db::{ExecSummary, QueryResult};

/// Renders a row set as a bordered text table followed by a row count.
///
/// Zero columns renders `Empty result set`; columns without rows render `Empty set`.
pub fn format_result_set(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return "Empty result set".to_string();
    }
    if result.rows.is_empty() {
        return "Empty set".to_string();
    }

    let headers: Vec<String> = result.columns.iter().map(|c| c.name.clone()).collect();
    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_display_string()).collect())
        .collect();

    format_table(&headers, &rows)
}

/// Renders headers and pre-rendered cells as a table.
///
/// Column width is the widest of the header and its cells, counted in characters.
/// Rows shorter than the header are padded with empty cells.
pub fn format_table(headers: &[String], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return "Empty result set".to_string();
    }
    if rows.is_empty() {
        return "Empty set".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = build_border(&widths);
    let mut output = String::new();

    output.push_str(&border);
    output.push('\n');
    output.push_str(&build_row(headers, &widths));
    output.push('\n');
    output.push_str(&border);
    output.push('\n');
    for row in rows {
        output.push_str(&build_row(row, &widths));
        output.push('\n');
    }
    output.push_str(&border);
    output.push('\n');

    match rows.len() {
        1 => output.push_str("1 row in set"),
        n => {
            let _ = write!(output, "{n} rows in set");
        }
    }

    output
}

/// Renders the outcome of a write statement.
pub fn format_exec_summary(summary: &ExecSummary) -> String {
    let mut output = format!("Query OK, {} row(s) affected", summary.rows_affected);
    if summary.last_insert_id > 0 {
        let _ = write!(output, " (last insert ID: {})", summary.last_insert_id);
    }
    output
}

fn build_border(widths: &[usize]) -> String {
    let mut border = String::from("+");
    for width in widths {
        border.push_str(&"-".repeat(width + 2));
        border.push('+');
    }
    border
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut row = String::from("|");
    for (i, width) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let _ = write!(row, " {cell:<width$} |");
    }
    row
}
