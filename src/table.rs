use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{schema::Column, views::SavedView};

/// Renders an aligned plain-text table with a dashed separator under the header.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count().max(1)).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// One line per resolved column: name, type, origin and widest value.
pub fn render_columns(columns: &[Column]) -> String {
    let headers = ["column", "type", "origin", "max bytes"].map(String::from);
    let rows: Vec<Vec<String>> = columns
        .iter()
        .map(|column| {
            vec![
                column.name.clone(),
                column.column_type.to_string(),
                format!("{:?}", column.origin).to_lowercase(),
                column.observed_width.to_string(),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

/// Saved view captures, flagging the ones too old to be replayed.
pub fn render_saved_views(saved: &[SavedView], max_age: std::time::Duration) -> String {
    let headers = ["view", "kind", "age", "status", "path"].map(String::from);
    let rows: Vec<Vec<String>> = saved
        .iter()
        .map(|entry| {
            vec![
                entry.descriptor.full_name.clone(),
                entry.descriptor.kind.to_string().to_lowercase(),
                format_age(entry.age),
                if entry.is_fresh(max_age) {
                    "pending".to_string()
                } else {
                    "stale".to_string()
                },
                entry.path.display().to_string(),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

fn format_age(age: std::time::Duration) -> String {
    let secs = age.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
