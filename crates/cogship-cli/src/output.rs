use serde::Serialize;
use std::io::Write;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", table(headers, &rows));
}

/// Lay out `rows` under `headers` in columns sized to the widest cell.
/// Widths count characters so the `✓`/`…` markers do not skew them.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let mut out = line(headers, &widths);
    out.push_str(&line(&sep, &widths));
    for row in rows {
        out.push_str(&line(row, &widths));
    }
    out
}

fn line<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &w)| format!("{:w$}", cell.as_ref()))
        .collect();
    let mut text = padded.join("  ").trim_end().to_string();
    text.push('\n');
    text
}

/// Last non-empty line of `text`, shortened to `max` characters for table cells.
pub fn one_line(text: &str, max: usize) -> String {
    let line = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if line.chars().count() <= max {
        return line.to_string();
    }
    let mut short: String = line.chars().take(max.saturating_sub(1)).collect();
    short.push('\u{2026}');
    short
}
