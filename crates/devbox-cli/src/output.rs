use devbox_core::engine::{RunReport, StepStatus};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// One line per step, then a recap line.
pub fn print_report(report: &RunReport) {
    for step in &report.steps {
        let mut line = format!("{:<8} {}", step.status.as_str(), step.name);
        if let Some(detail) = &step.detail {
            line.push_str(&format!(" ({detail})"));
        }
        println!("{line}");
    }
    println!();
    println!(
        "recap: ok={} changed={} failed={} skipped={}",
        report.count(StepStatus::Ok),
        report.count(StepStatus::Changed),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Skipped),
    );
    if let Some(code) = report.failure.as_ref().and_then(|f| f.exit_code) {
        println!("verification exit code: {code}");
    }
}
