//! Side-by-side rendering of run summaries.

use crate::summary::RunSummary;
use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use testbed_core::EventOutcome;

/// Output format of the `analyze` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Table,
    Markdown,
    Json,
    Latex,
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Count,
    Percent,
    Bytes,
    BytesPerSec,
    Seconds,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::Count => "",
            Unit::Percent => "%",
            Unit::Bytes => "B",
            Unit::BytesPerSec => "B/s",
            Unit::Seconds => "s",
        }
    }
}

struct Row {
    name: &'static str,
    unit: Unit,
    value: fn(&RunSummary) -> Option<f64>,
}

const ROWS: &[Row] = &[
    Row { name: "Total Uploads", unit: Unit::Count, value: |r| Some(r.transfer.total_uploads as f64) },
    Row { name: "Total Downloads", unit: Unit::Count, value: |r| Some(r.transfer.total_downloads as f64) },
    Row { name: "Upload Success Rate", unit: Unit::Percent, value: |r| r.transfer.upload_success_rate_percent },
    Row { name: "Download Success Rate", unit: Unit::Percent, value: |r| r.transfer.download_success_rate_percent },
    Row { name: "Average Upload Size", unit: Unit::Bytes, value: |r| r.transfer.avg_upload_size_bytes },
    Row { name: "Median Upload Size", unit: Unit::Bytes, value: |r| r.transfer.median_upload_size_bytes },
    Row { name: "Average Upload Duration", unit: Unit::Seconds, value: |r| r.transfer.avg_upload_duration_sec },
    Row { name: "Median Upload Duration", unit: Unit::Seconds, value: |r| r.transfer.median_upload_duration_sec },
    Row { name: "Average Download Size", unit: Unit::Bytes, value: |r| r.transfer.avg_download_size_bytes },
    Row { name: "Median Download Size", unit: Unit::Bytes, value: |r| r.transfer.median_download_size_bytes },
    Row { name: "Average Download Duration", unit: Unit::Seconds, value: |r| r.transfer.avg_download_duration_sec },
    Row { name: "Median Download Duration", unit: Unit::Seconds, value: |r| r.transfer.median_download_duration_sec },
    Row { name: "Average CPU", unit: Unit::Percent, value: |r| r.performance.avg_cpu_percent },
    Row { name: "Max CPU", unit: Unit::Percent, value: |r| r.performance.max_cpu_percent },
    Row { name: "Average Memory Usage", unit: Unit::Bytes, value: |r| r.performance.avg_memory_usage_bytes },
    Row { name: "Max Memory Usage", unit: Unit::Bytes, value: |r| r.performance.max_memory_usage_bytes },
    Row { name: "Average Network RX", unit: Unit::BytesPerSec, value: |r| r.performance.avg_network_rx_bytes_per_sec },
    Row { name: "Average Network TX", unit: Unit::BytesPerSec, value: |r| r.performance.avg_network_tx_bytes_per_sec },
];

pub fn render(runs: &[RunSummary], format: ReportFormat) -> Result<String> {
    Ok(match format {
        ReportFormat::Table => format_table(runs),
        ReportFormat::Markdown => format_markdown(runs),
        ReportFormat::Json => serde_json::to_string_pretty(runs)?,
        ReportFormat::Latex => format_latex(runs),
    })
}

/// Format the comparison as a terminal table, one column per run.
pub fn format_table(runs: &[RunSummary]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    let mut header = vec![Cell::new("Metric")];
    header.extend(runs.iter().map(|r| Cell::new(&r.label)));
    table.set_header(header);

    let mut convergence = vec![Cell::new("Convergence")];
    convergence.extend(runs.iter().map(|r| match r.convergence {
        Some(EventOutcome::Converged) => Cell::new("converged").fg(Color::Green),
        Some(other) => Cell::new(other.to_string()).fg(Color::Red),
        None => Cell::new("-"),
    }));
    table.add_row(convergence);

    for row in ROWS {
        let mut cells = vec![Cell::new(row.name)];
        cells.extend(runs.iter().map(|r| Cell::new(format_value((row.value)(r), row.unit))));
        table.add_row(cells);
    }

    let mut output = table.to_string();
    output.push('\n');
    for run in runs {
        if let Some(window) = &run.window {
            output.push_str(&format!(
                "{}: workload window {} .. {} ({:.1}s)\n",
                run.label,
                window.start.format("%Y-%m-%d %H:%M:%S"),
                window.end.format("%H:%M:%S"),
                window.duration_secs()
            ));
        }
    }
    output
}

pub fn format_markdown(runs: &[RunSummary]) -> String {
    let mut output = String::new();
    output.push_str("# Run Comparison\n\n");
    output.push_str("| Metric |");
    for run in runs {
        output.push_str(&format!(" {} |", run.label));
    }
    output.push_str("\n|--------|");
    output.push_str(&"---|".repeat(runs.len()));
    output.push('\n');

    output.push_str("| Convergence |");
    for run in runs {
        let outcome = run
            .convergence
            .map_or_else(|| "-".to_string(), |o| o.to_string());
        output.push_str(&format!(" {outcome} |"));
    }
    output.push('\n');

    for row in ROWS {
        output.push_str(&format!("| {} |", row.name));
        for run in runs {
            output.push_str(&format!(" {} |", format_value((row.value)(run), row.unit)));
        }
        output.push('\n');
    }
    output
}

/// Format the comparison as a LaTeX `table` environment.
pub fn format_latex(runs: &[RunSummary]) -> String {
    let labels: Vec<String> = runs.iter().map(|r| latex_escape(&r.label)).collect();
    let mut lines = vec![
        "\\begin{table}".to_string(),
        "\\centering".to_string(),
        format!("\\begin{{tabular}}{{l{}}}", "|c".repeat(runs.len())),
        "\\hline".to_string(),
        format!("Metric & {} \\\\ \\hline", labels.join(" & ")),
    ];
    for row in ROWS {
        let values: Vec<String> = runs
            .iter()
            .map(|r| latex_escape(&format_value((row.value)(r), row.unit)))
            .collect();
        lines.push(format!("{} & {} \\\\", row.name, values.join(" & ")));
    }
    lines.extend([
        "\\hline".to_string(),
        "\\end{tabular}".to_string(),
        "\\caption{Comparison of performance metrics across network topologies}".to_string(),
        "\\label{tab:topology-comparison}".to_string(),
        "\\end{table}".to_string(),
    ]);
    lines.join("\n")
}

fn latex_escape(s: &str) -> String {
    s.replace('\\', "\\textbackslash{}")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('&', "\\&")
        .replace('#', "\\#")
}

/// Human-readable value with a decimal prefix, e.g. `1.5 MB`.
fn format_value(value: Option<f64>, unit: Unit) -> String {
    let Some(value) = value else {
        return "-".to_string();
    };
    let suffix = unit.suffix();
    if let Unit::Count = unit {
        return format_number(value.round() as u64);
    }
    let scaled = [(1e12, "T"), (1e9, "G"), (1e6, "M"), (1e3, "k")]
        .into_iter()
        .find(|(limit, _)| value > *limit);
    match scaled {
        Some((limit, prefix)) => format!("{:.1} {prefix}{suffix}", value / limit),
        None if value != 0.0 && value.abs() < 0.01 => format!("{value:.2e} {suffix}"),
        None if value < 1.0 => format!("{value:.2} {suffix}"),
        None => format!("{value:.1} {suffix}"),
    }
}

/// Format number with thousands separators.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}
