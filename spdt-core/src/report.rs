//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Deterministic output ordering
//! - Byte-for-byte identical JSON across runs on the same input

use crate::classify::Conclusion;
use crate::functions::FunctionComparison;
use crate::normalize::UnitKind;
use crate::pipeline::InputMode;
use crate::similarity::ScorePolicy;
use serde::Serialize;
use std::time::Duration;

/// One scored unit pair
#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub left: String,
    pub right: String,
    /// Raw line-level similarity
    pub similarity: f64,
    pub conclusion: Conclusion,
    pub anomaly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_link: Option<String>,
}

/// A pair skipped by the node-size pre-filter
#[derive(Debug, Clone, Serialize)]
pub struct ExcludedPair {
    pub left: String,
    pub right: String,
    pub size_difference: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_link: Option<String>,
}

impl ExcludedPair {
    /// Excluded pairs always carry the lowest conclusion.
    pub fn conclusion(&self) -> Conclusion {
        Conclusion::NoMatch
    }
}

/// Per-unit summary
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub id: String,
    pub kind: UnitKind,
    pub size: usize,
    pub hash: String,
    pub parse_errors: bool,
}

/// A submission that could not be normalized or parsed
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionFailure {
    pub path: String,
    pub reason: String,
}

/// Complete result of one detection run
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub mode: InputMode,
    pub units: Vec<UnitReport>,
    /// `None` when the size filter is disabled.
    pub filter_threshold: Option<usize>,
    pub pairs: Vec<PairReport>,
    pub excluded: Vec<ExcludedPair>,
    pub functions: Vec<FunctionComparison>,
    pub failures: Vec<SubmissionFailure>,
    /// Whether diff links were requested for this run.
    pub diff_links: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Sort scored pairs deterministically
pub fn sort_pairs(mut pairs: Vec<PairReport>, policy: ScorePolicy) -> Vec<PairReport> {
    pairs.sort_by(|a, b| {
        // 1. Similarity descending
        policy
            .apply(b.similarity)
            .total_cmp(&policy.apply(a.similarity))
            // 2. Left identifier ascending
            .then_with(|| a.left.cmp(&b.left))
            // 3. Right identifier ascending
            .then_with(|| a.right.cmp(&b.right))
    });
    pairs
}

/// `0.8123` -> `81.23%`; negative scores print their magnitude with `(*)`.
pub fn format_percentage(similarity: f64) -> String {
    let percent = similarity * 100.0;
    if percent < 0.0 {
        format!("{:.2}%(*)", percent.abs())
    } else if percent > 100.0 {
        format!("{:.2}%(*)", percent)
    } else {
        format!("{:.2}%", percent)
    }
}

fn link_cell(link: &Option<String>, enabled: bool) -> String {
    match (link, enabled) {
        (Some(link), _) => link.clone(),
        (None, true) => "unavailable".to_string(),
        (None, false) => "-".to_string(),
    }
}

/// Render a report as text output
pub fn render_text(report: &ComparisonReport) -> String {
    let mut output = String::new();

    let (left_header, right_header) = match report.mode {
        InputMode::Directories => ("Dir 1", "Dir 2"),
        InputMode::Files | InputMode::Mixed => ("File 1", "File 2"),
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    for pair in &report.pairs {
        rows.push(vec![
            pair.left.clone(),
            pair.right.clone(),
            format_percentage(pair.similarity),
            pair.conclusion.as_str().to_string(),
            link_cell(&pair.diff_link, report.diff_links),
        ]);
    }
    for pair in &report.excluded {
        rows.push(vec![
            pair.left.clone(),
            pair.right.clone(),
            "--".to_string(),
            pair.conclusion().as_str().to_string(),
            link_cell(&pair.diff_link, report.diff_links),
        ]);
    }
    output.push_str(&render_table(
        &[
            left_header,
            right_header,
            "Percentage Similarity",
            "Conclusion",
            "HTML Diff Link",
        ],
        &rows,
    ));

    for comparison in &report.functions {
        render_function_section(&mut output, comparison);
    }

    if !report.failures.is_empty() {
        output.push_str("\nSkipped submissions:\n");
        for failure in &report.failures {
            output.push_str(&format!("  {}: {}\n", failure.path, failure.reason));
        }
    }

    output.push_str(&format!(
        "\nExecution time: {:.3} seconds.\n",
        report.elapsed.as_secs_f64()
    ));
    output
}

fn render_function_section(output: &mut String, comparison: &FunctionComparison) {
    output.push_str(&format!(
        "\n* Function comparison for {} and {}:\n",
        comparison.left_unit, comparison.right_unit
    ));
    for (unit, functions) in [
        (&comparison.left_unit, &comparison.left_functions),
        (&comparison.right_unit, &comparison.right_functions),
    ] {
        output.push_str(&format!(
            "\nTotal number of functions in {}: {}\nFunction names:\n",
            unit,
            functions.len()
        ));
        let mut sorted: Vec<&String> = functions.iter().collect();
        sorted.sort();
        for name in sorted {
            output.push_str(name);
            output.push('\n');
        }
    }

    let rows: Vec<Vec<String>> = comparison
        .matches
        .iter()
        .map(|m| {
            vec![
                m.left.clone(),
                m.right.clone(),
                format_percentage(m.similarity),
            ]
        })
        .collect();
    output.push_str("\n* Function based percentage similarity\n");
    output.push_str(&render_table(
        &[
            comparison.left_unit.as_str(),
            comparison.right_unit.as_str(),
            "Percentage Similarity",
        ],
        &rows,
    ));
}

/// Left-aligned columns sized to their widest cell
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    push_row(&mut output, &header_cells, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_row(&mut output, &rule, &widths);
    for row in rows {
        push_row(&mut output, row, &widths);
    }
    output
}

fn push_row(output: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    output.push_str(line.trim_end());
    output.push('\n');
}

/// Render a report as JSON output
pub fn render_json(report: &ComparisonReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}
