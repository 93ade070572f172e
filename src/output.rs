use crate::judge::Metric;
use crate::models::{EvaluationReport, FeedbackRow, ScoreRow, SummaryStatistics};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DETAILED_FILE: &str = "evaluation_results_detailed.csv";
pub const SUMMARY_FILE: &str = "evaluation_summary_stats.csv";
pub const FEEDBACK_FILE: &str = "evaluation_results_with_feedback.csv";

/// Spreadsheet applications use this to detect UTF-8
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Output format options
#[derive(Debug, Clone, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Where the tables of one run were written
#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub detailed: PathBuf,
    pub summary: PathBuf,
    pub with_feedback: PathBuf,
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn detailed_header() -> Vec<String> {
    let mut header = vec![
        "index".to_string(),
        "question".to_string(),
        "response".to_string(),
        "reference_answer".to_string(),
    ];
    header.extend(Metric::ALL.iter().map(Metric::score_column));
    header.push("overall_average_score".to_string());
    header
}

fn detailed_record(row: &ScoreRow) -> Vec<String> {
    let mut record = vec![
        row.index.to_string(),
        row.question.clone(),
        row.response.clone(),
        row.reference_answer.clone(),
    ];
    record.extend(row.scores().into_iter().map(format_optional));
    record.push(format_optional(row.overall_average_score));
    record
}

/// Flatten the summary into named cells, skipping columns without data
pub fn summary_cells(summary: &SummaryStatistics) -> Vec<(String, String)> {
    let mut cells = Vec::new();
    for stats in &summary.columns {
        cells.push((format!("{}_mean", stats.column), stats.mean.to_string()));
        cells.push((format!("{}_std", stats.column), format_optional(stats.std)));
        cells.push((format!("{}_min", stats.column), stats.min.to_string()));
        cells.push((format!("{}_max", stats.column), stats.max.to_string()));
        cells.push((format!("{}_count", stats.column), stats.count.to_string()));
    }
    if let Some(overall) = &summary.overall_average {
        cells.push(("overall_average_mean".to_string(), overall.mean.to_string()));
        cells.push(("overall_average_std".to_string(), format_optional(overall.std)));
        cells.push(("overall_average_count".to_string(), overall.count.to_string()));
    }
    cells
}

/// Open a `;`-separated CSV writer behind a UTF-8 BOM
fn csv_writer(path: &Path) -> Result<csv::Writer<File>> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create: {}", path.display()))?;
    file.write_all(UTF8_BOM)
        .with_context(|| format!("Failed to write to: {}", path.display()))?;
    Ok(csv::WriterBuilder::new().delimiter(b';').from_writer(file))
}

/// Write a table; one without columns is left as a bare BOM
fn write_table(path: &Path, header: &[String], records: &[Vec<String>]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    if !header.is_empty() {
        writer
            .write_record(header)
            .with_context(|| format!("Failed to write CSV header: {}", path.display()))?;
        for record in records {
            writer
                .write_record(record)
                .with_context(|| format!("Failed to write CSV row: {}", path.display()))?;
        }
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush: {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = records.len(), "table written");
    Ok(())
}

fn feedback_record(row: &ScoreRow, feedback: &FeedbackRow) -> Vec<String> {
    let mut record = detailed_record(row);
    record.push(feedback.correctness_feedback.clone());
    record.push(feedback.relevance_feedback.clone());
    record.push(feedback.faithfulness_feedback.clone());
    record
}

/// Write the detailed, summary and feedback tables into `out_dir`
pub fn write_reports(report: &EvaluationReport, out_dir: &Path) -> Result<ReportPaths> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

    let paths = ReportPaths {
        detailed: out_dir.join(DETAILED_FILE),
        summary: out_dir.join(SUMMARY_FILE),
        with_feedback: out_dir.join(FEEDBACK_FILE),
    };

    let records: Vec<Vec<String>> = report.rows.iter().map(detailed_record).collect();
    write_table(&paths.detailed, &detailed_header(), &records)?;

    let (names, values): (Vec<String>, Vec<String>) =
        summary_cells(&report.summary).into_iter().unzip();
    write_table(&paths.summary, &names, &[values])?;

    let mut header = detailed_header();
    header.extend(Metric::ALL.iter().map(Metric::feedback_column));
    let records: Vec<Vec<String>> = report
        .rows
        .iter()
        .zip(&report.feedback)
        .map(|(row, feedback)| feedback_record(row, feedback))
        .collect();
    write_table(&paths.with_feedback, &header, &records)?;

    Ok(paths)
}

/// Print the run summary in the specified format
pub fn print_summary(report: &EvaluationReport, paths: &ReportPaths, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print_plain(report, paths),
        OutputFormat::Json => print_json(report, paths),
    }
}

/// Print results in plain text format
fn print_plain(report: &EvaluationReport, paths: &ReportPaths) {
    println!("Evaluation finished: {} examples", report.rows.len());
    println!();
    println!("📊 QUICK SUMMARY");
    println!("----------------");
    print_statistics_plain(&report.summary);
    println!();
    println!("Detailed results:   {}", paths.detailed.display());
    println!("Summary statistics: {}", paths.summary.display());
    println!("With feedback:      {}", paths.with_feedback.display());
}

/// Print statistics in plain text format
fn print_statistics_plain(stats: &SummaryStatistics) {
    if stats.columns.is_empty() {
        println!("No statistics available.");
        return;
    }

    println!(
        "{:<20} {:<8} {:<8} {:<6} {:<6} {:<6}",
        "Metric", "Mean", "Std", "Min", "Max", "Count"
    );
    println!("{}", "-".repeat(59));

    for column in Metric::ALL
        .iter()
        .filter_map(|metric| stats.column(&metric.score_column()))
    {
        let std = column
            .std
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<8.3} {:<8} {:<6.2} {:<6.2} {:<6}",
            column.column, column.mean, std, column.min, column.max, column.count
        );
    }

    if let Some(overall) = &stats.overall_average {
        let std = overall
            .std
            .map(|s| format!(" ± {:.3}", s))
            .unwrap_or_default();
        println!();
        println!(
            "Overall average: {:.3}{} (n={})",
            overall.mean, std, overall.count
        );
    }
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    summary: &'a SummaryStatistics,
    examples: usize,
    files: &'a ReportPaths,
}

/// Print results in JSON format
fn print_json(report: &EvaluationReport, paths: &ReportPaths) {
    let summary = JsonSummary {
        summary: &report.summary,
        examples: report.rows.len(),
        files: paths,
    };
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing summary to JSON: {}", e),
    }
}
