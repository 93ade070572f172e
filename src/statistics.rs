use crate::judge::Metric;
use crate::models::{ColumnStats, OverallStats, ScoreRow, SummaryStatistics};

/// Mean of the present scores of one row
pub fn row_average(scores: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = scores.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(calculate_mean(&present))
}

/// Fill in `overall_average_score` on every row
pub fn apply_row_averages(rows: &mut [ScoreRow]) {
    for row in rows {
        row.overall_average_score = row_average(&row.scores());
    }
}

/// Reduce score rows into per-column and overall statistics.
///
/// Absent scores are ignored; a column without a single valid score
/// contributes nothing.
pub fn summarize(rows: &[ScoreRow]) -> SummaryStatistics {
    let columns = Metric::ALL
        .iter()
        .filter_map(|metric| {
            let scores: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.scores()[metric.position()])
                .collect();
            column_stats(&metric.score_column(), &scores)
        })
        .collect();

    let averages: Vec<f64> = rows
        .iter()
        .filter_map(|r| r.overall_average_score)
        .collect();
    let overall_average = if averages.is_empty() {
        None
    } else {
        Some(OverallStats {
            mean: calculate_mean(&averages),
            std: calculate_std(&averages),
            count: averages.len(),
        })
    };

    SummaryStatistics {
        columns,
        overall_average,
    }
}

fn column_stats(column: &str, scores: &[f64]) -> Option<ColumnStats> {
    if scores.is_empty() {
        return None;
    }

    Some(ColumnStats {
        column: column.to_string(),
        mean: calculate_mean(scores),
        std: calculate_std(scores),
        min: scores.iter().copied().fold(f64::INFINITY, f64::min),
        max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count: scores.len(),
    })
}

/// Calculate mean of scores
fn calculate_mean(scores: &[f64]) -> f64 {
    let sum: f64 = scores.iter().sum();
    sum / scores.len() as f64
}

/// Sample standard deviation, undefined below two values
fn calculate_std(scores: &[f64]) -> Option<f64> {
    if scores.len() < 2 {
        return None;
    }
    let mean = calculate_mean(scores);
    let squared: f64 = scores.iter().map(|s| (s - mean).powi(2)).sum();
    Some((squared / (scores.len() - 1) as f64).sqrt())
}
