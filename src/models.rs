use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One evaluation unit: a question, optionally a reference answer and a generated response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_answer: Option<String>,
    /// Fields this tool does not interpret, kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Example {
    /// Response text when present and non-empty
    pub fn answered(&self) -> Option<&str> {
        self.response.as_deref().filter(|r| !r.is_empty())
    }

    /// Reference answer when present and not blank
    pub fn reference(&self) -> Option<&str> {
        self.reference_answer
            .as_deref()
            .filter(|r| !r.trim().is_empty())
    }
}

/// The on-disk example collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleSet {
    pub examples: Vec<Example>,
}

impl ExampleSet {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read examples file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse examples file: {}", path.display()))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize examples to JSON")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write examples to: {}", path.display()))
    }
}

/// Scores recorded for one example in the score pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    /// 1-based position in the input collection
    pub index: usize,
    pub question: String,
    pub response: String,
    pub reference_answer: String,
    pub correctness_score: Option<f64>,
    pub relevance_score: Option<f64>,
    pub faithfulness_score: Option<f64>,
    pub overall_average_score: Option<f64>,
}

impl ScoreRow {
    /// The three metric scores in column order
    pub fn scores(&self) -> [Option<f64>; 3] {
        [
            self.correctness_score,
            self.relevance_score,
            self.faithfulness_score,
        ]
    }
}

/// Justifications recorded for one example in the feedback pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRow {
    pub correctness_feedback: String,
    pub relevance_feedback: String,
    pub faithfulness_feedback: String,
}

/// Descriptive statistics of one score column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub mean: f64,
    /// Sample standard deviation, absent for fewer than two values
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Statistics of the per-row overall average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub mean: f64,
    pub std: Option<f64>,
    pub count: usize,
}

/// Corpus-level summary over all score rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// Only columns with at least one valid score
    pub columns: Vec<ColumnStats>,
    pub overall_average: Option<OverallStats>,
}

impl SummaryStatistics {
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.column == name)
    }
}

/// Everything an evaluation run produces
#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub summary: SummaryStatistics,
    pub rows: Vec<ScoreRow>,
    pub feedback: Vec<FeedbackRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_example_set_keeps_unknown_fields() {
        let json = r#"{"examples": [
            {"query": "What is PlanQK?", "reference_answer": "A platform", "query_by": {"type": "human"}},
            {"query": "Where are the docs?", "response": "See the docs."}
        ]}"#;

        let set: ExampleSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.examples.len(), 2);
        assert_eq!(set.examples[0].reference(), Some("A platform"));
        assert!(set.examples[0].answered().is_none());
        assert_eq!(set.examples[1].answered(), Some("See the docs."));

        let back = serde_json::to_value(&set).unwrap();
        assert_eq!(back["examples"][0]["query_by"]["type"], "human");
        assert!(back["examples"][0].get("response").is_none());
    }

    #[test]
    fn test_empty_response_and_blank_reference_are_missing() {
        let example = Example {
            query: "q".to_string(),
            response: Some(String::new()),
            reference_answer: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(example.answered().is_none());
        assert!(example.reference().is_none());
    }

    #[test]
    fn test_write_and_read_back_non_ascii() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("with_responses.json");
        let set = ExampleSet {
            examples: vec![Example {
                query: "Was ist Quantenüberlegenheit?".to_string(),
                response: Some("Eine Antwort".to_string()),
                ..Default::default()
            }],
        };

        set.write_to(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Quantenüberlegenheit"));
        assert_eq!(ExampleSet::from_file(&path).unwrap().examples, set.examples);
    }

    #[test]
    fn test_read_missing_file() {
        let err = ExampleSet::from_file(Path::new("/nonexistent/examples.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read examples file"));
    }
}
