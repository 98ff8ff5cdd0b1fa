use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recommendation kinds persisted in `rec_type`.
pub const REC_CHURN_THRESHOLD: &str = "churn_threshold";
pub const REC_CHURN_KEYWORDS: &str = "churn_keywords";
pub const REC_PIPELINE_COVERAGE: &str = "pipeline_coverage";
pub const REC_CLASSIFICATION_FIX: &str = "classification_fix";

/// Review lifecycle of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for RecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecStatus::Pending => "PENDING",
            RecStatus::Approved => "APPROVED",
            RecStatus::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RecStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RecStatus::Pending),
            "APPROVED" => Ok(RecStatus::Approved),
            "REJECTED" => Ok(RecStatus::Rejected),
            other => Err(format!("unknown recommendation status: {other}")),
        }
    }
}

/// A not-yet-persisted recommendation produced by an evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationDraft {
    pub rec_type: String,
    pub details: Value,
}

/// One churned subscriber joined with their pre-churn call history.
#[derive(Debug, Clone)]
pub struct ChurnedSubscriber {
    pub subscriber_no: String,
    pub status: String,
    pub status_date: Option<String>,
    /// Highest predicted churn score across all their prior calls.
    pub max_churn_score: Option<i64>,
    pub call_count: i64,
}

/// Outcome-vs-prediction metrics for one evaluation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalMetrics {
    pub total_churned: usize,
    pub with_score: usize,
    pub without_score: usize,
    pub high_risk_caught: usize,
    pub medium_plus_caught: usize,
    /// Share of scored churners whose max score met the high threshold.
    pub recall_high: f64,
    /// Share of scored churners whose max met the medium threshold
    /// (the primary recall metric).
    pub recall_medium: f64,
    /// Share of churners that had any scored call.
    pub coverage: f64,
    pub avg_churn_score: f64,
}

/// Keyword findings across the transcripts of missed churners.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternReport {
    /// Keywords that cleared the significance bar.
    pub keywords: Vec<String>,
    /// Occurrence counts for the top keywords.
    pub keyword_counts: Vec<(String, usize)>,
    pub sample_phrases: Vec<String>,
    pub missed_count: usize,
}
