use serde::Deserialize;
use serde_json::Value;

/// A field whose shape varies across analytics model versions: absent, plain
/// string, number, list, object, or a JSON document encoded into a string.
///
/// The raw union never leaves this crate; `normalize` collapses it into
/// canonical delimited text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FlexValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<FlexValue>),
    Map(serde_json::Map<String, Value>),
}

impl FlexValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FlexValue::Null => true,
            FlexValue::Str(s) => s.trim().is_empty(),
            FlexValue::List(l) => l.is_empty(),
            FlexValue::Map(m) => m.is_empty(),
            _ => false,
        }
    }
}

/// Sentiment as delivered by the analytics service: a 1–5 number, a label
/// string, or `{ "overall": ..., "score": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SentimentField {
    Num(f64),
    Text(String),
    Detail {
        overall: Box<SentimentField>,
        #[serde(default)]
        score: Option<f64>,
    },
}

/// Classification: a bare primary label or `{ "primary": ..., "all": [...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClassificationField {
    Text(String),
    Detail {
        #[serde(default)]
        primary: Option<String>,
        #[serde(default)]
        all: Vec<String>,
    },
}

/// Summary: a bare string or `{ "text": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SummaryField {
    Text(String),
    Detail { text: String },
}

/// Raw analytics-result payload from the inbound queue.
///
/// Every field except `call_id` is optional; missing fields take the
/// documented defaults during normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsResult {
    #[serde(rename = "type", default)]
    pub msg_type: Option<String>,
    #[serde(rename = "callId", alias = "call_id", alias = "source_id", default)]
    pub call_id: Option<String>,
    /// Catalog key echoed back by the analytics service, when present.
    #[serde(rename = "sourceId", alias = "source_catalog_id", default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub summary: Option<SummaryField>,
    #[serde(default)]
    pub sentiment: Option<SentimentField>,
    #[serde(default)]
    pub classification: Option<ClassificationField>,
    #[serde(default)]
    pub classifications: Option<Vec<String>>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(rename = "processingTime", alias = "processing_time", default)]
    pub processing_time: Option<i64>,
    #[serde(rename = "modelVersion", alias = "model_version", default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub products: Option<FlexValue>,
    #[serde(rename = "action_items", alias = "actionItems", default)]
    pub action_items: Option<FlexValue>,
    #[serde(rename = "unresolved_issues", alias = "unresolvedIssues", default)]
    pub unresolved_issues: Option<FlexValue>,
    #[serde(
        rename = "customer_satisfaction",
        alias = "customerSatisfaction",
        default
    )]
    pub customer_satisfaction: Option<FlexValue>,
    #[serde(rename = "churn_confidence", alias = "churnConfidence", default)]
    pub churn_confidence: Option<f64>,
}

impl AnalyticsResult {
    /// Parse a queue message body. The declared `type` is NOT validated here;
    /// the ingestor gates on it so unknown types can be skipped, not errored.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}
