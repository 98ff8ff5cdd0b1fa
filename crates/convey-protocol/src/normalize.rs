use serde_json::Value;

use convey_core::config::{ACTION_ITEMS_MAX_CHARS, SUMMARY_MAX_BYTES};

use crate::result::{
    AnalyticsResult, ClassificationField, FlexValue, SentimentField, SummaryField,
};

/// Canonical form of an analytics result, ready for the destination tables.
///
/// Invariants: `sentiment` and `satisfaction` in 1..=5, `churn_score` in
/// 0..=100, `classification_primary` non-empty, `summary` ≤ 4000 bytes,
/// `action_items` ≤ 500 chars.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    pub call_id: String,
    pub summary: String,
    pub sentiment: i64,
    pub classification_primary: String,
    pub classifications: Vec<String>,
    pub confidence: Option<f64>,
    pub processing_ms: Option<i64>,
    pub model_version: Option<String>,
    pub products: String,
    pub action_items: String,
    pub unresolved_issues: String,
    pub satisfaction: i64,
    pub churn_score: i64,
    /// Parse oddities observed while collapsing polymorphic fields.
    pub diagnostics: Vec<String>,
}

impl NormalizedResult {
    /// Collapse a raw payload into canonical form. `call_id` must already be
    /// known to be present (the ingestor rejects payloads without it).
    pub fn from_raw(call_id: String, raw: &AnalyticsResult) -> Self {
        let mut diagnostics = Vec::new();

        let sentiment = sentiment_score(raw.sentiment.as_ref(), &mut diagnostics);
        let (classification_primary, classifications) =
            classification(raw.classification.as_ref(), raw.classifications.as_deref());
        let summary = truncate_bytes(&summary_text(raw.summary.as_ref()), SUMMARY_MAX_BYTES);

        let products = raw
            .products
            .as_ref()
            .map(flex_to_delimited)
            .unwrap_or_default();
        let unresolved_issues = raw
            .unresolved_issues
            .as_ref()
            .map(flex_to_delimited)
            .unwrap_or_default();
        let action_items = truncate_items(
            &raw.action_items
                .as_ref()
                .map(flex_to_delimited)
                .unwrap_or_default(),
            ACTION_ITEMS_MAX_CHARS,
        );

        let satisfaction = satisfaction_score(raw.customer_satisfaction.as_ref());
        let churn_score = churn_score(raw.churn_confidence);

        Self {
            call_id,
            summary,
            sentiment,
            classification_primary,
            classifications,
            confidence: raw.confidence,
            processing_ms: raw.processing_time,
            model_version: raw.model_version.clone(),
            products,
            action_items,
            unresolved_issues,
            satisfaction,
            churn_score,
            diagnostics,
        }
    }
}

/// Sentiment → 1..=5. Labels map through a fixed table; numbers clamp;
/// objects defer to their `overall`; anything else is 3 (neutral).
fn sentiment_score(field: Option<&SentimentField>, diagnostics: &mut Vec<String>) -> i64 {
    match field {
        None => 3,
        Some(SentimentField::Num(n)) => clamp_i64(n.round() as i64, 1, 5),
        Some(SentimentField::Text(s)) => match s.trim().to_lowercase().as_str() {
            "very positive" => 5,
            "positive" => 4,
            "neutral" | "mixed" | "unknown" => 3,
            "negative" => 2,
            "very negative" => 1,
            other => {
                if let Ok(n) = other.parse::<f64>() {
                    clamp_i64(n.round() as i64, 1, 5)
                } else {
                    diagnostics.push(format!("unmapped sentiment label: {other:?}"));
                    3
                }
            }
        },
        Some(SentimentField::Detail { overall, .. }) => sentiment_score(Some(overall), diagnostics),
    }
}

/// Primary label + deduplicated full label set.
fn classification(
    field: Option<&ClassificationField>,
    flat: Option<&[String]>,
) -> (String, Vec<String>) {
    let mut all: Vec<String> = Vec::new();
    let mut primary = String::new();

    match field {
        Some(ClassificationField::Detail {
            primary: p,
            all: detail_all,
        }) => {
            if let Some(p) = p {
                primary = p.trim().to_string();
            }
            all.extend(detail_all.iter().map(|s| s.trim().to_string()));
        }
        Some(ClassificationField::Text(s)) => {
            primary = s.trim().to_string();
        }
        None => {}
    }

    if let Some(flat) = flat {
        if primary.is_empty() {
            if let Some(first) = flat.iter().find(|s| !s.trim().is_empty()) {
                primary = first.trim().to_string();
            }
        }
        all.extend(flat.iter().map(|s| s.trim().to_string()));
    }

    if primary.is_empty() {
        primary = "unknown".to_string();
    }

    // Dedup preserving first-seen order; primary always participates.
    let mut seen = Vec::new();
    for label in std::iter::once(primary.clone()).chain(all) {
        if !label.is_empty() && !seen.contains(&label) {
            seen.push(label);
        }
    }

    (primary, seen)
}

fn summary_text(field: Option<&SummaryField>) -> String {
    match field {
        None => String::new(),
        Some(SummaryField::Text(s)) => s.trim().to_string(),
        Some(SummaryField::Detail { text }) => text.trim().to_string(),
    }
}

/// Ordered field names tried when a list element is an object.
const ITEM_FIELDS: [&str; 7] = [
    "action",
    "description",
    "name",
    "instructions",
    "task",
    "item",
    "text",
];

/// Collapse a polymorphic list/map/string value into `", "`-delimited text.
pub fn flex_to_delimited(value: &FlexValue) -> String {
    if value.is_empty() {
        return String::new();
    }
    match value {
        FlexValue::Null => String::new(),
        FlexValue::Bool(b) => b.to_string(),
        FlexValue::Num(n) => trim_float(*n),
        FlexValue::Map(map) => map
            .iter()
            .filter(|(_, v)| !json_falsy(v))
            .map(|(k, v)| format!("{}: {}", k, clean_fragment(&json_to_text(v))))
            .collect::<Vec<_>>()
            .join(", "),
        FlexValue::List(items) => {
            let mut parts = Vec::new();
            for item in items {
                let text = match item {
                    FlexValue::Map(map) => match first_item_field(map) {
                        Some(t) => t,
                        None => continue,
                    },
                    FlexValue::Str(s) => s.trim().to_string(),
                    FlexValue::Num(n) => trim_float(*n),
                    _ => continue,
                };
                if text.is_empty() || text.eq_ignore_ascii_case("none") {
                    continue;
                }
                parts.push(clean_fragment(&text));
            }
            parts.join(", ")
        }
        FlexValue::Str(s) => {
            let trimmed = s.trim();
            // A JSON document hiding inside a string gets one recursive pass.
            if let Ok(parsed) = serde_json::from_str::<FlexValue>(trimmed) {
                if matches!(parsed, FlexValue::List(_) | FlexValue::Map(_)) {
                    return flex_to_delimited(&parsed);
                }
            }
            let cleaned = clean_fragment(trimmed);
            cleaned
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// First non-empty value among the known item fields of an object element.
fn first_item_field(map: &serde_json::Map<String, Value>) -> Option<String> {
    for field in ITEM_FIELDS {
        if let Some(v) = map.get(field) {
            let text = json_to_text(v);
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn json_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Bool(b) => !b,
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Number(_) => false,
    }
}

/// Strip structural characters a sloppy upstream may leak into plain text.
fn clean_fragment(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '[' | ']' | '{' | '}' | '"' | '\''))
        .collect::<String>()
        .trim()
        .to_string()
}

fn trim_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Truncate to `max` chars, preferring the last complete `", "` boundary when
/// that keeps at least half the budget; trailing separators are stripped.
pub fn truncate_items(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    let result = match cut.rfind(", ") {
        Some(pos) if pos >= max / 2 => cut[..pos].to_string(),
        _ => cut,
    };
    result
        .trim_end_matches(|c: char| c == ',' || c == ' ')
        .to_string()
}

/// Truncate UTF-8 text to at most `max` bytes on a char boundary.
pub fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn satisfaction_score(field: Option<&FlexValue>) -> i64 {
    match field {
        Some(FlexValue::Num(n)) => clamp_i64(n.round() as i64, 1, 5),
        Some(FlexValue::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(|n| clamp_i64(n.round() as i64, 1, 5))
            .unwrap_or(3),
        _ => 3,
    }
}

fn churn_score(confidence: Option<f64>) -> i64 {
    match confidence {
        Some(c) => clamp_i64((c * 100.0).round() as i64, 0, 100),
        None => 0,
    }
}

fn clamp_i64(v: i64, lo: i64, hi: i64) -> i64 {
    v.max(lo).min(hi)
}
