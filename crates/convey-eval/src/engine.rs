use tracing::{info, warn};

use convey_core::catalog::{DestinationType, SourceCatalog};
use convey_core::config::EvalConfig;
use convey_store::Store;

use crate::db::init_eval_db;
use crate::error::{EvalError, Result};
use crate::outcomes::{collect_churned, compute_metrics, latest_call_id, missed_churners};
use crate::patterns::analyze_patterns;
use crate::recommend::{
    analyze_classification_feedback, generate_recommendations, store_evaluation_history,
    store_recommendations,
};
use crate::types::EvalMetrics;

/// What a run produced, for the operator summary.
#[derive(Debug)]
pub struct EvalRunSummary {
    pub metrics: EvalMetrics,
    pub recommendations: Vec<String>,
}

/// One weekly evaluation: outcomes → metrics → missed-case patterns →
/// recommendations → history. Nothing is auto-applied.
pub fn run_weekly_evaluation(
    store: &Store,
    catalog: &SourceCatalog,
    config: &EvalConfig,
) -> Result<EvalRunSummary> {
    store.with_conn(init_eval_db)?;

    let entry = catalog
        .enabled()
        .find(|e| e.destination_type == DestinationType::Call)
        .ok_or(EvalError::NoCallSource)?;

    let churned = collect_churned(store, entry, config.outcome_days)?;
    info!(
        churned = churned.len(),
        days = config.outcome_days,
        "collected churn outcomes"
    );

    if churned.is_empty() {
        warn!("no churned subscribers in the window - evaluation cannot proceed");
        return Ok(EvalRunSummary {
            metrics: EvalMetrics::default(),
            recommendations: Vec::new(),
        });
    }

    let metrics = compute_metrics(
        &churned,
        config.high_risk_threshold,
        config.medium_risk_threshold,
    );
    info!(
        recall = format!("{:.1}%", metrics.recall_medium * 100.0),
        coverage = format!("{:.1}%", metrics.coverage * 100.0),
        avg_score = format!("{:.1}", metrics.avg_churn_score),
        "prediction metrics"
    );

    // Most-recent transcript per missed churner feeds the keyword scan.
    let missed = missed_churners(&churned, config.medium_risk_threshold);
    let mut transcripts = Vec::with_capacity(missed.len());
    for subscriber in &missed {
        if let Some(call_id) = latest_call_id(store, entry, &subscriber.subscriber_no)? {
            let text = store.transcript(entry, &call_id)?;
            if !text.is_empty() {
                transcripts.push(text);
            }
        }
    }
    let patterns = analyze_patterns(&transcripts);
    if !patterns.keywords.is_empty() {
        info!(keywords = ?patterns.keywords, "significant missed-case keywords");
    }

    let mut drafts = generate_recommendations(
        &metrics,
        &patterns,
        config.high_risk_threshold,
        config.medium_risk_threshold,
    );
    if let Some(feedback) = analyze_classification_feedback(store)? {
        drafts.push(feedback);
    }

    store_recommendations(store, &drafts)?;
    store_evaluation_history(store, &metrics, drafts.len())?;

    info!(
        recommendations = drafts.len(),
        "evaluation complete - awaiting human approval"
    );

    Ok(EvalRunSummary {
        metrics,
        recommendations: drafts.into_iter().map(|d| d.rec_type).collect(),
    })
}
