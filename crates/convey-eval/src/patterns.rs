use std::collections::BTreeMap;

use crate::types::PatternReport;

/// Fixed churn-intent lexicon scanned over missed-case transcripts.
/// Deployment-specific vocabularies extend this via approved
/// `churn_keywords` recommendations on the remote config, not here.
pub const CHURN_LEXICON: [&str; 18] = [
    "cancel",
    "cancellation",
    "leave",
    "leaving",
    "switch",
    "competitor",
    "expensive",
    "terrible",
    "disconnect",
    "porting",
    "port out",
    "complaint",
    "refund",
    "quit",
    "unhappy",
    "not satisfied",
    "bad service",
    "terminate",
];

const MAX_SAMPLE_PHRASES: usize = 10;
const MAX_PHRASE_LEN: usize = 200;
const TOP_KEYWORDS: usize = 20;

/// Count lexicon hits across the transcripts of churners the pipeline
/// missed. Keywords whose occurrence count reaches 10% of the missed-case
/// population are significant; a few sample phrases give reviewers context.
pub fn analyze_patterns(transcripts: &[String]) -> PatternReport {
    if transcripts.is_empty() {
        return PatternReport::default();
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut sample_phrases: Vec<String> = Vec::new();

    for transcript in transcripts {
        let lower = transcript.to_lowercase();
        let mut matched: Vec<&str> = Vec::new();
        for keyword in CHURN_LEXICON {
            let hits = lower.matches(keyword).count();
            if hits > 0 {
                *counts.entry(keyword).or_insert(0) += hits;
                matched.push(keyword);
            }
        }

        if matched.is_empty() || sample_phrases.len() >= MAX_SAMPLE_PHRASES {
            continue;
        }
        // One context sentence per keyword hit, while the budget lasts.
        for sentence in transcript.split('.') {
            let sentence = sentence.trim();
            if sentence.is_empty() || sentence.len() >= MAX_PHRASE_LEN {
                continue;
            }
            let lower_sentence = sentence.to_lowercase();
            if matched.iter().take(2).any(|k| lower_sentence.contains(k)) {
                sample_phrases.push(sentence.to_string());
                if sample_phrases.len() >= MAX_SAMPLE_PHRASES {
                    break;
                }
            }
        }
    }

    let min_occurrences = ((transcripts.len() as f64) * 0.1).max(1.0) as usize;
    let keywords: Vec<String> = counts
        .iter()
        .filter(|(_, &count)| count >= min_occurrences)
        .map(|(k, _)| k.to_string())
        .collect();

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_KEYWORDS);

    PatternReport {
        keywords,
        keyword_counts: ranked,
        sample_phrases,
        missed_count: transcripts.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_gives_empty_report() {
        let report = analyze_patterns(&[]);
        assert!(report.keywords.is_empty());
        assert_eq!(report.missed_count, 0);
    }

    #[test]
    fn frequent_keyword_is_significant() {
        let transcripts: Vec<String> = (0..10)
            .map(|i| {
                if i < 3 {
                    "I want to cancel my plan. It is too expensive for me.".to_string()
                } else {
                    "Everything is fine thanks.".to_string()
                }
            })
            .collect();

        let report = analyze_patterns(&transcripts);
        assert!(report.keywords.contains(&"cancel".to_string()));
        assert!(report.keywords.contains(&"expensive".to_string()));
        assert_eq!(report.missed_count, 10);
        assert!(!report.sample_phrases.is_empty());
        assert!(report.sample_phrases[0].contains("cancel"));
    }

    #[test]
    fn rare_keyword_is_not_significant() {
        let mut transcripts = vec!["thinking about a refund".to_string()];
        for _ in 0..30 {
            transcripts.push("all good".to_string());
        }

        let report = analyze_patterns(&transcripts);
        // 1 occurrence < 10% of 31 cases
        assert!(!report.keywords.contains(&"refund".to_string()));
        // but it still shows up in the ranked counts
        assert!(report
            .keyword_counts
            .iter()
            .any(|(k, c)| k == "refund" && *c == 1));
    }

    #[test]
    fn sample_phrases_capped() {
        let transcripts: Vec<String> = (0..40)
            .map(|i| format!("call {i} says cancel now. rest of call."))
            .collect();
        let report = analyze_patterns(&transcripts);
        assert_eq!(report.sample_phrases.len(), 10);
    }
}
