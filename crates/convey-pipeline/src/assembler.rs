use std::collections::BTreeSet;

use tracing::debug;

use convey_core::catalog::SourceEntry;
use convey_protocol::document::{ConversationDocument, ConversationMessage};
use convey_store::processed::{SKIP_EMPTY, SKIP_MISSING_CHANNELS, SKIP_SHORT};
use convey_store::Store;

/// Why a conversation could not be assembled. Rejection is a normal outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Fewer fragments than the source's minimum.
    Short { fragments: usize, min: usize },
    /// A required channel never spoke.
    MissingChannels { missing: Vec<String> },
    /// Every fragment had empty text.
    Empty,
}

impl RejectReason {
    /// Skip reason recorded when backfill marks the id anyway.
    pub fn skip_reason(&self) -> &'static str {
        match self {
            RejectReason::Short { .. } => SKIP_SHORT,
            RejectReason::MissingChannels { .. } => SKIP_MISSING_CHANNELS,
            RejectReason::Empty => SKIP_EMPTY,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RejectReason::Short { fragments, min } => {
                format!("only {fragments} fragments (min {min})")
            }
            RejectReason::MissingChannels { missing } => {
                format!("missing required channels: {}", missing.join(", "))
            }
            RejectReason::Empty => "no non-empty message text".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum AssemblyOutcome {
    Document(Box<ConversationDocument>),
    Rejected(RejectReason),
}

/// Gather all fragments of one conversation id and build the outbound
/// document, or reject with a reason.
///
/// Gating: a document is emitted iff the fragment count meets the source
/// minimum, every required channel was observed, and at least one fragment
/// carries non-empty text.
pub fn assemble(
    store: &Store,
    entry: &SourceEntry,
    source_id: &str,
) -> convey_store::Result<AssemblyOutcome> {
    let fragments = store.fetch_fragments(entry, source_id)?;

    if fragments.len() < entry.min_segments {
        debug!(source_id = %source_id, fragments = fragments.len(), "rejected: short");
        return Ok(AssemblyOutcome::Rejected(RejectReason::Short {
            fragments: fragments.len(),
            min: entry.min_segments,
        }));
    }

    let observed: BTreeSet<&str> = fragments
        .iter()
        .filter_map(|f| f.channel.as_deref())
        .collect();
    let missing: Vec<String> = entry
        .required_channels
        .iter()
        .filter(|c| !observed.contains(c.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        debug!(source_id = %source_id, missing = ?missing, "rejected: missing channels");
        return Ok(AssemblyOutcome::Rejected(RejectReason::MissingChannels {
            missing,
        }));
    }

    // Empty-text fragments are skipped, not a failure; channels outside the
    // valid set never reach the document.
    let messages: Vec<ConversationMessage> = fragments
        .iter()
        .filter_map(|f| {
            let channel = f.channel.as_deref()?;
            if !entry.valid_channels.iter().any(|c| c == channel) {
                return None;
            }
            let text = f.text.as_deref()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(ConversationMessage {
                channel: channel.to_string(),
                text: text.to_string(),
                timestamp: f.timestamp.clone(),
            })
        })
        .collect();

    if messages.is_empty() {
        return Ok(AssemblyOutcome::Rejected(RejectReason::Empty));
    }

    let first = &fragments[0];
    let doc = ConversationDocument::new(
        source_id,
        entry.key.clone(),
        entry.destination_type,
        first.ban.clone(),
        first.subscriber_no.clone(),
        first.timestamp.clone(),
        messages,
    );

    Ok(AssemblyOutcome::Document(Box::new(doc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use convey_core::catalog::SourceCatalog;

    fn store_with_source() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE src.call_transcript (
                        call_id TEXT, ban TEXT, subscriber_no TEXT,
                        call_time TEXT, owner TEXT, text TEXT
                    );
                    CREATE INDEX src.idx_call_transcript_time
                        ON call_transcript(call_time);",
                )
            })
            .unwrap();
        store
    }

    fn insert(store: &Store, id: &str, seq: usize, owner: &str, text: &str) {
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO src.call_transcript VALUES
                     (?1, '880011', '0541112222', ?2, ?3, ?4)",
                    rusqlite::params![
                        id,
                        format!("2025-10-01T09:00:{seq:02}+00:00"),
                        owner,
                        text
                    ],
                )
            })
            .unwrap();
    }

    #[test]
    fn happy_path_emits_document() {
        let store = store_with_source();
        let catalog = SourceCatalog::default();
        let entry = catalog.get("verint").unwrap();

        for i in 0..12 {
            let owner = if i % 2 == 0 { "A" } else { "C" };
            insert(&store, "CALL001", i, owner, &format!("utterance {i}"));
        }

        match assemble(&store, entry, "CALL001").unwrap() {
            AssemblyOutcome::Document(doc) => {
                assert_eq!(doc.call_id, "CALL001");
                assert_eq!(doc.message_count, 12);
                assert_eq!(doc.destination_type, "CALL");
                assert_eq!(doc.ban.as_deref(), Some("880011"));
                assert_eq!(
                    doc.call_time.as_deref(),
                    Some("2025-10-01T09:00:00+00:00")
                );
            }
            other => panic!("expected document, got {other:?}"),
        }
    }

    #[test]
    fn short_conversation_rejected() {
        let store = store_with_source();
        let catalog = SourceCatalog::default();
        let entry = catalog.get("verint").unwrap();

        for i in 0..4 {
            insert(&store, "CASE42", i, "A", "hi");
        }

        match assemble(&store, entry, "CASE42").unwrap() {
            AssemblyOutcome::Rejected(RejectReason::Short { fragments, min }) => {
                assert_eq!(fragments, 4);
                assert_eq!(min, 10);
            }
            other => panic!("expected short rejection, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_channel_rejected() {
        let store = store_with_source();
        let catalog = SourceCatalog::default();
        let entry = catalog.get("verint").unwrap();

        // 20 fragments, all agent-side.
        for i in 0..20 {
            insert(&store, "CALL002", i, "A", "agent only");
        }

        match assemble(&store, entry, "CALL002").unwrap() {
            AssemblyOutcome::Rejected(RejectReason::MissingChannels { missing }) => {
                assert_eq!(missing, vec!["C".to_string()]);
            }
            other => panic!("expected missing-channels rejection, got {other:?}"),
        }
    }

    #[test]
    fn empty_texts_rejected_but_blanks_skipped() {
        let store = store_with_source();
        let catalog = SourceCatalog::default();
        let entry = catalog.get("verint").unwrap();

        for i in 0..12 {
            let owner = if i % 2 == 0 { "A" } else { "C" };
            insert(&store, "CALL003", i, owner, "   ");
        }
        match assemble(&store, entry, "CALL003").unwrap() {
            AssemblyOutcome::Rejected(RejectReason::Empty) => {}
            other => panic!("expected empty rejection, got {other:?}"),
        }

        // One real message among blanks is enough.
        for i in 0..12 {
            let owner = if i % 2 == 0 { "A" } else { "C" };
            let text = if i == 5 { "the only words" } else { "" };
            insert(&store, "CALL004", i, owner, text);
        }
        match assemble(&store, entry, "CALL004").unwrap() {
            AssemblyOutcome::Document(doc) => {
                assert_eq!(doc.message_count, 1);
                assert_eq!(doc.messages[0].text, "the only words");
            }
            other => panic!("expected document, got {other:?}"),
        }
    }
}
