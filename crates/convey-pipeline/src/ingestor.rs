use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use convey_core::catalog::{DestinationType, SourceCatalog, SourceEntry};
use convey_core::config::{INBOUND_BATCH_MAX, INBOUND_WAIT_SECS};
use convey_protocol::document::{ATTR_TYPE_RESULT, BODY_TYPE_RESULT};
use convey_protocol::result::AnalyticsResult;
use convey_protocol::NormalizedResult;
use convey_queue::{MessageQueue, QueueMessage};
use convey_store::faults::{KIND_PERSISTENCE, KIND_RESULT_PARSE};
use convey_store::Store;

use crate::dispatcher::PendingSourceTypes;
use crate::error::Result;

/// Counters for one ingestion pass.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PassSummary {
    pub received: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Consumes analytics results from the inbound queue and persists them.
///
/// Messages are only deleted after a successful persist; everything else is
/// left visible so the queue's visibility timeout drives the retry.
pub struct Ingestor {
    queue: Arc<dyn MessageQueue>,
    inbound_queue: String,
    store: Store,
    catalog: SourceCatalog,
    pending: PendingSourceTypes,
}

impl Ingestor {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        inbound_queue: impl Into<String>,
        store: Store,
        catalog: SourceCatalog,
        pending: PendingSourceTypes,
    ) -> Self {
        Self {
            queue,
            inbound_queue: inbound_queue.into(),
            store,
            catalog,
            pending,
        }
    }

    /// One long-poll receive plus per-message processing.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let messages = self
            .queue
            .receive(
                &self.inbound_queue,
                INBOUND_BATCH_MAX,
                Duration::from_secs(INBOUND_WAIT_SECS),
            )
            .await?;

        let mut summary = PassSummary {
            received: messages.len(),
            ..PassSummary::default()
        };

        for message in messages {
            match self.process_message(&message).await {
                MessageOutcome::Written => summary.written += 1,
                MessageOutcome::Skipped => summary.skipped += 1,
                MessageOutcome::Failed => summary.failed += 1,
            }
        }

        if summary.received > 0 {
            info!(
                received = summary.received,
                written = summary.written,
                skipped = summary.skipped,
                failed = summary.failed,
                "ingestion pass"
            );
        }
        Ok(summary)
    }

    /// Drain the inbound queue until a receive comes back empty.
    pub async fn drain(&self) -> Result<PassSummary> {
        let mut total = PassSummary::default();
        loop {
            let pass = self.run_pass().await?;
            if pass.received == 0 {
                break;
            }
            total.received += pass.received;
            total.written += pass.written;
            total.skipped += pass.skipped;
            total.failed += pass.failed;
        }
        Ok(total)
    }

    async fn process_message(&self, message: &QueueMessage) -> MessageOutcome {
        // Gate on the declared type before touching the body. Unknown types
        // stay visible for whatever consumer they belong to.
        if let Some(kind) = message.attribute("messageType") {
            if kind != ATTR_TYPE_RESULT {
                debug!(message_id = %message.message_id, kind = %kind, "skipping non-result message");
                return MessageOutcome::Skipped;
            }
        }

        let raw = match AnalyticsResult::from_json(&message.body) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message_id = %message.message_id, err = %e, "malformed result body");
                let _ = self
                    .store
                    .log_error(&message.message_id, KIND_RESULT_PARSE, &e.to_string());
                return MessageOutcome::Failed;
            }
        };

        if raw.msg_type.as_deref() != Some(BODY_TYPE_RESULT) {
            debug!(message_id = %message.message_id, "body type is not a result; skipping");
            return MessageOutcome::Skipped;
        }

        let Some(call_id) = raw.call_id.clone().filter(|id| !id.is_empty()) else {
            warn!(message_id = %message.message_id, "result without callId");
            let _ = self.store.log_error(
                &message.message_id,
                KIND_RESULT_PARSE,
                "result payload missing callId",
            );
            return MessageOutcome::Failed;
        };

        let normalized = NormalizedResult::from_raw(call_id.clone(), &raw);
        for note in &normalized.diagnostics {
            debug!(source_id = %call_id, note = %note, "normalization diagnostic");
        }

        let (destination, entry) = self.route(&raw, message, &call_id);
        let header = match entry {
            Some(entry) => self.store.source_header(entry, &call_id).ok().flatten(),
            None => None,
        };

        if let Err(e) = self
            .store
            .write_result(destination.as_str(), &normalized, header.as_ref())
        {
            warn!(source_id = %call_id, err = %e, "result persist failed; leaving message visible");
            let _ = self
                .store
                .log_error(&call_id, KIND_PERSISTENCE, &e.to_string());
            return MessageOutcome::Failed;
        }

        if let Err(e) = self
            .queue
            .delete(&self.inbound_queue, &message.receipt)
            .await
        {
            // The write is idempotent; re-delivery converges to the same state.
            warn!(source_id = %call_id, err = %e, "queue delete failed after persist");
        }

        debug!(source_id = %call_id, destination = %destination, "result ingested");
        MessageOutcome::Written
    }

    /// Destination-tag resolution: payload catalog key → pending-map cache →
    /// echoed attribute → `CALL` default (the historical majority source).
    fn route(
        &self,
        raw: &AnalyticsResult,
        message: &QueueMessage,
        call_id: &str,
    ) -> (DestinationType, Option<&SourceEntry>) {
        if let Some(key) = raw.source_id.as_deref() {
            if let Some(entry) = self.catalog.get(key) {
                return (entry.destination_type, Some(entry));
            }
        }

        let cached = self.pending.remove(call_id).map(|(_, tag)| tag);
        let tag = cached
            .as_deref()
            .and_then(DestinationType::parse)
            .or_else(|| {
                message
                    .attribute("destinationType")
                    .and_then(DestinationType::parse)
            })
            .unwrap_or(DestinationType::Call);

        let entry = self
            .catalog
            .enabled()
            .find(|e| e.destination_type == tag);
        (tag, entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MessageOutcome {
    Written,
    Skipped,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use convey_queue::{QueueError, SendReceipt};

    /// Queue double preloaded with inbound messages; records deletes.
    #[derive(Default)]
    struct MockQueue {
        pub inbound: Mutex<Vec<QueueMessage>>,
        pub deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageQueue for MockQueue {
        async fn send(
            &self,
            _queue: &str,
            _body: &str,
            _attributes: &HashMap<String, String>,
        ) -> convey_queue::error::Result<SendReceipt> {
            Err(QueueError::SendFailed("not used".to_string()))
        }

        async fn receive(
            &self,
            _queue: &str,
            max: usize,
            _wait: Duration,
        ) -> convey_queue::error::Result<Vec<QueueMessage>> {
            let mut inbound = self.inbound.lock().unwrap();
            let take = inbound.len().min(max);
            Ok(inbound.drain(..take).collect())
        }

        async fn delete(&self, _queue: &str, receipt: &str) -> convey_queue::error::Result<()> {
            self.deleted.lock().unwrap().push(receipt.to_string());
            Ok(())
        }

        async fn probe(&self, _queue: &str) -> convey_queue::error::Result<()> {
            Ok(())
        }
    }

    fn message(body: &str, attrs: &[(&str, &str)]) -> QueueMessage {
        QueueMessage {
            message_id: "m-1".to_string(),
            receipt: "r-1".to_string(),
            body: body.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn ingestor_with(messages: Vec<QueueMessage>) -> (Ingestor, Arc<MockQueue>, Store) {
        let store = Store::open_in_memory().unwrap();
        let queue = Arc::new(MockQueue {
            inbound: Mutex::new(messages),
            deleted: Mutex::new(Vec::new()),
        });
        let pending: PendingSourceTypes = Arc::new(DashMap::new());
        let ingestor = Ingestor::new(
            queue.clone(),
            "inbound",
            store.clone(),
            SourceCatalog::default(),
            pending,
        );
        (ingestor, queue, store)
    }

    const RESULT_BODY: &str = r#"{"type":"ML_RESULT","callId":"CALL001",
        "sentiment":"positive",
        "classification":{"primary":"BILLING","all":["BILLING","OFFER"]},
        "churn_confidence":0.82,"customer_satisfaction":4,
        "summary":{"text":"invoice question"}}"#;

    #[tokio::test]
    async fn result_persisted_and_deleted() {
        let (ingestor, queue, store) = ingestor_with(vec![message(
            RESULT_BODY,
            &[("messageType", "ML_PROCESSING_RESULT")],
        )]);

        let summary = ingestor.run_pass().await.unwrap();
        assert_eq!(summary.received, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(queue.deleted.lock().unwrap().len(), 1);

        let sentiment: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT sentiment FROM conversation_summary
                     WHERE destination_type = 'CALL' AND source_id = 'CALL001'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(sentiment, 4);
    }

    #[tokio::test]
    async fn unknown_sentiment_string_stores_neutral() {
        let body = r#"{"type":"ML_RESULT","callId":"CALL003","sentiment":"unknown"}"#;
        let (ingestor, _, store) =
            ingestor_with(vec![message(body, &[("messageType", "ML_PROCESSING_RESULT")])]);

        ingestor.run_pass().await.unwrap();

        let sentiment: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT sentiment FROM conversation_summary WHERE source_id = 'CALL003'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(sentiment, 3);
    }

    #[tokio::test]
    async fn foreign_message_types_left_visible() {
        let (ingestor, queue, _) = ingestor_with(vec![message(
            r#"{"type":"SOMETHING_ELSE"}"#,
            &[("messageType", "OTHER")],
        )]);

        let summary = ingestor.run_pass().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(queue.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_left_visible_and_logged() {
        let (ingestor, queue, store) = ingestor_with(vec![message(
            "{not json",
            &[("messageType", "ML_PROCESSING_RESULT")],
        )]);

        let summary = ingestor.run_pass().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(queue.deleted.lock().unwrap().is_empty());
        assert_eq!(store.error_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn routing_prefers_pending_map_then_attribute() {
        // No sourceId in payload; pending map says WAPP.
        let body = r#"{"type":"ML_RESULT","callId":"CASE42","sentiment":2}"#;
        let (ingestor, _, store) =
            ingestor_with(vec![message(body, &[("messageType", "ML_PROCESSING_RESULT")])]);
        ingestor
            .pending
            .insert("CASE42".to_string(), "WAPP".to_string());

        ingestor.run_pass().await.unwrap();
        assert!(ingestor.pending.get("CASE42").is_none(), "cache popped on use");

        let destination: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT destination_type FROM conversation_summary WHERE source_id = 'CASE42'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(destination, "WAPP");
    }

    #[tokio::test]
    async fn routing_falls_back_to_attribute_then_default() {
        let body = r#"{"type":"ML_RESULT","callId":"CASE43"}"#;
        let (ingestor, _, store) = ingestor_with(vec![
            message(
                body,
                &[
                    ("messageType", "ML_PROCESSING_RESULT"),
                    ("destinationType", "WAPP"),
                ],
            ),
            QueueMessage {
                message_id: "m-2".to_string(),
                receipt: "r-2".to_string(),
                body: r#"{"type":"ML_RESULT","callId":"CASE44"}"#.to_string(),
                attributes: [("messageType".to_string(), "ML_PROCESSING_RESULT".to_string())]
                    .into_iter()
                    .collect(),
            },
        ]);

        ingestor.run_pass().await.unwrap();

        let attr_routed: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT destination_type FROM conversation_summary WHERE source_id = 'CASE43'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(attr_routed, "WAPP");

        let defaulted: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT destination_type FROM conversation_summary WHERE source_id = 'CASE44'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(defaulted, "CALL");
    }

    #[tokio::test]
    async fn payload_source_key_wins_over_cache() {
        let body = r#"{"type":"ML_RESULT","callId":"CASE45","sourceId":"sf_oc"}"#;
        let (ingestor, _, store) =
            ingestor_with(vec![message(body, &[("messageType", "ML_PROCESSING_RESULT")])]);
        // Stale cache entry pointing the wrong way must lose.
        ingestor
            .pending
            .insert("CASE45".to_string(), "CALL".to_string());

        ingestor.run_pass().await.unwrap();

        let destination: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT destination_type FROM conversation_summary WHERE source_id = 'CASE45'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(destination, "WAPP");
    }
}
