use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error};

use convey_core::config::PERMANENT_FAILURE_CYCLES;
use convey_protocol::document::{ConversationDocument, MessageAttributes};
use convey_queue::MessageQueue;
use convey_store::faults::KIND_SEND_FAILED;
use convey_store::processed::SKIP_PERMANENT_FAILURE;
use convey_store::Store;

use crate::error::{PipelineError, Result};

/// Best-effort cache mapping in-flight source ids to their destination tag,
/// consulted by the ingestor when a result payload omits routing fields.
/// Loss on restart is acceptable; the outbound attributes carry the tag too.
pub type PendingSourceTypes = Arc<DashMap<String, String>>;

/// Sends assembled conversations and records the processed id.
///
/// No in-process retry: a failed send leaves the id unmarked, so the next
/// cycle's collector re-observes it.
pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    outbound_queue: String,
    store: Store,
    pending: PendingSourceTypes,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        outbound_queue: impl Into<String>,
        store: Store,
        pending: PendingSourceTypes,
    ) -> Self {
        Self {
            queue,
            outbound_queue: outbound_queue.into(),
            store,
            pending,
        }
    }

    /// Send one document. On success the processed-ID store reflects the id
    /// before this returns; on failure an error-log entry is appended and the
    /// id stays unmarked (natural retry), except after
    /// `PERMANENT_FAILURE_CYCLES` consecutive failures, when the id is
    /// promoted to the permanent-failures table and retired.
    pub async fn dispatch(&self, doc: &ConversationDocument) -> Result<String> {
        let attributes = MessageAttributes::for_conversation(doc);
        let attr_map = attribute_map(&attributes);
        let body = serde_json::to_string(doc).map_err(convey_core::ConveyError::from)?;

        match self
            .queue
            .send(&self.outbound_queue, &body, &attr_map)
            .await
        {
            Ok(receipt) => {
                self.store.mark_processed(
                    &doc.call_id,
                    doc.call_time.as_deref(),
                    Some(&receipt.message_id),
                )?;
                self.pending
                    .insert(doc.call_id.clone(), doc.destination_type.clone());
                debug!(source_id = %doc.call_id, message_id = %receipt.message_id, "dispatched");
                Ok(receipt.message_id)
            }
            Err(e) => {
                error!(source_id = %doc.call_id, err = %e, "send failed");
                let retries = self
                    .store
                    .log_error(&doc.call_id, KIND_SEND_FAILED, &e.to_string())?;
                if retries >= PERMANENT_FAILURE_CYCLES {
                    self.store.record_permanent_failure(
                        &doc.call_id,
                        KIND_SEND_FAILED,
                        &e.to_string(),
                        retries,
                    )?;
                    self.store.mark_skipped(
                        &doc.call_id,
                        doc.call_time.as_deref(),
                        SKIP_PERMANENT_FAILURE,
                    )?;
                }
                Err(PipelineError::Queue(e))
            }
        }
    }
}

fn attribute_map(attrs: &MessageAttributes) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("messageType".to_string(), attrs.message_type.clone());
    map.insert("source".to_string(), attrs.source.clone());
    map.insert("callId".to_string(), attrs.call_id.clone());
    if let Some(source_id) = &attrs.source_id {
        map.insert("sourceId".to_string(), source_id.clone());
    }
    if let Some(tag) = &attrs.destination_type {
        map.insert("destinationType".to_string(), tag.clone());
    }
    map.insert("timestamp".to_string(), attrs.timestamp.clone());
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use convey_core::catalog::DestinationType;
    use convey_queue::{QueueError, QueueMessage, SendReceipt};

    /// Scripted queue double: records sends, fails on demand.
    #[derive(Default)]
    struct MockQueue {
        pub sent: Mutex<Vec<(String, String, HashMap<String, String>)>>,
        pub fail_sends: Mutex<bool>,
    }

    #[async_trait]
    impl MessageQueue for MockQueue {
        async fn send(
            &self,
            queue: &str,
            body: &str,
            attributes: &HashMap<String, String>,
        ) -> convey_queue::error::Result<SendReceipt> {
            if *self.fail_sends.lock().unwrap() {
                return Err(QueueError::SendFailed("scripted failure".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((queue.to_string(), body.to_string(), attributes.clone()));
            Ok(SendReceipt {
                message_id: format!("m-{}", sent.len()),
            })
        }

        async fn receive(
            &self,
            _queue: &str,
            _max: usize,
            _wait: Duration,
        ) -> convey_queue::error::Result<Vec<QueueMessage>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _queue: &str, _receipt: &str) -> convey_queue::error::Result<()> {
            Ok(())
        }

        async fn probe(&self, _queue: &str) -> convey_queue::error::Result<()> {
            Ok(())
        }
    }

    fn document() -> ConversationDocument {
        ConversationDocument::new(
            "CALL001",
            "verint",
            DestinationType::Call,
            Some("880011".to_string()),
            None,
            Some("2025-10-01T09:00:00+00:00".to_string()),
            vec![convey_protocol::document::ConversationMessage {
                channel: "A".to_string(),
                text: "hello".to_string(),
                timestamp: None,
            }],
        )
    }

    #[tokio::test]
    async fn successful_dispatch_marks_and_caches() {
        let store = Store::open_in_memory().unwrap();
        let queue = Arc::new(MockQueue::default());
        let pending: PendingSourceTypes = Arc::new(DashMap::new());
        let dispatcher = Dispatcher::new(queue.clone(), "outbound", store.clone(), pending.clone());

        dispatcher.dispatch(&document()).await.unwrap();

        assert!(store.is_processed("CALL001").unwrap());
        assert_eq!(pending.get("CALL001").unwrap().value(), "CALL");

        let sent = queue.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (queue_name, body, attrs) = &sent[0];
        assert_eq!(queue_name, "outbound");
        assert!(body.contains(r#""callId":"CALL001""#));
        assert_eq!(
            attrs.get("messageType").map(String::as_str),
            Some("CONVERSATION_ASSEMBLY")
        );
        assert_eq!(attrs.get("callId").map(String::as_str), Some("CALL001"));
        assert_eq!(attrs.get("destinationType").map(String::as_str), Some("CALL"));
    }

    #[tokio::test]
    async fn failed_send_leaves_id_unmarked() {
        let store = Store::open_in_memory().unwrap();
        let queue = Arc::new(MockQueue::default());
        *queue.fail_sends.lock().unwrap() = true;
        let pending: PendingSourceTypes = Arc::new(DashMap::new());
        let dispatcher = Dispatcher::new(queue, "outbound", store.clone(), pending.clone());

        assert!(dispatcher.dispatch(&document()).await.is_err());
        assert!(!store.is_processed("CALL001").unwrap());
        assert!(pending.get("CALL001").is_none());
        assert_eq!(store.error_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_failures_promote_to_permanent() {
        let store = Store::open_in_memory().unwrap();
        let queue = Arc::new(MockQueue::default());
        *queue.fail_sends.lock().unwrap() = true;
        let pending: PendingSourceTypes = Arc::new(DashMap::new());
        let dispatcher = Dispatcher::new(queue, "outbound", store.clone(), pending);

        for _ in 0..PERMANENT_FAILURE_CYCLES {
            let _ = dispatcher.dispatch(&document()).await;
        }

        // Retired: marked with a skip reason, recorded as permanent.
        assert!(store.is_processed("CALL001").unwrap());
        let permanent: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM cdc_permanent_failures", [], |r| {
                    r.get(0)
                })
            })
            .unwrap();
        assert_eq!(permanent, 1);
    }
}
