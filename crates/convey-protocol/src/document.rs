use chrono::Utc;
use serde::{Deserialize, Serialize};

use convey_core::catalog::DestinationType;

// Wire constants must match what the analytics service expects
pub const DOC_TYPE_CONVERSATION: &str = "CONVERSATION_TO_ML";
pub const ATTR_TYPE_ASSEMBLY: &str = "CONVERSATION_ASSEMBLY";
pub const ATTR_TYPE_RESULT: &str = "ML_PROCESSING_RESULT";
pub const BODY_TYPE_RESULT: &str = "ML_RESULT";
pub const ORIGIN: &str = "on-premises-cdc";

/// One utterance inside an assembled conversation.
/// Wire: `{ "channel": "A", "text": "...", "timestamp": "2025-10-01T09:00:00Z" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Assembled conversation sent to the analytics service.
///
/// Exists only between assembly and dispatch; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDocument {
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Conversation-level identifier from the source table.
    pub call_id: String,
    /// Catalog key of the originating source.
    pub source_id: String,
    pub destination_type: String,
    pub ban: Option<String>,
    pub subscriber_no: Option<String>,
    pub call_time: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub message_count: usize,
    pub assembled_at: String,
    pub origin: String,
}

impl ConversationDocument {
    pub fn new(
        call_id: impl Into<String>,
        source_key: impl Into<String>,
        destination_type: DestinationType,
        ban: Option<String>,
        subscriber_no: Option<String>,
        call_time: Option<String>,
        messages: Vec<ConversationMessage>,
    ) -> Self {
        let message_count = messages.len();
        Self {
            doc_type: DOC_TYPE_CONVERSATION.to_string(),
            call_id: call_id.into(),
            source_id: source_key.into(),
            destination_type: destination_type.as_str().to_string(),
            ban,
            subscriber_no,
            call_time,
            messages,
            message_count,
            assembled_at: Utc::now().to_rfc3339(),
            origin: ORIGIN.to_string(),
        }
    }
}

/// String attributes carried next to the outbound payload.
///
/// `destination_type` travels here unconditionally so result routing never
/// depends on this process still being alive when the result comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttributes {
    #[serde(rename = "messageType")]
    pub message_type: String,
    pub source: String,
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "sourceId", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(rename = "destinationType", skip_serializing_if = "Option::is_none")]
    pub destination_type: Option<String>,
    pub timestamp: String,
}

impl MessageAttributes {
    pub fn for_conversation(doc: &ConversationDocument) -> Self {
        Self {
            message_type: ATTR_TYPE_ASSEMBLY.to_string(),
            source: ORIGIN.to_string(),
            call_id: doc.call_id.clone(),
            source_id: Some(doc.source_id.clone()),
            destination_type: Some(doc.destination_type.clone()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
