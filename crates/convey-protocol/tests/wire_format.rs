// Verify wire format matches what the analytics service expects.
// These tests ensure queue-payload compatibility is never broken.

use convey_core::catalog::DestinationType;
use convey_protocol::document::{
    ConversationDocument, ConversationMessage, MessageAttributes, ATTR_TYPE_ASSEMBLY,
    DOC_TYPE_CONVERSATION, ORIGIN,
};
use convey_protocol::result::AnalyticsResult;

fn sample_document() -> ConversationDocument {
    ConversationDocument::new(
        "CALL001",
        "verint",
        DestinationType::Call,
        Some("880011".to_string()),
        Some("0541112222".to_string()),
        Some("2025-10-01T09:00:00+00:00".to_string()),
        vec![
            ConversationMessage {
                channel: "A".to_string(),
                text: "hello".to_string(),
                timestamp: Some("2025-10-01T09:00:00+00:00".to_string()),
            },
            ConversationMessage {
                channel: "C".to_string(),
                text: "hi".to_string(),
                timestamp: Some("2025-10-01T09:00:05+00:00".to_string()),
            },
        ],
    )
}

#[test]
fn conversation_document_serialization() {
    let json = serde_json::to_string(&sample_document()).unwrap();

    assert!(json.contains(r#""type":"CONVERSATION_TO_ML""#));
    assert!(json.contains(r#""callId":"CALL001""#));
    assert!(json.contains(r#""sourceId":"verint""#));
    assert!(json.contains(r#""destinationType":"CALL""#));
    assert!(json.contains(r#""ban":"880011""#));
    assert!(json.contains(r#""subscriberNo":"0541112222""#));
    assert!(json.contains(r#""messageCount":2"#));
    assert!(json.contains(r#""origin":"on-premises-cdc""#));
    // messages keep their lowercase wire keys
    assert!(json.contains(r#""channel":"A""#));
}

#[test]
fn conversation_document_round_trip() {
    let doc = sample_document();
    let json = serde_json::to_string(&doc).unwrap();
    let back: ConversationDocument = serde_json::from_str(&json).unwrap();

    assert_eq!(back.doc_type, DOC_TYPE_CONVERSATION);
    assert_eq!(back.call_id, "CALL001");
    assert_eq!(back.message_count, 2);
    assert_eq!(back.messages.len(), 2);
}

#[test]
fn attributes_for_conversation() {
    let doc = sample_document();
    let attrs = MessageAttributes::for_conversation(&doc);

    assert_eq!(attrs.message_type, ATTR_TYPE_ASSEMBLY);
    assert_eq!(attrs.source, ORIGIN);
    assert_eq!(attrs.call_id, "CALL001");
    assert_eq!(attrs.source_id.as_deref(), Some("verint"));
    assert_eq!(attrs.destination_type.as_deref(), Some("CALL"));

    let json = serde_json::to_string(&attrs).unwrap();
    assert!(json.contains(r#""messageType":"CONVERSATION_ASSEMBLY""#));
    assert!(json.contains(r#""callId":"CALL001""#));
    assert!(json.contains(r#""destinationType":"CALL""#));
}

#[test]
fn result_accepts_snake_and_camel_ids() {
    let camel: AnalyticsResult =
        serde_json::from_str(r#"{"type":"ML_RESULT","callId":"X1"}"#).unwrap();
    assert_eq!(camel.call_id.as_deref(), Some("X1"));

    let snake: AnalyticsResult =
        serde_json::from_str(r#"{"type":"ML_RESULT","call_id":"X2"}"#).unwrap();
    assert_eq!(snake.call_id.as_deref(), Some("X2"));
}

#[test]
fn result_tolerates_polymorphic_payload() {
    let body = r#"{
        "type": "ML_RESULT",
        "callId": "CALL001",
        "sentiment": "positive",
        "classification": {"primary": "BILLING", "all": ["BILLING", "OFFER"]},
        "summary": {"text": "customer asked about an invoice"},
        "products": "[\"Fiber 100\"]",
        "action_items": [{"action": "call back"}],
        "unresolved_issues": null,
        "customer_satisfaction": 4,
        "churn_confidence": 0.82
    }"#;
    let raw = AnalyticsResult::from_json(body).unwrap();
    assert_eq!(raw.call_id.as_deref(), Some("CALL001"));
    assert_eq!(raw.msg_type.as_deref(), Some("ML_RESULT"));
    assert!(raw.sentiment.is_some());
    assert!(raw.products.is_some());
}

#[test]
fn result_missing_type_is_not_a_parse_error() {
    // Gate decisions belong to the ingestor, not the parser.
    let raw = AnalyticsResult::from_json(r#"{"callId":"X"}"#).unwrap();
    assert!(raw.msg_type.is_none());
}
