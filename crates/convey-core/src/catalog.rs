use serde::{Deserialize, Serialize};

use crate::error::{ConveyError, Result};

/// Symbolic conversation kind used in destination composite keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationType {
    Call,
    Wapp,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Call => "CALL",
            DestinationType::Wapp => "WAPP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CALL" => Some(DestinationType::Call),
            "WAPP" => Some(DestinationType::Wapp),
            _ => None,
        }
    }
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-source metadata. Collection, assembly and routing are strictly
/// data-driven off these fields; no component branches on the source key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Stable catalog key (also the `sourceId` outbound attribute).
    pub key: String,
    /// Physical table name inside the attached `src` schema.
    pub table: String,
    pub id_column: String,
    /// Primary time column (collection ordering).
    pub time_column: String,
    /// Fragment time column (per-row timestamps; often the same column).
    pub fragment_time_column: String,
    pub channel_column: String,
    pub text_column: String,
    pub account_column: String,
    pub subscriber_column: String,
    /// Channels allowed to appear in assembled messages.
    pub valid_channels: Vec<String>,
    /// Channels that must all be observed for a conversation to be valid.
    pub required_channels: Vec<String>,
    /// Minimum fragment count per conversation.
    pub min_segments: usize,
    /// Optional extra SQL predicate ANDed into the collectors.
    pub base_filter: Option<String>,
    /// Per-source override of the normal-mode recency window.
    pub time_filter_hours: Option<i64>,
    /// Opaque hint spliced after the table name (`INDEXED BY ...`).
    pub index_hint: Option<String>,
    /// Status-row key for this source's normal mode.
    pub mode_key: String,
    pub destination_type: DestinationType,
    pub enabled: bool,
}

impl SourceEntry {
    /// `table` plus the optional index hint, ready for a FROM clause.
    pub fn table_clause(&self) -> String {
        match &self.index_hint {
            Some(hint) => format!("src.{} {}", self.table, hint),
            None => format!("src.{}", self.table),
        }
    }
}

/// The frozen set of sources this process serves. Built once at startup.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    entries: Vec<SourceEntry>,
}

impl SourceCatalog {
    pub fn new(entries: Vec<SourceEntry>) -> Self {
        Self { entries }
    }

    /// Enabled entries in declared order (the loop's iteration order).
    pub fn enabled(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    pub fn all(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn require(&self, key: &str) -> Result<&SourceEntry> {
        self.get(key).ok_or_else(|| ConveyError::UnknownSource {
            key: key.to_string(),
        })
    }

    /// Destination tag for a catalog key, used by inbound result routing.
    pub fn destination_for(&self, key: &str) -> Option<DestinationType> {
        self.get(key).map(|e| e.destination_type)
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::new(vec![
            SourceEntry {
                key: "verint".to_string(),
                table: "call_transcript".to_string(),
                id_column: "call_id".to_string(),
                time_column: "call_time".to_string(),
                fragment_time_column: "call_time".to_string(),
                channel_column: "owner".to_string(),
                text_column: "text".to_string(),
                account_column: "ban".to_string(),
                subscriber_column: "subscriber_no".to_string(),
                valid_channels: vec!["A".to_string(), "C".to_string()],
                required_channels: vec!["A".to_string(), "C".to_string()],
                min_segments: 10,
                base_filter: None,
                time_filter_hours: None,
                index_hint: Some("INDEXED BY idx_call_transcript_time".to_string()),
                mode_key: "NORMAL_VERINT".to_string(),
                destination_type: DestinationType::Call,
                enabled: true,
            },
            SourceEntry {
                key: "sf_oc".to_string(),
                table: "chat_message".to_string(),
                id_column: "case_id".to_string(),
                time_column: "msg_time".to_string(),
                fragment_time_column: "msg_time".to_string(),
                channel_column: "owner".to_string(),
                text_column: "body".to_string(),
                account_column: "ban".to_string(),
                subscriber_column: "subscriber_no".to_string(),
                valid_channels: vec!["A".to_string(), "B".to_string(), "C".to_string()],
                required_channels: vec!["A".to_string(), "C".to_string()],
                min_segments: 5,
                base_filter: None,
                time_filter_hours: None,
                index_hint: Some("INDEXED BY idx_chat_message_time".to_string()),
                mode_key: "NORMAL_SF_OC".to_string(),
                destination_type: DestinationType::Wapp,
                enabled: true,
            },
        ])
    }
}
