//! Change notifications published after a successful poll cycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Notification kind. Only data refreshes are announced today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    #[serde(rename = "DATA_UPDATED")]
    DataUpdated,
}

/// Wire body: `{"type": "DATA_UPDATED", "timestamp": <epoch ms>, ...summary}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub summary: Map<String, Value>,
}

impl UpdateEvent {
    pub fn data_updated(summary: Map<String, Value>) -> Self {
        Self {
            kind: UpdateKind::DataUpdated,
            timestamp: epoch_millis(OffsetDateTime::now_utc()),
            summary,
        }
    }

    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message)
    }
}

/// Topic name for a dataset: `"<domain>:<dataset>:updated"`.
pub fn updated_topic(domain: &str, dataset: &str) -> String {
    format!("{domain}:{dataset}:updated")
}

pub fn epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_fields_are_flattened_next_to_type_and_timestamp() {
        let mut summary = Map::new();
        summary.insert(String::from("count"), Value::from(7));
        let event = UpdateEvent {
            kind: UpdateKind::DataUpdated,
            timestamp: 1_700_000_000_000,
            summary,
        };

        let message = event.to_message().expect("event serializes");
        let json: Value = serde_json::from_str(&message).expect("valid json");

        assert_eq!(json["type"], "DATA_UPDATED");
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(json["count"], 7);
        assert_eq!(UpdateEvent::from_message(&message).expect("parses"), event);
    }

    #[test]
    fn topics_follow_domain_dataset_convention() {
        assert_eq!(updated_topic("vaults", "list"), "vaults:list:updated");
    }
}
