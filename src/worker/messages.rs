//! Messages exchanged between pages and the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ControlError;

const CONTROL_MESSAGE_TYPES: [&str; 2] = ["updateCacheStrategy", "cacheResources"];

/// Page → worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    UpdateCacheStrategy {
        #[serde(rename = "cacheFirst")]
        cache_first: bool,
    },
    CacheResources {
        resources: Vec<String>,
        #[serde(rename = "forceUpdate", default)]
        force_update: bool,
    },
}

impl ControlMessage {
    /// Decode a message, rejecting unknown `type` values explicitly.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ControlError> {
        let value: Value = serde_json::from_slice(bytes)?;

        match value.get("type").and_then(Value::as_str) {
            None => return Err(ControlError::MissingType),
            Some(kind) if !CONTROL_MESSAGE_TYPES.contains(&kind) => {
                return Err(ControlError::UnknownType(kind.to_string()));
            }
            Some(_) => {}
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateCacheStrategy { .. } => CONTROL_MESSAGE_TYPES[0],
            Self::CacheResources { .. } => CONTROL_MESSAGE_TYPES[1],
        }
    }
}

/// Final tallies of one prefetch job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub updated: usize,
    pub total: usize,
}

/// Worker → page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    CacheProgress {
        current: usize,
        total: usize,
        url: String,
    },
    CacheComplete(PrefetchSummary),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_strategy_update() {
        let message = ControlMessage::from_slice(br#"{"type":"updateCacheStrategy","cacheFirst":true}"#)
            .expect("decodes");
        assert_eq!(
            message,
            ControlMessage::UpdateCacheStrategy { cache_first: true }
        );
        assert_eq!(message.kind(), "updateCacheStrategy");
    }

    #[test]
    fn force_update_defaults_to_false() {
        let message = ControlMessage::from_slice(
            br#"{"type":"cacheResources","resources":["a.json","https://cdn.example/b.png"]}"#,
        )
        .expect("decodes");
        assert_eq!(
            message,
            ControlMessage::CacheResources {
                resources: vec!["a.json".into(), "https://cdn.example/b.png".into()],
                force_update: false,
            }
        );
    }

    #[test]
    fn unknown_types_are_rejected() {
        let err = ControlMessage::from_slice(br#"{"type":"clearEverything"}"#)
            .expect_err("unknown type");
        assert!(matches!(err, ControlError::UnknownType(kind) if kind == "clearEverything"));

        let err = ControlMessage::from_slice(br#"{"cacheFirst":true}"#).expect_err("no type");
        assert!(matches!(err, ControlError::MissingType));

        let err = ControlMessage::from_slice(br#"{"type":"updateCacheStrategy"}"#)
            .expect_err("missing field");
        assert!(matches!(err, ControlError::Malformed(_)));
    }

    #[test]
    fn worker_messages_use_page_field_names() {
        let progress = WorkerMessage::CacheProgress {
            current: 10,
            total: 12,
            url: "img/cat.png".into(),
        };
        assert_eq!(
            serde_json::to_value(&progress).expect("serializes"),
            json!({"type": "cacheProgress", "current": 10, "total": 12, "url": "img/cat.png"})
        );

        let complete = WorkerMessage::CacheComplete(PrefetchSummary {
            success: 2,
            failed: 1,
            skipped: 3,
            updated: 1,
            total: 6,
        });
        assert_eq!(
            serde_json::to_value(&complete).expect("serializes"),
            json!({
                "type": "cacheComplete",
                "success": 2,
                "failed": 1,
                "skipped": 3,
                "updated": 1,
                "total": 6
            })
        );
    }
}
