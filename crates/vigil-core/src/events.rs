use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::BusError;
use crate::classification::ClassificationLabel;

/// Topic every submission notification is published on.
pub const SUBMISSIONS_TOPIC: &str = "submissions";

/// Event kinds the dispatcher publishes on the submissions topic.
/// Kinds are forwarded verbatim, so unknown ones pass through too.
pub mod kinds {
    pub const INGESTED: &str = "SubmissionIngested";
    pub const RECEIVED: &str = "SubmissionReceived";
    pub const STARTED: &str = "SubmissionStarted";
    pub const COMPLETED: &str = "SubmissionCompleted";
}

/// One bus message: `{"msg_type": <kind>, "msg": <submission projection>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub msg_type: String,
    pub msg: Value,
}

impl SubmissionEvent {
    pub fn new(kind: impl Into<String>, msg: Value) -> Self {
        Self {
            msg_type: kind.into(),
            msg,
        }
    }

    /// Decode a message as published by an external dispatcher.
    pub fn from_json(raw: &str) -> Result<Self, BusError> {
        let event: Self =
            serde_json::from_str(raw).map_err(|e| BusError::Decode(e.to_string()))?;
        if event.msg_type.is_empty() {
            return Err(BusError::Decode("empty msg_type".into()));
        }
        Ok(event)
    }

    pub fn kind(&self) -> &str {
        &self.msg_type
    }

    /// The payload's `classification`, or `default` when absent or not a string.
    pub fn classification(&self, default: &ClassificationLabel) -> ClassificationLabel {
        self.msg
            .get("classification")
            .and_then(Value::as_str)
            .map_or_else(|| default.clone(), ClassificationLabel::from)
    }

    /// The submission identifier (`sid`) carried by the payload.
    pub fn submission_id(&self) -> Option<&str> {
        self.msg.get("sid").and_then(Value::as_str)
    }
}
