//! Protocol event types.
//!
//! Events are the wire contract between the streaming bridge and the UI/agent
//! client. Each event belongs to exactly one run and carries a per-run
//! sequence number; consumers can rebuild the run purely from the ordered
//! event stream.
//!
//! A run always starts with `run-started` and ends with exactly one of
//! `run-finished` or `run-error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

// ============================================================================
// Event envelope
// ============================================================================

/// A protocol event with run routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Which run this event belongs to.
    pub run_id: String,

    /// Strictly increasing within a run, starting at 1.
    pub sequence: u64,

    /// Unix ms timestamp.
    pub ts: i64,

    /// The event payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(run_id: impl Into<String>, sequence: u64, payload: EventPayload) -> Self {
        Self {
            run_id: run_id.into(),
            sequence,
            ts: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Shorthand for `self.payload.kind()`.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Whether this event closes its run.
    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}

// ============================================================================
// Event payloads
// ============================================================================

/// All protocol event kinds, tagged by the `event` field.
///
/// The discriminators are part of the external API and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventPayload {
    // -- Run framing --
    /// Run accepted; always the first event of a run.
    RunStarted,

    /// Run completed normally.
    RunFinished,

    /// Run failed. No further events follow for this run.
    RunError {
        code: RunErrorCode,
        message: String,
        recoverable: bool,
    },

    // -- Content --
    /// Assistant text fragment.
    TextDelta { delta: String },

    // -- Tool calls --
    /// Model began a tool call.
    ToolCallStarted {
        tool_call_id: String,
        tool_name: String,
    },

    /// Partial tool call arguments (usually a JSON fragment).
    ToolCallArgsDelta { tool_call_id: String, delta: String },

    /// Tool call arguments complete.
    ///
    /// `duration_ms` is zero when the start of the call was never observed.
    ToolCallEnded {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[ts(type = "number")]
        duration_ms: u64,
    },

    /// Output of an executed tool.
    ToolCallResult {
        tool_call_id: String,
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl EventPayload {
    /// Wire discriminator of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted => "run-started",
            Self::RunFinished => "run-finished",
            Self::RunError { .. } => "run-error",
            Self::TextDelta { .. } => "text-delta",
            Self::ToolCallStarted { .. } => "tool-call-started",
            Self::ToolCallArgsDelta { .. } => "tool-call-args-delta",
            Self::ToolCallEnded { .. } => "tool-call-ended",
            Self::ToolCallResult { .. } => "tool-call-result",
        }
    }

    /// `run-finished` and `run-error` close a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished | Self::RunError { .. })
    }

    /// External tool call id, for tool call events.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallStarted { tool_call_id, .. }
            | Self::ToolCallArgsDelta { tool_call_id, .. }
            | Self::ToolCallEnded { tool_call_id, .. }
            | Self::ToolCallResult { tool_call_id, .. } => Some(tool_call_id),
            Self::RunStarted
            | Self::RunFinished
            | Self::RunError { .. }
            | Self::TextDelta { .. } => None,
        }
    }
}

// ============================================================================
// Supporting types
// ============================================================================

/// Why a run ended with `run-error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorCode {
    /// The model pipeline reported a failure.
    UpstreamError,
    /// The model pipeline timed out.
    Timeout,
    /// An upstream fragment could not be decoded.
    DecodeError,
    /// The run was cancelled before completion.
    Cancelled,
}

impl std::fmt::Display for RunErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpstreamError => write!(f, "upstream_error"),
            Self::Timeout => write!(f, "timeout"),
            Self::DecodeError => write!(f, "decode_error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunErrorCode {
    /// Whether retrying the same request can reasonably succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event {
            run_id: "run_abc".to_string(),
            sequence: 3,
            ts: 1738764000000,
            payload: EventPayload::TextDelta {
                delta: "Hello".to_string(),
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"text-delta\""));
        assert!(json.contains("\"delta\":\"Hello\""));
        assert!(json.contains("\"run_id\":\"run_abc\""));
        assert!(json.contains("\"sequence\":3"));
    }

    #[test]
    fn test_unit_payload_flattened() {
        let event = Event {
            run_id: "run_abc".to_string(),
            sequence: 1,
            ts: 1738764000000,
            payload: EventPayload::RunStarted,
        };

        let parsed: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed["event"], "run-started");
        assert_eq!(parsed["run_id"], "run_abc");
        // Payload fields live at the top level, never under a wrapper key.
        assert!(parsed.get("payload").is_none());

        let back: Event = serde_json::from_value(parsed).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_tool_call_ended_omits_unknown_name() {
        let payload = EventPayload::ToolCallEnded {
            tool_call_id: "call_1".to_string(),
            tool_name: None,
            duration_ms: 0,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"event\":\"tool-call-ended\""));
        assert!(!json.contains("tool_name"));
    }

    #[test]
    fn test_run_error_code_wire_names() {
        let payload = EventPayload::RunError {
            code: RunErrorCode::DecodeError,
            message: "bad fragment".to_string(),
            recoverable: false,
        };

        let parsed: Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(parsed["event"], "run-error");
        assert_eq!(parsed["code"], "decode_error");
        assert_eq!(RunErrorCode::DecodeError.to_string(), "decode_error");
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        let payloads = vec![
            EventPayload::RunStarted,
            EventPayload::RunFinished,
            EventPayload::RunError {
                code: RunErrorCode::Cancelled,
                message: "cancelled".to_string(),
                recoverable: true,
            },
            EventPayload::TextDelta {
                delta: "x".to_string(),
            },
            EventPayload::ToolCallStarted {
                tool_call_id: "call_1".to_string(),
                tool_name: "search".to_string(),
            },
            EventPayload::ToolCallArgsDelta {
                tool_call_id: "call_1".to_string(),
                delta: "{}".to_string(),
            },
            EventPayload::ToolCallEnded {
                tool_call_id: "call_1".to_string(),
                tool_name: Some("search".to_string()),
                duration_ms: 12,
            },
            EventPayload::ToolCallResult {
                tool_call_id: "call_1".to_string(),
                result: serde_json::json!({"hits": 2}),
                is_error: false,
            },
        ];

        for payload in payloads {
            let parsed: Value = serde_json::to_value(&payload).unwrap();
            assert_eq!(parsed["event"], payload.kind());
        }
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventPayload::RunFinished.is_terminal());
        assert!(
            EventPayload::RunError {
                code: RunErrorCode::Timeout,
                message: String::new(),
                recoverable: true,
            }
            .is_terminal()
        );
        assert!(!EventPayload::RunStarted.is_terminal());
        assert!(
            !EventPayload::TextDelta {
                delta: String::new()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_tool_result_defaults_is_error() {
        let json = r#"{"event":"tool-call-result","tool_call_id":"call_9","result":"ok"}"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(
            payload,
            EventPayload::ToolCallResult {
                tool_call_id: "call_9".to_string(),
                result: Value::String("ok".to_string()),
                is_error: false,
            }
        );
        assert_eq!(payload.tool_call_id(), Some("call_9"));
    }
}
