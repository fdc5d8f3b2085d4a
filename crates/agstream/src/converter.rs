//! Translator from internal message fragments to protocol events.
//!
//! One converter instance is one run: it owns the run id, the sequence
//! counter and the partial tool call state of that run. Converters are never
//! shared between runs, so concurrent runs cannot observe each other's
//! partial arguments. Tool call identities go through the shared
//! [`ToolCallTracker`].
//!
//! ## Design Rules
//!
//! 1. One fragment produces 0..N events (returned as `Vec`), in order.
//! 2. Every event takes the next sequence number; nothing is reordered.
//! 3. Run framing (`run-started`, `run-finished`, `run-error`) shares the
//!    same sequence counter as content events.
//! 4. No I/O happens here; delivery is the publisher's job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agstream_protocol::{Event, EventPayload, RunErrorCode};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ArgsMode, ConverterConfig};
use crate::fragment::Fragment;
use crate::tracker::ToolCallTracker;

// ============================================================================
// Session state
// ============================================================================

/// A tool call whose arguments are still streaming.
#[derive(Debug, Clone)]
struct PendingToolCall {
    tool_name: String,
    arguments: String,
}

/// Milliseconds, saturating at `u64::MAX`.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn new_run_id() -> String {
    format!("run_{}", Uuid::new_v4().simple())
}

// ============================================================================
// Converter
// ============================================================================

/// Converts fragments of a single run into protocol events.
pub struct MessageConverter {
    tracker: Arc<ToolCallTracker>,
    config: ConverterConfig,

    run_id: String,

    /// Sequence number of the last produced event (0 = nothing produced yet).
    sequence: u64,

    /// Set once a `run-error` has been produced.
    terminal: bool,

    /// External id -> in-flight tool call.
    pending: HashMap<String, PendingToolCall>,

    /// Most recently started tool call, for fragments that omit their id.
    current_tool_call: Option<String>,
}

impl MessageConverter {
    pub fn new(tracker: Arc<ToolCallTracker>, config: ConverterConfig) -> Self {
        Self {
            tracker,
            config,
            run_id: new_run_id(),
            sequence: 0,
            terminal: false,
            pending: HashMap::new(),
            current_tool_call: None,
        }
    }

    /// Start a new run: fresh run id, sequence back to zero, partial state dropped.
    pub fn reset(&mut self) {
        self.discard();
        self.run_id = new_run_id();
        self.sequence = 0;
        self.terminal = false;
    }

    /// Drop the session's partial state, including timing entries of tool
    /// calls that started in this run and never ended.
    pub fn discard(&mut self) {
        let mut discarded = 0usize;
        for tool_call_id in self
            .pending
            .drain()
            .map(|(id, _)| id)
            .chain(self.current_tool_call.take())
        {
            if self.tracker.discard_tool_call(&tool_call_id) {
                discarded += 1;
            }
        }
        if discarded > 0 {
            debug!(run_id = %self.run_id, discarded, "discarded unfinished tool calls");
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Sequence number of the last produced event.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether a `run-error` has been produced for this run.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Accumulated argument text of an in-flight tool call.
    pub fn pending_arguments(&self, tool_call_id: &str) -> Option<&str> {
        self.pending
            .get(tool_call_id)
            .map(|call| call.arguments.as_str())
    }

    fn event(&mut self, payload: EventPayload) -> Event {
        self.sequence += 1;
        Event::new(self.run_id.clone(), self.sequence, payload)
    }

    // -- Run framing --

    pub fn run_started(&mut self) -> Event {
        self.event(EventPayload::RunStarted)
    }

    pub fn run_finished(&mut self) -> Event {
        self.event(EventPayload::RunFinished)
    }

    /// Produce a `run-error` and mark the session terminal.
    pub fn run_error(&mut self, code: RunErrorCode, message: impl Into<String>) -> Event {
        self.terminal = true;
        self.event(EventPayload::RunError {
            code,
            message: message.into(),
            recoverable: code.is_recoverable(),
        })
    }

    // -- Fragment conversion --

    /// Convert one fragment into zero or more events.
    pub fn convert(&mut self, fragment: &Fragment) -> Vec<Event> {
        if self.terminal {
            warn!(
                run_id = %self.run_id,
                kind = fragment.kind(),
                "converting fragment after run error"
            );
        }

        match fragment {
            Fragment::Text { text } => vec![self.event(EventPayload::TextDelta {
                delta: text.clone(),
            })],
            Fragment::ToolCallBegin { id, name } => self.on_tool_begin(id.as_deref(), name),
            Fragment::ToolCallArgs { id, delta } => self.on_tool_args(id.as_deref(), delta),
            Fragment::ToolCallEnd { id } => self.on_tool_end(id.as_deref()),
            Fragment::ToolResult {
                id,
                result,
                is_error,
            } => self.on_tool_result(id.as_deref(), result, *is_error),
            Fragment::Error { message } => {
                vec![self.run_error(RunErrorCode::UpstreamError, message.clone())]
            }
        }
    }

    /// External id for an args/end fragment.
    ///
    /// Fragments without an id belong to the most recently started call.
    fn resolve_in_flight(&self, internal_id: Option<&str>) -> String {
        match internal_id.filter(|id| !id.is_empty()) {
            Some(id) => self.tracker.get_tool_call_id(Some(id)),
            None => match &self.current_tool_call {
                Some(current) => current.clone(),
                None => self.tracker.get_tool_call_id(None),
            },
        }
    }

    fn on_tool_begin(&mut self, internal_id: Option<&str>, name: &str) -> Vec<Event> {
        let tool_call_id = self.tracker.get_or_create_tool_call_id(internal_id);
        self.tracker.start_tool_call(&tool_call_id, name);

        debug!(
            run_id = %self.run_id,
            internal_id = internal_id.unwrap_or_default(),
            tool_call_id = %tool_call_id,
            tool_name = name,
            "tool call started"
        );

        self.pending.insert(
            tool_call_id.clone(),
            PendingToolCall {
                tool_name: name.to_string(),
                arguments: String::new(),
            },
        );
        self.current_tool_call = Some(tool_call_id.clone());

        vec![self.event(EventPayload::ToolCallStarted {
            tool_call_id,
            tool_name: name.to_string(),
        })]
    }

    fn on_tool_args(&mut self, internal_id: Option<&str>, delta: &str) -> Vec<Event> {
        let tool_call_id = self.resolve_in_flight(internal_id);

        let call = self
            .pending
            .entry(tool_call_id.clone())
            .or_insert_with(|| PendingToolCall {
                tool_name: String::new(),
                arguments: String::new(),
            });
        call.arguments.push_str(delta);

        match self.config.args_mode {
            ArgsMode::Stream => vec![self.event(EventPayload::ToolCallArgsDelta {
                tool_call_id,
                delta: delta.to_string(),
            })],
            ArgsMode::Coalesce => vec![],
        }
    }

    fn on_tool_end(&mut self, internal_id: Option<&str>) -> Vec<Event> {
        let tool_call_id = self.resolve_in_flight(internal_id);
        let pending = self.pending.remove(&tool_call_id);
        if self.current_tool_call.as_deref() == Some(tool_call_id.as_str()) {
            self.current_tool_call = None;
        }

        let mut events = Vec::new();

        if self.config.args_mode == ArgsMode::Coalesce
            && let Some(call) = pending.as_ref().filter(|c| !c.arguments.is_empty())
        {
            events.push(self.event(EventPayload::ToolCallArgsDelta {
                tool_call_id: tool_call_id.clone(),
                delta: call.arguments.clone(),
            }));
        }

        let tool_name = self
            .tracker
            .tool_name(&tool_call_id)
            .or_else(|| pending.map(|c| c.tool_name).filter(|n| !n.is_empty()));
        let duration_ms = whole_millis(self.tracker.end_tool_call(&tool_call_id));

        debug!(
            run_id = %self.run_id,
            tool_call_id = %tool_call_id,
            duration_ms,
            "tool call ended"
        );

        events.push(self.event(EventPayload::ToolCallEnded {
            tool_call_id,
            tool_name,
            duration_ms,
        }));

        events
    }

    fn on_tool_result(
        &mut self,
        internal_id: Option<&str>,
        result: &Value,
        is_error: bool,
    ) -> Vec<Event> {
        let tool_call_id = self.tracker.get_tool_call_id(internal_id);
        vec![self.event(EventPayload::ToolCallResult {
            tool_call_id,
            result: result.clone(),
            is_error,
        })]
    }
}

// ============================================================================
// Tests
// ============================================================================
