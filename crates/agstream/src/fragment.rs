//! Internal message fragments produced by the model pipeline.
//!
//! Fragments are provider-agnostic: provider clients normalize their native
//! streaming output into this shape before it reaches the bridge. Tool call
//! ids here are *internal* ids and may be missing.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;

use crate::error::UpstreamError;

/// One unit of streaming output from the model pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    /// Assistant text chunk.
    Text { text: String },

    /// Model began a tool call.
    ToolCallBegin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
    },

    /// Partial tool call arguments (JSON text, not necessarily well-formed on its own).
    ToolCallArgs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        delta: String,
    },

    /// Tool call arguments complete.
    ToolCallEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Result of an executed tool.
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        result: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// Run-level failure reported in-band by the pipeline.
    Error { message: String },
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_begin(id: Option<&str>, name: impl Into<String>) -> Self {
        Self::ToolCallBegin {
            id: id.map(String::from),
            name: name.into(),
        }
    }

    pub fn tool_args(id: Option<&str>, delta: impl Into<String>) -> Self {
        Self::ToolCallArgs {
            id: id.map(String::from),
            delta: delta.into(),
        }
    }

    pub fn tool_end(id: Option<&str>) -> Self {
        Self::ToolCallEnd {
            id: id.map(String::from),
        }
    }

    pub fn tool_result(id: Option<&str>, result: Value) -> Self {
        Self::ToolResult {
            id: id.map(String::from),
            result,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolCallBegin { .. } => "tool_call_begin",
            Self::ToolCallArgs { .. } => "tool_call_args",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
        }
    }

    /// Internal tool call id, if the fragment carries one.
    pub fn internal_id(&self) -> Option<&str> {
        match self {
            Self::ToolCallBegin { id, .. }
            | Self::ToolCallArgs { id, .. }
            | Self::ToolCallEnd { id }
            | Self::ToolResult { id, .. } => id.as_deref(),
            Self::Text { .. } | Self::Error { .. } => None,
        }
    }
}

/// Decode newline-delimited fragment JSON.
///
/// Blank lines are skipped. A line that does not decode yields
/// [`UpstreamError::Decode`]; a failed read yields [`UpstreamError::Io`].
pub fn read_fragments<R>(
    reader: R,
) -> impl Stream<Item = Result<Fragment, UpstreamError>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    LinesStream::new(BufReader::new(reader).lines()).filter_map(|line| async move {
        match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(serde_json::from_str::<Fragment>(&line).map_err(UpstreamError::from)),
            Err(err) => Some(Err(UpstreamError::from(err))),
        }
    })
}
