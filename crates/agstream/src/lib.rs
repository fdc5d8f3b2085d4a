//! Streaming bridge from model message fragments to agent UI protocol events.
//!
//! ```text
//! Model pipeline --[Fragment]--> MessageConverter --[Event]--> EventPublisher --> EventStream --> transport
//!                                      |
//!                               ToolCallTracker (shared per conversation)
//! ```
//!
//! - [`fragment`]: the provider-agnostic input format and its NDJSON reader.
//! - [`tracker`]: internal to external tool call id mapping and call timing.
//! - [`converter`]: per-run state machine turning fragments into events.
//! - [`publisher`]: ordered, bounded event hand-off to the transport.
//! - [`middleware`]: drives a run end to end and guarantees a single terminal event.
//!
//! The wire types live in the `agstream-protocol` crate, re-exported as
//! [`protocol`].

pub mod config;
pub mod converter;
pub mod error;
pub mod fragment;
pub mod logging;
pub mod middleware;
pub mod publisher;
pub mod tracker;

pub use agstream_protocol as protocol;

pub use config::{AgstreamConfig, ArgsMode, ConverterConfig, OverflowPolicy, PublisherConfig};
pub use converter::MessageConverter;
pub use error::{BridgeError, BridgeResult, UpstreamError};
pub use fragment::{Fragment, read_fragments};
pub use middleware::{RunHandle, RunOutcome, RunState, StreamingMiddleware, spawn_run};
pub use publisher::{EventPublisher, EventStream};
pub use tracker::ToolCallTracker;
