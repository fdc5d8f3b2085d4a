//! Wire protocol types for agstream.
//!
//! This crate defines the event format the streaming bridge emits to UI and
//! agent clients:
//!
//! ```text
//! Model pipeline --[fragments]--> agstream bridge --[protocol events]--> Client
//! ```
//!
//! Clients only speak this protocol. They never see the internal fragment
//! format or the upstream tool call identifiers.
//!
//! ## Design Principles
//!
//! 1. **Closed event set.** `EventPayload` is an exhaustive enum; the
//!    `event` discriminators are the stable external API.
//! 2. **Per-run ordering.** `sequence` is strictly increasing within a run
//!    and carries no meaning across runs.
//! 3. **Terminal guarantee.** Every run ends with `run-finished` or `run-error`.

pub mod events;

pub use events::{Event, EventPayload, RunErrorCode};
