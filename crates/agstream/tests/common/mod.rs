//! Test utilities and common setup.
#![allow(dead_code)]

use agstream::protocol::Event;
use agstream::{Fragment, UpstreamError};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;

/// Upstream source yielding the given items, then ending.
pub fn source(
    items: Vec<Result<Fragment, UpstreamError>>,
) -> BoxStream<'static, Result<Fragment, UpstreamError>> {
    stream::iter(items).boxed()
}

/// Upstream source yielding the given fragments, then never ending.
pub fn hanging_source(fragments: Vec<Fragment>) -> BoxStream<'static, Result<Fragment, UpstreamError>> {
    stream::iter(fragments.into_iter().map(Ok))
        .chain(stream::pending())
        .boxed()
}

/// Text, then a complete `search` tool call with internal id `abc`.
pub fn hello_search() -> Vec<Result<Fragment, UpstreamError>> {
    vec![
        Ok(Fragment::text("Hello")),
        Ok(Fragment::tool_begin(Some("abc"), "search")),
        Ok(Fragment::tool_args(Some("abc"), "{\"q\":\"x\"}")),
        Ok(Fragment::tool_end(Some("abc"))),
        Ok(Fragment::tool_result(Some("abc"), json!({"hits": 3}))),
    ]
}

pub fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

/// Exactly one terminal event, and it is the last one.
pub fn assert_single_terminal(events: &[Event]) {
    let terminal = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal, 1, "expected one terminal event in {:?}", kinds(events));
    assert!(events.last().is_some_and(|e| e.is_terminal()));
}

/// Same run id everywhere, sequences strictly increasing from 1.
pub fn assert_well_ordered(events: &[Event]) {
    let Some(first) = events.first() else {
        panic!("no events");
    };
    assert_eq!(first.kind(), "run-started");
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.run_id, first.run_id);
        assert_eq!(event.sequence, index as u64 + 1);
    }
}
