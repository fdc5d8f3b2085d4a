//! Run orchestration: upstream fragments in, framed protocol events out.
//!
//! A [`StreamingMiddleware`] drives exactly one run. It pulls fragments from
//! the upstream source, converts them, publishes the results, and frames the
//! run with `run-started` and a single terminal event.
//!
//! ## Run lifecycle
//!
//! ```text
//! NotStarted --first fragment / end / failure--> Running
//! Running --upstream completes------------------> Finished   (run-finished)
//! Running --upstream fails / error fragment-----> Errored    (run-error)
//! Running --cancelled---------------------------> Errored    (run-error: cancelled)
//! Running --publisher closed--------------------> Errored    (no event; Err to caller)
//! ```
//!
//! Whatever happens upstream, the consumer sees exactly one terminal event,
//! unless the consumer itself is the thing that went away.

use std::pin::pin;
use std::sync::Arc;

use agstream_protocol::{Event, RunErrorCode};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AgstreamConfig, ConverterConfig};
use crate::converter::MessageConverter;
use crate::error::{BridgeResult, UpstreamError};
use crate::fragment::Fragment;
use crate::publisher::{EventPublisher, EventStream};
use crate::tracker::ToolCallTracker;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    NotStarted,
    Running,
    Finished,
    Errored,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    /// Always `Finished` or `Errored`.
    pub state: RunState,
    pub events_published: u64,
}

/// What the upstream produced next.
enum Next {
    Fragment(Fragment),
    Failed(UpstreamError),
    Done,
    Cancelled,
}

/// Drives one run from an upstream fragment source to a publisher.
pub struct StreamingMiddleware {
    converter: MessageConverter,
    publisher: EventPublisher,
    state: RunState,
}

impl StreamingMiddleware {
    pub fn new(
        tracker: Arc<ToolCallTracker>,
        publisher: EventPublisher,
        config: ConverterConfig,
    ) -> Self {
        Self {
            converter: MessageConverter::new(tracker, config),
            publisher,
            state: RunState::NotStarted,
        }
    }

    pub fn run_id(&self) -> &str {
        self.converter.run_id()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run to completion.
    ///
    /// Upstream failures and cancellation end the run with a `run-error`
    /// event and still return `Ok`. Only a publisher failure (consumer gone)
    /// returns `Err`. Either way the converter session is discarded (timing
    /// entries of unfinished tool calls leave the shared tracker) and the
    /// publisher is closed on return.
    pub async fn run<S>(mut self, source: S, cancel: CancellationToken) -> BridgeResult<RunOutcome>
    where
        S: Stream<Item = Result<Fragment, UpstreamError>>,
    {
        let run_id = self.converter.run_id().to_string();
        let result = self.drive(source, &cancel).await;
        self.converter.discard();
        self.publisher.close();

        match result {
            Ok(()) => {
                info!(
                    run_id = %run_id,
                    state = %self.state,
                    events = self.publisher.published(),
                    "run complete"
                );
                Ok(RunOutcome {
                    run_id,
                    state: self.state,
                    events_published: self.publisher.published(),
                })
            }
            Err(err) => {
                self.state = RunState::Errored;
                warn!(run_id = %run_id, error = %err, "run aborted");
                Err(err)
            }
        }
    }

    async fn drive<S>(&mut self, source: S, cancel: &CancellationToken) -> BridgeResult<()>
    where
        S: Stream<Item = Result<Fragment, UpstreamError>>,
    {
        let mut source = pin!(source);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Cancelled,
                item = source.next() => match item {
                    Some(Ok(fragment)) => Next::Fragment(fragment),
                    Some(Err(err)) => Next::Failed(err),
                    None => Next::Done,
                },
            };

            if self.state == RunState::NotStarted {
                let started = self.converter.run_started();
                self.publish(started).await?;
                self.state = RunState::Running;
                info!(run_id = %self.converter.run_id(), "run started");
            }

            match next {
                Next::Fragment(fragment) => {
                    debug!(
                        run_id = %self.converter.run_id(),
                        kind = fragment.kind(),
                        internal_id = fragment.internal_id().unwrap_or_default(),
                        "fragment"
                    );
                    let events = self.converter.convert(&fragment);
                    self.publisher.publish_all(events).await?;
                    if self.converter.is_terminal() {
                        self.state = RunState::Errored;
                        return Ok(());
                    }
                }
                Next::Done => {
                    let finished = self.converter.run_finished();
                    self.publish(finished).await?;
                    self.state = RunState::Finished;
                    return Ok(());
                }
                Next::Failed(err) => {
                    warn!(
                        run_id = %self.converter.run_id(),
                        code = %err.code(),
                        error = %err,
                        "upstream failed"
                    );
                    let failed = self.converter.run_error(err.code(), err.to_string());
                    self.state = RunState::Errored;
                    self.publish(failed).await?;
                    return Ok(());
                }
                Next::Cancelled => {
                    info!(run_id = %self.converter.run_id(), "run cancelled");
                    let cancelled = self
                        .converter
                        .run_error(RunErrorCode::Cancelled, "run cancelled");
                    self.state = RunState::Errored;
                    self.publish(cancelled).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn publish(&mut self, event: Event) -> BridgeResult<()> {
        self.publisher.publish(event).await
    }
}

// ============================================================================
// Spawned runs
// ============================================================================

/// Handle to a run executing on its own task.
pub struct RunHandle {
    pub run_id: String,
    cancel: CancellationToken,
    task: JoinHandle<BridgeResult<RunOutcome>>,
}

impl RunHandle {
    /// Request cancellation; the consumer receives a `run-error` with code `cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run task to finish.
    pub async fn join(self) -> BridgeResult<RunOutcome> {
        self.task.await?
    }
}

/// Start a run on a new tokio task.
///
/// Returns the run handle and the consumer side of the run's event channel.
pub fn spawn_run<S>(
    tracker: Arc<ToolCallTracker>,
    config: &AgstreamConfig,
    source: S,
) -> (RunHandle, EventStream)
where
    S: Stream<Item = Result<Fragment, UpstreamError>> + Send + 'static,
{
    let (publisher, events) = EventPublisher::channel(&config.publisher);
    let middleware = StreamingMiddleware::new(tracker, publisher, config.converter.clone());
    let run_id = middleware.run_id().to_string();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(middleware.run(source, cancel.clone()));

    (
        RunHandle {
            run_id,
            cancel,
            task,
        },
        events,
    )
}
