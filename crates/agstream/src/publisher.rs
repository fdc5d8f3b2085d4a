//! Ordered, bounded hand-off of protocol events to the transport.
//!
//! The publisher side is owned by the run; the [`EventStream`] side is handed
//! to whatever delivers events to the client (WebSocket, SSE, stdout, ...).
//! Events come out in publish order. Once the publisher is closed or dropped
//! and the buffer is drained, the stream ends: that is the consumer's signal
//! that no more events will arrive for the run.
//!
//! Two overflow policies:
//! - `block`: bounded mpsc; a full buffer makes `publish` wait.
//! - `drop_oldest`: broadcast ring; `publish` never waits and the consumer
//!   skips events that were overwritten before it read them.

use agstream_protocol::Event;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{trace, warn};

use crate::config::{OverflowPolicy, PublisherConfig};
use crate::error::{BridgeError, BridgeResult};

enum Sink {
    Bounded(mpsc::Sender<Event>),
    Ring(broadcast::Sender<Event>),
}

enum Source {
    Bounded(mpsc::Receiver<Event>),
    Ring(broadcast::Receiver<Event>),
}

/// Producer side of a run's event channel.
pub struct EventPublisher {
    /// `None` once closed.
    sink: Option<Sink>,
    published: u64,
}

/// Consumer side of a run's event channel.
pub struct EventStream {
    source: Source,
    /// Events overwritten before they were read (`drop_oldest` only).
    dropped: u64,
}

impl EventPublisher {
    /// Create a connected publisher/stream pair.
    pub fn channel(config: &PublisherConfig) -> (EventPublisher, EventStream) {
        let capacity = config.capacity.max(1);
        let (sink, source) = match config.overflow {
            OverflowPolicy::Block => {
                let (tx, rx) = mpsc::channel(capacity);
                (Sink::Bounded(tx), Source::Bounded(rx))
            }
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(capacity);
                (Sink::Ring(tx), Source::Ring(rx))
            }
        };

        (
            EventPublisher {
                sink: Some(sink),
                published: 0,
            },
            EventStream { source, dropped: 0 },
        )
    }

    /// Enqueue one event for delivery.
    ///
    /// Fails immediately with [`BridgeError::PublisherClosed`] when the
    /// consumer is gone or the publisher was closed.
    pub async fn publish(&mut self, event: Event) -> BridgeResult<()> {
        let kind = event.kind();
        let closed = |event: &Event| BridgeError::PublisherClosed {
            run_id: event.run_id.clone(),
            kind,
        };

        let delivered = match &self.sink {
            Some(Sink::Bounded(tx)) => tx.send(event).await.map_err(|err| closed(&err.0)),
            Some(Sink::Ring(tx)) => tx.send(event).map(|_| ()).map_err(|err| closed(&err.0)),
            None => Err(closed(&event)),
        };

        match delivered {
            Ok(()) => {
                self.published += 1;
                trace!(kind, published = self.published, "event published");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "event consumer is gone");
                Err(err)
            }
        }
    }

    /// Publish events in order, stopping at the first failure.
    pub async fn publish_all(&mut self, events: Vec<Event>) -> BridgeResult<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Stop publishing. The consumer sees end-of-stream after draining.
    pub fn close(&mut self) {
        self.sink = None;
    }

    /// Whether nothing can be delivered anymore (closed, or consumer gone).
    pub fn is_closed(&self) -> bool {
        match &self.sink {
            Some(Sink::Bounded(tx)) => tx.is_closed(),
            Some(Sink::Ring(tx)) => tx.receiver_count() == 0,
            None => true,
        }
    }

    /// Number of events accepted so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl EventStream {
    /// Next event in publish order, or `None` once the run's channel is
    /// closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        match &mut self.source {
            Source::Bounded(rx) => rx.recv().await,
            Source::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        self.dropped += skipped;
                        warn!(skipped, "consumer lagged, oldest events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Drain every remaining event until the publisher closes.
    pub async fn collect_all(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    /// Events lost to the `drop_oldest` policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Adapt into a `futures::Stream` for transports that expect one.
    pub fn into_stream(self) -> BoxStream<'static, Event> {
        match self.source {
            Source::Bounded(rx) => ReceiverStream::new(rx).boxed(),
            Source::Ring(rx) => BroadcastStream::new(rx)
                .filter_map(|item| async move {
                    match item {
                        Ok(event) => Some(event),
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(skipped, "consumer lagged, oldest events dropped");
                            None
                        }
                    }
                })
                .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agstream_protocol::EventPayload;

    fn text(run_id: &str, sequence: u64) -> Event {
        Event::new(
            run_id,
            sequence,
            EventPayload::TextDelta {
                delta: format!("chunk {sequence}"),
            },
        )
    }

    fn config(capacity: usize, overflow: OverflowPolicy) -> PublisherConfig {
        PublisherConfig { capacity, overflow }
    }

    #[tokio::test]
    async fn test_publish_order_preserved() {
        let (mut publisher, stream) = EventPublisher::channel(&PublisherConfig::default());
        for seq in 1..=5 {
            publisher.publish(text("run_a", seq)).await.unwrap();
        }
        publisher.close();

        let events = stream.collect_all().await;
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert_eq!(publisher.published(), 5);
    }

    #[tokio::test]
    async fn test_drop_signals_end_of_stream() {
        let (mut publisher, mut stream) = EventPublisher::channel(&PublisherConfig::default());
        publisher.publish(text("run_a", 1)).await.unwrap();
        drop(publisher);

        assert_eq!(stream.recv().await.map(|e| e.sequence), Some(1));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_consumer_gone() {
        let (mut publisher, stream) = EventPublisher::channel(&config(1, OverflowPolicy::Block));
        drop(stream);

        assert!(publisher.is_closed());
        let err = publisher.publish(text("run_a", 1)).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::PublisherClosed { ref run_id, kind: "text-delta" } if run_id == "run_a"
        ));
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let (mut publisher, _stream) = EventPublisher::channel(&PublisherConfig::default());
        publisher.close();
        assert!(publisher.is_closed());
        assert!(publisher.publish(text("run_a", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_consumer() {
        let (mut publisher, mut stream) =
            EventPublisher::channel(&config(1, OverflowPolicy::Block));
        publisher.publish(text("run_a", 1)).await.unwrap();

        // Buffer is full: the next publish must not complete until a read.
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            publisher.publish(text("run_a", 2)),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(stream.recv().await.map(|e| e.sequence), Some(1));
        publisher.publish(text("run_a", 3)).await.unwrap();
        assert_eq!(stream.recv().await.map(|e| e.sequence), Some(3));
    }

    #[tokio::test]
    async fn test_drop_oldest_never_blocks() {
        let (mut publisher, mut stream) =
            EventPublisher::channel(&config(2, OverflowPolicy::DropOldest));
        for seq in 1..=5 {
            publisher.publish(text("run_a", seq)).await.unwrap();
        }
        publisher.close();

        let mut received = Vec::new();
        while let Some(event) = stream.recv().await {
            received.push(event.sequence);
        }

        assert_eq!(received, vec![4, 5]);
        assert_eq!(stream.dropped(), 3);
    }

    #[tokio::test]
    async fn test_drop_oldest_fails_fast_without_consumer() {
        let (mut publisher, stream) =
            EventPublisher::channel(&config(4, OverflowPolicy::DropOldest));
        drop(stream);
        assert!(publisher.is_closed());
        assert!(publisher.publish(text("run_a", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (mut publisher, stream) = EventPublisher::channel(&PublisherConfig::default());
        publisher
            .publish_all(vec![text("run_a", 1), text("run_a", 2)])
            .await
            .unwrap();
        publisher.close();

        let events: Vec<Event> = stream.into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence, 2);
    }
}
