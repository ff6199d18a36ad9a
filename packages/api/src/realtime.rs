//! Real-time event streaming via Server-Sent Events.

use std::pin::Pin;
use std::task::{Context, Poll};

use bus::{BusError, Delivery, PubSub, Subscription};
use futures_util::Stream;
use queue_core::{JobId, LifecycleEvent};
use tokio::sync::mpsc::UnboundedReceiver;

/// Event class of a delivery: the last segment of its topic.
pub fn event_class(delivery: &Delivery) -> &str {
    delivery
        .topic
        .rsplit(':')
        .next()
        .unwrap_or_default()
}

/// Format a delivery as one SSE frame.
pub fn format_sse(delivery: &Delivery) -> String {
    format!("event: {}\ndata: {}\n\n", event_class(delivery), delivery.payload)
}

/// Every event of one job, ending after its terminal lifecycle event.
///
/// The bus subscription is removed when the stream is dropped.
pub struct JobEventStream {
    bus: PubSub,
    subscription: Subscription,
    rx: UnboundedReceiver<Delivery>,
    finished: bool,
}

impl JobEventStream {
    pub fn new(bus: &PubSub, job_id: JobId) -> Result<Self, BusError> {
        let (subscription, rx) = bus.subscribe_pattern_channel(&format!("job:{}:*", job_id))?;
        Ok(Self {
            bus: bus.clone(),
            subscription,
            rx,
            finished: false,
        })
    }
}

fn is_terminal(delivery: &Delivery) -> bool {
    event_class(delivery) == "lifecycle"
        && delivery
            .decode::<LifecycleEvent>()
            .is_ok_and(|event| event.is_terminal())
}

impl Stream for JobEventStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(delivery)) => {
                if is_terminal(&delivery) {
                    self.finished = true;
                }
                Poll::Ready(Some(delivery))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for JobEventStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.subscription);
    }
}
