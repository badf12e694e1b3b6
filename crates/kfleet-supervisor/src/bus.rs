//! In-process fan-out of [`FleetEvent`]s.
//!
//! Backed by [`tokio::sync::broadcast`]: every subscriber sees every event,
//! and a slow subscriber lags (losing the oldest events) instead of blocking
//! the supervisor.

use kfleet_types::{FleetEvent, FleetEventKind};
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle event bus.  Clones share one channel.
#[derive(Clone, Debug)]
pub struct FleetBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl FleetBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Timestamp and broadcast `kind`.  Returns how many subscribers
    /// received it; zero subscribers is not an error.
    pub fn publish(&self, kind: FleetEventKind) -> usize {
        let event = FleetEvent::now(kind);
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(kernel_id = event.kernel_id(), "no subscribers for fleet event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FleetBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaped(id: &str) -> FleetEventKind {
        FleetEventKind::Reaped {
            id: id.into(),
            pid: 1,
            port: 9555,
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = FleetBus::default();
        assert_eq!(bus.publish(reaped("kernel-a")), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_every_event() {
        let bus = FleetBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(reaped("kernel-a")), 2);
        assert_eq!(first.recv().await.unwrap().kernel_id(), "kernel-a");
        assert_eq!(second.recv().await.unwrap().kernel_id(), "kernel-a");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = FleetBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(reaped(&format!("kernel-{i}")));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().kernel_id(), "kernel-3");
    }
}
