use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-restaurant broadcast of committed events. Slow receivers lag and
/// lose the oldest events rather than slowing writers down.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a restaurant's events, creating its channel if needed.
    pub fn subscribe(&self, restaurant_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(restaurant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody has subscribed to the restaurant.
    pub fn send(&self, restaurant_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&restaurant_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn subscriber_count(&self, restaurant_id: &Ulid) -> usize {
        self.channels
            .get(restaurant_id)
            .map_or(0, |s| s.receiver_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_only_their_restaurant() {
        let hub = NotifyHub::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        let mut rx_a = hub.subscribe(a);
        let mut rx_b = hub.subscribe(b);
        assert_eq!(hub.subscriber_count(&a), 1);

        let event = Event::WaitlistCancelled { entry_id: Ulid::new() };
        hub.send(a, &event);

        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        hub.send(rid, &Event::WaitlistCancelled { entry_id: rid });
        assert_eq!(hub.subscriber_count(&rid), 0);
    }
}
