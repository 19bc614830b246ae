//! In-process event bus
//!
//! Built on `tokio::sync::broadcast`. Emitting never blocks: with no
//! subscribers the event is dropped, and a lagging subscriber loses the oldest
//! events rather than slowing the dispatcher down.
//!
//! ```no_run
//! use libpostflow::service::events::{Event, EventBus};
//! use libpostflow::PostState;
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::StateChanged {
//!     post_id: "abc123".to_string(),
//!     from: PostState::Draft,
//!     to: PostState::PendingReview,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::PostState;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging kicks in
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A transition was applied to a post
    StateChanged {
        post_id: String,
        from: PostState,
        to: PostState,
    },

    /// One publish call finished
    PlatformAttempt {
        post_id: String,
        platform: String,
        attempt: u32,
        success: bool,
        retryable: bool,
        error: Option<String>,
    },

    /// A dispatch round reached its aggregate state
    DispatchCompleted {
        post_id: String,
        state: PostState,
        succeeded: Vec<String>,
        failed: Vec<String>,
    },
}

impl Event {
    pub fn post_id(&self) -> &str {
        match self {
            Event::StateChanged { post_id, .. }
            | Event::PlatformAttempt { post_id, .. }
            | Event::DispatchCompleted { post_id, .. } => post_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let bus = EventBus::new(10);
        bus.emit(Event::StateChanged {
            post_id: "p".to_string(),
            from: PostState::Draft,
            to: PostState::PendingReview,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let bus = EventBus::new(10);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(Event::DispatchCompleted {
            post_id: "p".to_string(),
            state: PostState::Posted,
            succeeded: vec!["facebook".to_string()],
            failed: vec![],
        });

        assert_eq!(a.recv().await.unwrap().post_id(), "p");
        assert_eq!(b.recv().await.unwrap().post_id(), "p");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::PlatformAttempt {
            post_id: "p".to_string(),
            platform: "instagram".to_string(),
            attempt: 2,
            success: false,
            retryable: true,
            error: Some("rate limited".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "platform_attempt");
        assert_eq!(json["attempt"], 2);
    }
}
