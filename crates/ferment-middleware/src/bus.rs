//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the control loop.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Control`] | Confirmed actuator writes (`heat_on`, `cool_off`, …) |
//! | [`Topic::Notifications`] | One-shot operator notifications (pitch ready) |
//! | [`Topic::Faults`] | Unreachable actuators |
//!
//! Every published event also goes to the firehose channel returned by
//! [`EventBus::subscribe`].

use ferment_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Control,
    Notifications,
    Faults,
}

impl Topic {
    /// The lane an event belongs on, derived from its payload.
    pub fn of(event: &Event) -> Self {
        match event.payload {
            EventPayload::Control(_) => Topic::Control,
            EventPayload::Notification(_) => Topic::Notifications,
            EventPayload::ActuatorFault { .. } => Topic::Faults,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    control: broadcast::Sender<Event>,
    notifications: broadcast::Sender<Event>,
    faults: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(capacity);
        let (notifications, _) = broadcast::channel(capacity);
        let (faults, _) = broadcast::channel(capacity);
        Self {
            all,
            control,
            notifications,
            faults,
        }
    }

    /// Publish `event` on its topic lane and on the firehose.
    ///
    /// Returns the number of receivers on the topic lane that were handed
    /// the event.  Having no listeners is normal and yields `0`.
    pub fn publish(&self, event: Event) -> usize {
        let topic = Topic::of(&event);
        // A send error only means nobody is listening right now.
        let _ = self.all.send(event.clone());
        match self.topic_sender(topic).send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(?topic, "no live listeners");
                0
            }
        }
    }

    /// Subscribe to a single topic lane.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every event regardless of topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Number of live listeners on `topic`.
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Control => &self.control,
            Topic::Notifications => &self.notifications,
            Topic::Faults => &self.faults,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] lane.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Lagging is logged and skipped over; `None` means the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "listener lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// Serialise `event` as a single-line JSON frame for push transports
/// (websocket, server-sent events).
pub fn encode_frame(event: &Event) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| {
        warn!(error = %e, "event could not be encoded");
        String::from("{}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferment_types::{ControlAction, ControlEvent};

    fn control_event(batch_id: i64) -> Event {
        Event::new(
            "ferment-control::test",
            EventPayload::Control(ControlEvent {
                action: ControlAction::HeatOn,
                temperature: 17.3,
                ambient_temp: Some(15.0),
                target_temp: 18.0,
                device_id: Some("tilt-red".into()),
                batch_id: Some(batch_id),
                timestamp: Utc::now(),
            }),
        )
    }

    fn fault_event() -> Event {
        Event::new(
            "ferment-control::test",
            EventPayload::ActuatorFault {
                entity_id: "hub://switch.heater".into(),
                batch_id: Some(1),
                details: "unreachable".into(),
            },
        )
    }

    #[test]
    fn publish_without_listeners_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(control_event(1)), 0);
    }

    #[tokio::test]
    async fn topic_listener_receives_matching_events() {
        let bus = EventBus::default();
        let mut control = bus.subscribe_to(Topic::Control);
        let event = control_event(3);
        assert_eq!(bus.publish(event.clone()), 1);
        let received = control.recv().await.expect("event");
        assert_eq!(received.id, event.id);
        assert_eq!(control.topic(), Topic::Control);
    }

    #[tokio::test]
    async fn topic_listener_ignores_other_topics() {
        let bus = EventBus::default();
        let mut faults = bus.subscribe_to(Topic::Faults);
        bus.publish(control_event(1));

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), faults.recv()).await;
        assert!(result.is_err(), "fault listener must not see control events");

        bus.publish(fault_event());
        assert!(faults.recv().await.is_some());
    }

    #[tokio::test]
    async fn firehose_sees_every_topic() {
        let bus = EventBus::default();
        let mut all = bus.subscribe();
        bus.publish(control_event(1));
        bus.publish(fault_event());
        assert_eq!(Topic::of(&all.recv().await.unwrap()), Topic::Control);
        assert_eq!(Topic::of(&all.recv().await.unwrap()), Topic::Faults);
    }

    #[tokio::test]
    async fn lagging_listener_skips_ahead() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Control);
        for id in 0..20 {
            bus.publish(control_event(id));
        }
        // The oldest events were dropped; recv resumes with what is left.
        assert!(slow.recv().await.is_some());
    }

    #[test]
    fn frames_are_single_line_json() {
        let frame = encode_frame(&control_event(9));
        assert!(!frame.contains('\n'));
        assert!(frame.contains("\"heat_on\""));
    }

    #[test]
    fn listener_count_tracks_subscriptions() {
        let bus = EventBus::default();
        assert_eq!(bus.listener_count(Topic::Notifications), 0);
        let _rx = bus.subscribe_to(Topic::Notifications);
        assert_eq!(bus.listener_count(Topic::Notifications), 1);
    }
}
