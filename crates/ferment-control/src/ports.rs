//! Collaborators the control loop reads from and writes to.
//!
//! The loop never talks to a database or a web layer directly. Hosts plug
//! their persistence in through [`BatchSource`], [`ReadingSource`] and
//! [`EventSink`].

use std::sync::Arc;

use async_trait::async_trait;
use ferment_middleware::EventBus;
use ferment_types::{
    BatchControl, BatchId, ControlEvent, Event, EventPayload, FermentError, Notification, Reading,
};
use tracing::{error, trace};

const SOURCE: &str = "ferment-control::engine";

/// Read side of the batch store.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Batches eligible for control this cycle: not deleted, a sensor
    /// assigned, status in the controllable set and at least one actuator.
    async fn eligible_batches(&self) -> Result<Vec<BatchControl>, FermentError>;

    /// The most recently updated batch with any actuator configured,
    /// regardless of status. Idle mode borrows its entities.
    async fn latest_actuated_batch(&self) -> Result<Option<BatchControl>, FermentError>;
}

/// Latest sensor values.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn latest_reading(&self, device_id: &str) -> Option<Reading>;

    async fn chamber_temperature(&self) -> Option<f64>;
}

/// Destination for control events and notifications.
///
/// Delivery is fire-and-forget: the loop logs an `Err` and carries on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: ControlEvent) -> Result<(), FermentError>;

    async fn notify(&self, notification: Notification) -> Result<(), FermentError>;

    /// An actuator could not be read this cycle.
    async fn fault(
        &self,
        _entity_id: &str,
        _batch_id: Option<BatchId>,
        _details: &str,
    ) -> Result<(), FermentError> {
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn record(&self, event: ControlEvent) -> Result<(), FermentError> {
        let n = self.publish(Event::new(SOURCE, EventPayload::Control(event)));
        trace!(listeners = n, "control event broadcast");
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> Result<(), FermentError> {
        self.publish(Event::new(SOURCE, EventPayload::Notification(notification)));
        Ok(())
    }

    async fn fault(
        &self,
        entity_id: &str,
        batch_id: Option<BatchId>,
        details: &str,
    ) -> Result<(), FermentError> {
        self.publish(Event::new(
            SOURCE,
            EventPayload::ActuatorFault {
                entity_id: entity_id.to_string(),
                batch_id,
                details: details.to_string(),
            },
        ));
        Ok(())
    }
}

/// Fans every call out to each inner sink, typically a persistence sink
/// followed by the [`EventBus`].
///
/// A failing sink is logged and does not stop delivery to the rest.
#[derive(Clone, Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl EventSink for CompositeSink {
    async fn record(&self, event: ControlEvent) -> Result<(), FermentError> {
        for sink in &self.sinks {
            if let Err(e) = sink.record(event.clone()).await {
                error!(error = %e, action = ?event.action, "control event sink failed");
            }
        }
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> Result<(), FermentError> {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(notification.clone()).await {
                error!(error = %e, "notification sink failed");
            }
        }
        Ok(())
    }

    async fn fault(
        &self,
        entity_id: &str,
        batch_id: Option<BatchId>,
        details: &str,
    ) -> Result<(), FermentError> {
        for sink in &self.sinks {
            if let Err(e) = sink.fault(entity_id, batch_id, details).await {
                error!(error = %e, entity = entity_id, "fault sink failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use chrono::Utc;
    use ferment_middleware::Topic;
    use ferment_types::ControlAction;

    struct Broken;

    #[async_trait]
    impl EventSink for Broken {
        async fn record(&self, _event: ControlEvent) -> Result<(), FermentError> {
            Err(FermentError::Source("database locked".into()))
        }

        async fn notify(&self, _n: Notification) -> Result<(), FermentError> {
            Err(FermentError::Source("database locked".into()))
        }
    }

    fn event() -> ControlEvent {
        ControlEvent {
            action: ControlAction::CoolOn,
            temperature: 21.0,
            ambient_temp: None,
            target_temp: 20.0,
            device_id: Some("tilt-red".into()),
            batch_id: Some(4),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn bus_sink_publishes_on_matching_topics() {
        let bus = EventBus::default();
        let mut control = bus.subscribe_to(Topic::Control);
        let mut faults = bus.subscribe_to(Topic::Faults);

        bus.record(event()).await.unwrap();
        bus.fault("hub://switch.cooler", Some(4), "unreachable")
            .await
            .unwrap();

        assert!(matches!(
            control.recv().await.unwrap().payload,
            EventPayload::Control(ControlEvent { batch_id: Some(4), .. })
        ));
        assert!(matches!(
            faults.recv().await.unwrap().payload,
            EventPayload::ActuatorFault { .. }
        ));
    }

    #[tokio::test]
    async fn composite_keeps_delivering_after_a_failure() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = CompositeSink::new()
            .with(Arc::new(Broken))
            .with(recorder.clone());
        assert_eq!(sink.len(), 2);

        sink.record(event()).await.unwrap();
        sink.notify(Notification::PitchReady {
            batch_id: 4,
            temperature: 10.0,
            target_temp: 10.0,
        })
        .await
        .unwrap();

        assert_eq!(recorder.events().len(), 1);
        assert_eq!(recorder.notifications().len(), 1);
    }
}
