//! Controller event bus
//!
//! Every bound [`OtgGlue`](crate::otg::OtgGlue) publishes here: bind and
//! unbind, OTG state transitions from the session controller, VBUS requests,
//! each transceiver notification with its handled/not-handled outcome, the
//! root-hub poll after resume signalling, and suspend/resume completion.
//! Publishing never blocks the controller lock holder; with no subscriber
//! the event is dropped, and a slow subscriber sees `Lagged` rather than
//! stalling the controller.

pub mod types;

pub use types::OtgEvent;

use tokio::sync::broadcast;

/// Ring size; one controller emits a handful of events per cable change
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast channel for [`OtgEvent`]s
///
/// # Example
///
/// ```no_run
/// use otg_glue::config::GlueConfig;
/// use otg_glue::events::OtgEvent;
/// use otg_glue::sim::SimRig;
///
/// # async fn demo() -> otg_glue::Result<()> {
/// let rig = SimRig::bind(GlueConfig::default())?;
/// let mut rx = rig.glue.events().subscribe();
///
/// rig.glue.set_vbus(true);
/// while let Ok(event) = rx.try_recv() {
///     if let OtgEvent::StateChanged { from, to } = event {
///         println!("{} -> {}", from, to);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct EventBus {
    tx: broadcast::Sender<OtgEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Events published with no active subscriber are dropped.
    pub fn publish(&self, event: OtgEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<OtgEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::OtgState;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(OtgEvent::StateChanged {
            from: OtgState::BIdle,
            to: OtgState::AWaitVrise,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, OtgEvent::StateChanged { .. }));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(OtgEvent::Suspended);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(OtgEvent::StateChanged {
            from: OtgState::AHost,
            to: OtgState::AWaitBcon,
        })
        .unwrap();
        assert_eq!(json["event"], "otg.state_changed");
        assert_eq!(json["data"]["from"], "a_host");
        assert_eq!(json["data"]["to"], "a_wait_bcon");
    }
}
