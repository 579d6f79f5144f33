//! Engine Events
//!
//! The presentation layer plugs into the engine through [`EventSink`]. Callbacks
//! run on whichever thread produced the event, usually the background reader,
//! so implementations must be cheap and must not call back into the
//! [`Connection`](crate::protocol::Connection).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Link status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connected,
    NotResponding,
    Disconnected,
}

/// Receiver of everything the engine reports asynchronously
pub trait EventSink: Send + Sync {
    /// A line that was not consumed as a reply or telemetry
    fn on_line(&self, line: &str);

    /// A line that resolved a pending reply
    fn on_reply(&self, _line: &str) {}

    fn on_telemetry_sample(&self, high: bool);

    fn on_frequency_measured(&self, hz: f64);

    fn on_connection_state_changed(&self, state: LinkState);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_line(&self, _line: &str) {}
    fn on_telemetry_sample(&self, _high: bool) {}
    fn on_frequency_measured(&self, _hz: f64) {}
    fn on_connection_state_changed(&self, _state: LinkState) {}
}

/// Event payload forwarded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    Line(String),
    Reply(String),
    TelemetrySample(bool),
    FrequencyMeasured(f64),
    ConnectionStateChanged(LinkState),
}

/// An event stamped with its arrival time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Forwards events into a tokio channel for async consumers
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EventRecord>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: EngineEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(EventRecord {
            timestamp: Utc::now(),
            event,
        });
    }
}

impl EventSink for ChannelSink {
    fn on_line(&self, line: &str) {
        self.send(EngineEvent::Line(line.to_string()));
    }

    fn on_reply(&self, line: &str) {
        self.send(EngineEvent::Reply(line.to_string()));
    }

    fn on_telemetry_sample(&self, high: bool) {
        self.send(EngineEvent::TelemetrySample(high));
    }

    fn on_frequency_measured(&self, hz: f64) {
        self.send(EngineEvent::FrequencyMeasured(hz));
    }

    fn on_connection_state_changed(&self, state: LinkState) {
        self.send(EngineEvent::ConnectionStateChanged(state));
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_line("hello");
        sink.on_telemetry_sample(true);
        sink.on_connection_state_changed(LinkState::NotResponding);

        assert_eq!(rx.recv().await.unwrap().event, EngineEvent::Line("hello".into()));
        assert_eq!(rx.recv().await.unwrap().event, EngineEvent::TelemetrySample(true));
        assert_eq!(
            rx.recv().await.unwrap().event,
            EngineEvent::ConnectionStateChanged(LinkState::NotResponding)
        );
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_frequency_measured(50.0);
    }

    #[test]
    fn test_event_record_json() {
        let record = EventRecord {
            timestamp: Utc::now(),
            event: EngineEvent::ConnectionStateChanged(LinkState::Connected),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "connection_state_changed");
        assert_eq!(json["data"], "connected");
        assert!(json["timestamp"].is_string());
    }
}
