//! Typed telemetry events and the hub that fans them out to subscribers.
//!
//! Every event on the wire is a JSON object with `type`, `ts` (RFC 3339 with
//! nanoseconds, UTC), and `component`, plus variant-specific fields. The hub
//! is a thin wrapper over a tokio broadcast channel: sends never block, and a
//! subscriber that falls too far behind is disconnected by its reader task
//! rather than stalling anyone else.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::broadcast;
use utoipa::ToSchema;

use crate::status::DaemonState;

/// Queue depth for the broadcast channel. A subscriber lagging by more than
/// this many events is dropped.
const HUB_CAPACITY: usize = 256;

/// Component name stamped on daemon-level events (state transitions,
/// heartbeats).
pub const DAEMON_COMPONENT: &str = "ephemerisd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(()),
        }
    }
}

/// Serialize a timestamp as RFC 3339 with nanosecond precision, matching the
/// format clients parse on the event stream.
pub fn serialize_ts<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Heartbeat {
        state: DaemonState,
        uptime_seconds: i64,
    },
    State {
        from: DaemonState,
        to: DaemonState,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Progress {
        stage: &'static str,
        percent: u8,
        detail: String,
    },
    PassScheduled {
        satellite: String,
        norad_id: u32,
        freq_hz: u64,
        #[serde(serialize_with = "serialize_ts")]
        aos: DateTime<Utc>,
        #[serde(serialize_with = "serialize_ts")]
        los: DateTime<Utc>,
        max_elev: f64,
        duration_s: i64,
    },
}

/// The envelope broadcast to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(serialize_with = "serialize_ts")]
    pub ts: DateTime<Utc>,
    pub component: &'static str,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Fan-out hub. Cloning is cheap; all clones share one subscriber set.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        EventHub { tx }
    }

    /// Stamp and enqueue an event for delivery to all current subscribers.
    /// Never blocks; with no subscribers the event is discarded.
    pub fn broadcast(&self, component: &'static str, kind: EventKind) {
        let _ = self.tx.send(Event {
            ts: Utc::now(),
            component,
            kind,
        });
    }

    /// Convenience for the common log-event case.
    pub fn log(&self, component: &'static str, level: LogLevel, message: impl Into<String>) {
        self.broadcast(
            component,
            EventKind::Log {
                level,
                message: message.into(),
            },
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(kind: EventKind) -> serde_json::Value {
        let ev = Event {
            ts: Utc::now(),
            component: "test",
            kind,
        };
        serde_json::to_value(&ev).unwrap()
    }

    #[test]
    fn log_event_wire_format() {
        let v = to_json(EventKind::Log {
            level: LogLevel::Warn,
            message: "disk almost full".into(),
        });
        assert_eq!(v["type"], "log");
        assert_eq!(v["component"], "test");
        assert_eq!(v["level"], "warn");
        assert_eq!(v["message"], "disk almost full");
        // RFC 3339 UTC with sub-second digits.
        let ts = v["ts"].as_str().unwrap();
        assert!(ts.ends_with('Z') && ts.contains('.'));
    }

    #[test]
    fn state_event_wire_format() {
        let v = to_json(EventKind::State {
            from: DaemonState::Idle,
            to: DaemonState::Recording,
        });
        assert_eq!(v["type"], "state");
        assert_eq!(v["from"], "IDLE");
        assert_eq!(v["to"], "RECORDING");
    }

    #[test]
    fn pass_scheduled_wire_format() {
        let aos = Utc::now();
        let v = to_json(EventKind::PassScheduled {
            satellite: "NOAA-19".into(),
            norad_id: 33591,
            freq_hz: 137_100_000,
            aos,
            los: aos + chrono::Duration::seconds(720),
            max_elev: 61.4,
            duration_s: 720,
        });
        assert_eq!(v["type"], "pass_scheduled");
        assert_eq!(v["norad_id"], 33591);
        assert_eq!(v["freq_hz"], 137_100_000u64);
        assert_eq!(v["duration_s"], 720);
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.log("test", LogLevel::Info, format!("msg {i}"));
        }
        for i in 0..5 {
            let ev = rx.recv().await.unwrap();
            match ev.kind {
                EventKind::Log { message, .. } => assert_eq!(message, format!("msg {i}")),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn broadcast_without_subscribers_is_fine() {
        let hub = EventHub::new();
        hub.log("test", LogLevel::Info, "nobody listening");
    }
}
