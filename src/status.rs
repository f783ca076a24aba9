//! Thread-safe snapshot of daemon state: operating state, the pass being
//! tracked, aggregate capture statistics, and a bounded ring of recent log
//! events. The scheduler is the only writer of the operating state; everything
//! here is read freely by the control plane.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::events::{serialize_ts, EventHub, EventKind, LogLevel};

/// Default capacity of the log ring.
pub const LOG_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DaemonState {
    Booting,
    Idle,
    WaitingForPass,
    Recording,
    Decoding,
}

impl DaemonState {
    fn from_u8(v: u8) -> DaemonState {
        match v {
            1 => DaemonState::Idle,
            2 => DaemonState::WaitingForPass,
            3 => DaemonState::Recording,
            4 => DaemonState::Decoding,
            _ => DaemonState::Booting,
        }
    }
}

/// Which phase of a pass the scheduler is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PassStage {
    Waiting,
    Recording,
    Decoding,
}

/// The pass currently being tracked, published by the scheduler and replaced
/// by value on every stage change.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PassInfo {
    pub satellite: String,
    pub norad_id: u32,
    pub freq_hz: u64,
    #[serde(serialize_with = "serialize_ts")]
    pub aos: DateTime<Utc>,
    #[serde(serialize_with = "serialize_ts")]
    pub los: DateTime<Utc>,
    pub max_elev: f64,
    pub stage: PassStage,
}

/// One entry of the bounded log ring.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LogRecord {
    #[serde(serialize_with = "serialize_ts")]
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    #[schema(value_type = String)]
    pub component: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
struct CaptureStats {
    total_captures: u64,
    total_bytes: u64,
    captures_by_satellite: HashMap<String, u64>,
    last_capture_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the capture counters.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsSnapshot {
    pub total_captures: u64,
    pub total_bytes: u64,
    pub captures_by_satellite: HashMap<String, u64>,
    pub last_capture_at: Option<DateTime<Utc>>,
    pub uptime_seconds: i64,
}

pub struct Status {
    started_at: DateTime<Utc>,
    state: AtomicU8,
    current_pass: Mutex<Option<PassInfo>>,
    stats: Mutex<CaptureStats>,
    logs: Mutex<VecDeque<LogRecord>>,
    log_capacity: usize,
}

impl Status {
    pub fn new() -> Self {
        Self::with_log_capacity(LOG_RING_CAPACITY)
    }

    pub fn with_log_capacity(log_capacity: usize) -> Self {
        Status {
            started_at: Utc::now(),
            state: AtomicU8::new(DaemonState::Booting as u8),
            current_pass: Mutex::new(None),
            stats: Mutex::new(CaptureStats::default()),
            logs: Mutex::new(VecDeque::with_capacity(log_capacity)),
            log_capacity,
        }
    }

    pub fn state(&self) -> DaemonState {
        DaemonState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store a new state and return the previous one, or None if the state is
    /// unchanged. Callers broadcast a `state` event only on Some, which keeps
    /// transitions exactly-once.
    pub fn transition(&self, to: DaemonState) -> Option<DaemonState> {
        let old = DaemonState::from_u8(self.state.swap(to as u8, Ordering::AcqRel));
        (old != to).then_some(old)
    }

    pub fn set_current_pass(&self, pass: Option<PassInfo>) {
        *self.current_pass.lock().unwrap() = pass;
    }

    pub fn current_pass(&self) -> Option<PassInfo> {
        self.current_pass.lock().unwrap().clone()
    }

    pub fn record_capture(&self, satellite: &str, bytes: u64) {
        let mut stats = self.stats.lock().unwrap();
        stats.total_captures += 1;
        stats.total_bytes += bytes;
        *stats
            .captures_by_satellite
            .entry(satellite.to_string())
            .or_insert(0) += 1;
        stats.last_capture_at = Some(Utc::now());
    }

    pub fn stats(&self) -> StatsSnapshot {
        let stats = self.stats.lock().unwrap();
        StatsSnapshot {
            total_captures: stats.total_captures,
            total_bytes: stats.total_bytes,
            captures_by_satellite: stats.captures_by_satellite.clone(),
            last_capture_at: stats.last_capture_at,
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub fn push_log(&self, record: LogRecord) {
        let mut logs = self.logs.lock().unwrap();
        if logs.len() == self.log_capacity {
            logs.pop_front();
        }
        logs.push_back(record);
    }

    /// Return ring contents, optionally filtered by level and truncated to the
    /// most recent `limit` entries.
    pub fn logs(&self, level: Option<LogLevel>, limit: Option<usize>) -> Vec<LogRecord> {
        let logs = self.logs.lock().unwrap();
        let mut entries: Vec<LogRecord> = logs
            .iter()
            .filter(|r| level.map_or(true, |l| r.level == l))
            .cloned()
            .collect();
        if let Some(n) = limit {
            if n < entries.len() {
                entries.drain(..entries.len() - n);
            }
        }
        entries
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed hub `log` events into the status ring until shutdown. A lagged
/// receiver skips ahead; log capture is best-effort.
pub fn spawn_log_recorder(
    status: Arc<Status>,
    hub: &EventHub,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                ev = rx.recv() => match ev {
                    Ok(ev) => {
                        if let EventKind::Log { level, message } = ev.kind {
                            status.push_log(LogRecord {
                                ts: ev.ts,
                                level,
                                component: ev.component,
                                message,
                            });
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: LogLevel, message: &str) -> LogRecord {
        LogRecord {
            ts: Utc::now(),
            level,
            component: "test",
            message: message.to_string(),
        }
    }

    #[test]
    fn transition_reports_old_state_once() {
        let status = Status::new();
        assert_eq!(status.transition(DaemonState::Idle), Some(DaemonState::Booting));
        assert_eq!(status.transition(DaemonState::Idle), None);
        assert_eq!(status.state(), DaemonState::Idle);
    }

    #[test]
    fn log_ring_evicts_oldest() {
        let status = Status::with_log_capacity(3);
        for i in 0..5 {
            status.push_log(record(LogLevel::Info, &format!("msg {i}")));
        }
        let logs = status.logs(None, None);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "msg 2");
        assert_eq!(logs[2].message, "msg 4");
    }

    #[test]
    fn log_filters_by_level_and_limit() {
        let status = Status::new();
        status.push_log(record(LogLevel::Info, "a"));
        status.push_log(record(LogLevel::Error, "b"));
        status.push_log(record(LogLevel::Error, "c"));

        let errors = status.logs(Some(LogLevel::Error), None);
        assert_eq!(errors.len(), 2);

        let last = status.logs(None, Some(1));
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].message, "c");
    }

    #[test]
    fn capture_stats_accumulate() {
        let status = Status::new();
        status.record_capture("NOAA-19", 1024);
        status.record_capture("NOAA-19", 2048);
        status.record_capture("NOAA-15", 512);

        let stats = status.stats();
        assert_eq!(stats.total_captures, 3);
        assert_eq!(stats.total_bytes, 3584);
        assert_eq!(stats.captures_by_satellite["NOAA-19"], 2);
        assert!(stats.last_capture_at.is_some());
    }

    #[tokio::test]
    async fn recorder_captures_only_log_events() {
        let status = Arc::new(Status::new());
        let hub = EventHub::new();
        let (_tx, rx) = watch::channel(false);
        let handle = spawn_log_recorder(status.clone(), &hub, rx);

        hub.log("test", LogLevel::Info, "hello");
        hub.broadcast(
            "test",
            EventKind::Progress {
                stage: "waiting",
                percent: 0,
                detail: "ignored".into(),
            },
        );

        // Give the recorder a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let logs = status.logs(None, None);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "hello");
        handle.abort();
    }
}
