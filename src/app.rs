//! Daemon wiring: event hub, status snapshot, scheduler worker, heartbeat
//! ticker, and the HTTP/WebSocket server, all bound to one shutdown signal.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};

use crate::config::{Config, SharedConfig};
use crate::events::{EventHub, EventKind, DAEMON_COMPONENT};
use crate::scheduler::{command_channel, Runner};
use crate::status::{spawn_log_recorder, Status};
use crate::web::{run_server, AppState};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Start every worker and serve the control plane until shutdown. Blocks for
/// the life of the daemon.
pub async fn run(
    cfg: Config,
    config_path: Option<PathBuf>,
    bind_override: Option<String>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let demo_mode = cfg.demo.enabled;
    let bind = bind_override.unwrap_or_else(|| cfg.server.bind.clone());
    let cfg: SharedConfig = Arc::new(RwLock::new(cfg));

    let hub = EventHub::new();
    let status = Arc::new(Status::new());
    let paused = Arc::new(AtomicBool::new(false));
    let (commands, command_rx) = command_channel();

    let _ = spawn_log_recorder(status.clone(), &hub, shutdown.clone());
    spawn_heartbeat(hub.clone(), status.clone(), shutdown.clone());

    let runner = Runner::new(
        hub.clone(),
        cfg.clone(),
        status.clone(),
        command_rx,
        paused.clone(),
        shutdown.clone(),
        demo_mode,
    );
    let _ = tokio::spawn(runner.run());

    let state = AppState {
        cfg,
        config_path: Arc::new(std::sync::RwLock::new(config_path)),
        status,
        hub,
        commands,
        paused,
        demo_mode,
    };

    run_server(state, &bind, shutdown).await
}

/// Periodic heartbeat so clients can detect connectivity and track uptime
/// without polling.
fn spawn_heartbeat(hub: EventHub, status: Arc<Status>, mut shutdown: watch::Receiver<bool>) {
    let _ = tokio::spawn(async move {
        let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tick.tick() => {
                    hub.broadcast(
                        DAEMON_COMPONENT,
                        EventKind::Heartbeat {
                            state: status.state(),
                            uptime_seconds: status.uptime_seconds(),
                        },
                    );
                }
            }
        }
    });
}
