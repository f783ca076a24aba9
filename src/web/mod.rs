//! HTTP/WebSocket control plane. A thin adapter over the daemon's internals:
//! every mutation goes through the scheduler's command channel, every read
//! comes from the status snapshot or the shared configuration.

mod api_doc;
mod error;
mod handlers;
mod server;
mod ws;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::config::SharedConfig;
use crate::events::EventHub;
use crate::scheduler::Command;
use crate::status::Status;

pub use server::run_server;

#[derive(Clone)]
pub struct AppState {
    pub cfg: SharedConfig,
    /// Path the active config was loaded from, if any; replaced on reload.
    pub config_path: Arc<RwLock<Option<PathBuf>>>,
    pub status: Arc<Status>,
    pub hub: EventHub,
    pub commands: mpsc::Sender<Command>,
    pub paused: Arc<AtomicBool>,
    pub demo_mode: bool,
}
