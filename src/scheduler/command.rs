//! The typed request/reply channel into the scheduler. Every accepted
//! command produces exactly one reply; channel capacity is small because the
//! control plane is low-volume and backpressure at the boundary is fine.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use utoipa::ToSchema;

pub const COMMAND_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug)]
pub enum CommandRequest {
    Trigger {
        norad_id: u32,
        duration_seconds: i64,
    },
    TleRefresh,
    Pause,
    Resume,
    Skip,
    Cancel,
}

/// The single reply sent back through a command's oneshot channel.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CommandResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellites_updated: Option<usize>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        CommandResult {
            ok: true,
            message: Some(message.into()),
            error: None,
            satellites_updated: None,
        }
    }

    pub fn ok_with_updates(message: impl Into<String>, satellites_updated: usize) -> Self {
        CommandResult {
            satellites_updated: Some(satellites_updated),
            ..CommandResult::ok(message)
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        CommandResult {
            ok: false,
            message: None,
            error: Some(error.into()),
            satellites_updated: None,
        }
    }
}

#[derive(Debug)]
pub struct Command {
    pub request: CommandRequest,
    pub reply: oneshot::Sender<CommandResult>,
}

pub fn command_channel() -> (mpsc::Sender<Command>, mpsc::Receiver<Command>) {
    mpsc::channel(COMMAND_CHANNEL_CAPACITY)
}

/// Send a command and wait for its reply. Used by the HTTP adapter; a
/// scheduler that has gone away yields an error result rather than a hang.
pub async fn send_command(tx: &mpsc::Sender<Command>, request: CommandRequest) -> CommandResult {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cmd = Command {
        request,
        reply: reply_tx,
    };
    if tx.send(cmd).await.is_err() {
        return CommandResult::err("scheduler is not running");
    }
    match reply_rx.await {
        Ok(result) => result,
        Err(_) => CommandResult::err("scheduler dropped the command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serialization_omits_empty_fields() {
        let v = serde_json::to_value(CommandResult::ok("done")).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["message"], "done");
        assert!(v.get("error").is_none());
        assert!(v.get("satellites_updated").is_none());

        let v = serde_json::to_value(CommandResult::err("nope")).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "nope");
    }

    #[tokio::test]
    async fn send_command_reports_missing_scheduler() {
        let (tx, rx) = command_channel();
        drop(rx);
        let result = send_command(&tx, CommandRequest::Pause).await;
        assert!(!result.ok);
    }
}
