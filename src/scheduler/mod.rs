mod command;
mod runner;

pub use command::{
    command_channel, send_command, Command, CommandRequest, CommandResult,
    COMMAND_CHANNEL_CAPACITY,
};
pub use runner::Runner;
