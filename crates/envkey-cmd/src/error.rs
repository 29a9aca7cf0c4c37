//! Error taxonomy for a launch

use envkey_fetch::FetchError;
use thiserror::Error;

/// The command line could not be turned into a command to run
#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("No command given. Usage: envkey-cmd [options] <command> [...args]")]
    MissingCommand,

    #[error(transparent)]
    Clap(#[from] clap::Error),
}

impl ArgumentError {
    /// Help or version output was requested rather than a launch
    pub fn is_display(&self) -> bool {
        matches!(self, Self::Clap(err) if !err.use_stderr())
    }
}

/// Anything that stops a launch from reaching the child's exit
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to fetch secrets: {0}")]
    SecretsFetch(#[from] FetchError),

    #[error("Failed to start {command}: {source}")]
    ChildSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for child process: {0}")]
    ChildWait(#[source] std::io::Error),

    #[error("Failed to install signal handlers: {0}")]
    SignalSetup(#[source] std::io::Error),

    #[error("No child process registered with the signal handlers")]
    NotArmed,
}
