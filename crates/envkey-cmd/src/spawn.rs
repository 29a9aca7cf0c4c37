//! Launching the child process

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::env::EnvChanges;
use crate::error::LaunchError;

/// Shell used for `--use-shell`
pub const SHELL: &str = "/bin/sh";

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Exited on its own with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
}

impl TerminalEvent {
    pub fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signo)) => Self::Signaled(signo),
            (None, None) => Self::Exited(1),
        }
    }
}

/// A running child process
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    command: String,
}

impl ChildHandle {
    /// Process id, or `None` once the exit has been observed
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Deliver `signo` to the child
    ///
    /// Does nothing once the child's exit has been observed, so a recycled
    /// pid is never signalled.
    pub fn signal(&self, signo: i32) -> io::Result<()> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };

        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, signo) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Forcibly kill the child without waiting for it
    pub fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    /// Wait for the child to end
    pub async fn wait(&mut self) -> io::Result<TerminalEvent> {
        let status = self.child.wait().await?;
        Ok(TerminalEvent::from_status(status))
    }
}

/// Build the command for a launch without starting it
///
/// With `use_shell` the command and arguments are joined by single spaces
/// and handed to `/bin/sh -c` unquoted, so the line is subject to the
/// shell's own parsing. The child inherits this process's environment
/// with `changes` applied.
pub fn build_command(
    command: &str,
    args: &[String],
    changes: &EnvChanges,
    use_shell: bool,
) -> Command {
    let mut cmd = if use_shell {
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(line);
        cmd
    } else {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd
    };

    for name in &changes.removed {
        cmd.env_remove(name);
    }
    cmd.envs(&changes.set).kill_on_drop(true);
    cmd
}

/// Start `command` with stdio inherited from this process
pub fn spawn(
    command: &str,
    args: &[String],
    changes: &EnvChanges,
    use_shell: bool,
) -> Result<ChildHandle, LaunchError> {
    let child = build_command(command, args, changes, use_shell)
        .spawn()
        .map_err(|source| LaunchError::ChildSpawn {
            command: command.to_string(),
            source,
        })?;

    debug!(command, pid = ?child.id(), use_shell, "Spawned child process");

    Ok(ChildHandle {
        child,
        command: command.to_string(),
    })
}
