//! Termination signal handling for the launcher
//!
//! `TermSignals` owns the SIGINT/SIGTERM/SIGHUP listeners for one launch.
//! It is installed before the child is spawned, armed with the child right
//! after, and then forwards every termination signal the launcher receives
//! to the child until the child's exit is observed. If it is dropped while
//! the child is still running (an error or a panic in the launcher), the
//! child is killed so it is never orphaned.

use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, warn};

use crate::error::LaunchError;
use crate::spawn::{ChildHandle, TerminalEvent};

/// Signals forwarded to the child
pub const FORWARDED: [i32; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

/// Where a launch is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Handlers installed, no child yet
    Idle,
    /// Child registered, no signal received
    Armed,
    /// A signal was received and passed on to the child
    Forwarding(i32),
    /// The child's exit has been observed
    Terminated,
}

/// How a launch ended, from the launcher's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub event: TerminalEvent,
    /// Last signal forwarded to the child, if any
    pub forwarded: Option<i32>,
}

impl Termination {
    /// Signal the launcher should end with, if any
    ///
    /// The child's own death by signal wins. A child that exited cleanly
    /// after being forwarded a signal still reports that signal.
    pub fn signal(&self) -> Option<i32> {
        match self.event {
            TerminalEvent::Signaled(signo) => Some(signo),
            TerminalEvent::Exited(0) => self.forwarded,
            TerminalEvent::Exited(_) => None,
        }
    }

    /// Exit status for the launcher, using the 128+N convention for signals
    pub fn exit_code(&self) -> i32 {
        match (self.signal(), self.event) {
            (Some(signo), _) => 128 + signo,
            (None, TerminalEvent::Exited(code)) => code,
            (None, TerminalEvent::Signaled(signo)) => 128 + signo,
        }
    }
}

/// Termination signal listeners bound to one child process
pub struct TermSignals {
    state: LifecycleState,
    child: Option<ChildHandle>,
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
    verbose: bool,
}

impl TermSignals {
    /// Start listening for termination signals
    pub fn install(verbose: bool) -> io::Result<Self> {
        Ok(Self {
            state: LifecycleState::Idle,
            child: None,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            verbose,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Register the child that signals are forwarded to
    pub fn arm(&mut self, child: ChildHandle) {
        debug!(pid = ?child.pid(), command = child.command(), "Armed signal forwarding");
        self.child = Some(child);
        self.state = LifecycleState::Armed;
    }

    /// Forward signals to the child until it exits
    pub async fn supervise(mut self) -> Result<Termination, LaunchError> {
        let mut forwarded = None;

        loop {
            let Self {
                child,
                interrupt,
                terminate,
                hangup,
                ..
            } = &mut self;
            let child = child.as_mut().ok_or(LaunchError::NotArmed)?;

            let signo = tokio::select! {
                status = child.wait() => {
                    let event = status.map_err(LaunchError::ChildWait)?;
                    debug!(?event, "Child process ended");
                    self.state = LifecycleState::Terminated;
                    self.child = None;
                    return Ok(Termination { event, forwarded });
                }
                Some(()) = interrupt.recv() => libc::SIGINT,
                Some(()) = terminate.recv() => libc::SIGTERM,
                Some(()) = hangup.recv() => libc::SIGHUP,
            };

            self.forward(signo);
            forwarded = Some(signo);
        }
    }

    /// Pass `signo` on to the child
    fn forward(&mut self, signo: i32) {
        self.state = LifecycleState::Forwarding(signo);

        let Some(child) = self.child.as_ref() else {
            return;
        };

        if self.verbose {
            eprintln!(
                "envkey-cmd: received {}, forwarding to {} (pid {})",
                signal_name(signo),
                child.command(),
                child.pid().map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            );
        }
        debug!(signal = signal_name(signo), pid = ?child.pid(), "Forwarding signal");

        if let Err(e) = child.signal(signo) {
            warn!("Failed to forward {} to child: {}", signal_name(signo), e);
        }
    }
}

impl Drop for TermSignals {
    fn drop(&mut self) {
        if self.state == LifecycleState::Terminated {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            warn!(
                pid = ?child.pid(),
                "Launcher stopping before {} exited, killing it",
                child.command()
            );
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill child process: {}", e);
            }
        }
    }
}

/// Name of a forwarded signal, for messages
pub fn signal_name(signo: i32) -> &'static str {
    match signo {
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGHUP => "SIGHUP",
        _ => "signal",
    }
}

/// End this process with `signo` as a signal death
///
/// Restores the default disposition and raises the signal, so the parent
/// (usually a shell) sees the same kind of termination as the child had.
/// Only returns if the signal did not end the process.
pub fn reraise(signo: i32) {
    // SAFETY: signal(2) and raise(3) have no memory-safety preconditions;
    // the runtime that registered handlers has already been shut down.
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
        libc::raise(signo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvChanges;
    use crate::spawn::spawn;

    /// Wait up to 2.5s for `pid` to be gone or a zombie waiting to be reaped
    #[cfg(target_os = "linux")]
    async fn has_exited(pid: u32) -> bool {
        let stat_path = format!("/proc/{}/stat", pid);
        for _ in 0..50 {
            let dead = match std::fs::read_to_string(&stat_path) {
                Err(_) => true,
                Ok(stat) => {
                    let state = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
                    state == Some("Z")
                }
            };
            if dead {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    fn sleeper() -> crate::spawn::ChildHandle {
        spawn("sleep", &["30".to_string()], &EnvChanges::default(), false).unwrap()
    }

    #[test]
    fn test_exit_code_mirrors_child() {
        let t = Termination {
            event: TerminalEvent::Exited(3),
            forwarded: None,
        };
        assert_eq!(t.signal(), None);
        assert_eq!(t.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_for_signals() {
        let killed = Termination {
            event: TerminalEvent::Signaled(libc::SIGTERM),
            forwarded: Some(libc::SIGTERM),
        };
        assert_eq!(killed.signal(), Some(libc::SIGTERM));
        assert_eq!(killed.exit_code(), 128 + libc::SIGTERM);

        let handled_cleanly = Termination {
            event: TerminalEvent::Exited(0),
            forwarded: Some(libc::SIGINT),
        };
        assert_eq!(handled_cleanly.signal(), Some(libc::SIGINT));
        assert_eq!(handled_cleanly.exit_code(), 130);

        let handled_with_code = Termination {
            event: TerminalEvent::Exited(42),
            forwarded: Some(libc::SIGINT),
        };
        assert_eq!(handled_with_code.signal(), None);
        assert_eq!(handled_with_code.exit_code(), 42);
    }

    #[test]
    fn test_signal_names() {
        let names: Vec<&str> = FORWARDED.iter().map(|&signo| signal_name(signo)).collect();
        assert_eq!(names, vec!["SIGINT", "SIGTERM", "SIGHUP"]);
        assert_eq!(signal_name(libc::SIGKILL), "signal");
    }

    #[tokio::test]
    async fn test_supervise_reports_exit() {
        let mut signals = TermSignals::install(false).unwrap();
        assert_eq!(signals.state(), LifecycleState::Idle);

        let child = spawn("exit 5", &[], &EnvChanges::default(), true).unwrap();
        signals.arm(child);
        assert_eq!(signals.state(), LifecycleState::Armed);

        let t = signals.supervise().await.unwrap();
        assert_eq!(t.event, TerminalEvent::Exited(5));
        assert_eq!(t.forwarded, None);
    }

    #[tokio::test]
    async fn test_supervise_without_child_fails() {
        let signals = TermSignals::install(false).unwrap();
        assert!(matches!(signals.supervise().await, Err(LaunchError::NotArmed)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_drop_kills_running_child() {
        let mut signals = TermSignals::install(false).unwrap();
        let child = sleeper();
        let pid = child.pid().unwrap();
        signals.arm(child);

        drop(signals);

        assert!(has_exited(pid).await, "child {} still running after drop", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_panic_while_armed_kills_child() {
        let child = sleeper();
        let pid = child.pid().unwrap();

        let task = tokio::spawn(async move {
            let mut signals = TermSignals::install(false).unwrap();
            signals.arm(child);
            panic!("launch failed while {} was running", pid);
        });

        let err = task.await.unwrap_err();
        assert!(err.is_panic());
        assert!(has_exited(pid).await, "child {} still running after panic", pid);
    }
}
