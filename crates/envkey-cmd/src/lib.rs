//! envkey-cmd - run a command with the variables unlocked by an ENVKEY
//!
//! "Secrets should be invisible until you need them."
//!
//! The launcher fetches the variables for an ENVKEY, merges them into the
//! current environment, optionally expands `$VAR` references in the command
//! line and runs the command as a child process. Termination signals are
//! passed on to the child and the child's exit status becomes ours.

pub mod cli;
pub mod env;
pub mod error;
pub mod expand;
pub mod run;
pub mod secrets;
pub mod signals;
pub mod spawn;

pub use cli::{parse, CommandSpec, LaunchOptions};
pub use error::{ArgumentError, LaunchError};
pub use signals::Termination;
