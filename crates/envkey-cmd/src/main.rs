//! envkey-cmd - run a command with the variables unlocked by an ENVKEY
//!
//! Usage:
//!   envkey-cmd [options] <command> [...args]
//!
//! Exit status is the child's. Failures before the child starts exit 1.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use envkey_cmd::env::{process_env, ENVKEY_VAR};
use envkey_cmd::signals::{reraise, FORWARDED};
use envkey_cmd::{parse, run, ArgumentError, CommandSpec, Termination};
use envkey_fetch::EnvkeySource;

/// Exit status for failures before or around the child
const FAILURE: i32 = 1;

fn main() {
    let raw_args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let spec = match parse(raw_args, std::env::var(ENVKEY_VAR).ok()) {
        Ok(spec) => spec,
        Err(err) if err.is_display() => {
            // --help or --version
            let printed = match &err {
                ArgumentError::Clap(clap_err) => clap_err.print(),
                ArgumentError::MissingCommand => Ok(()),
            };
            process::exit(if printed.is_ok() { 0 } else { FAILURE });
        }
        Err(err) => {
            eprintln!("envkey-cmd: {}", err);
            process::exit(FAILURE);
        }
    };

    init_logging(spec.options.verbose);

    match launch(spec) {
        Ok(termination) => exit_with(termination),
        Err(err) => {
            eprintln!("envkey-cmd: {:#}", err);
            process::exit(FAILURE);
        }
    }
}

/// Log to stderr; stdout belongs to the child
fn init_logging(verbose: bool) {
    let default = if verbose {
        "envkey_cmd=debug,envkey_fetch=debug"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Run the launch on a fresh runtime
///
/// The launch runs as its own task so a panic in it is reported as a
/// failure; unwinding drops the signal guard, which kills the child.
fn launch(spec: CommandSpec) -> Result<Termination> {
    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let source = EnvkeySource::new(std::env::var_os(EnvkeySource::BINARY_ENV).map(PathBuf::from));
    let base_env = process_env();

    rt.block_on(async move {
        let task = tokio::spawn(async move { run::run(&spec, &source, base_env).await });

        match task.await {
            Ok(result) => result.map_err(anyhow::Error::from),
            Err(err) if err.is_panic() => Err(anyhow!("launcher panicked")),
            Err(err) => Err(anyhow!("launcher task failed: {}", err)),
        }
    })
}

/// Leave with the child's status, re-raising a forwarded signal
fn exit_with(termination: Termination) -> ! {
    if let Some(signo) = termination.signal() {
        if FORWARDED.contains(&signo) {
            reraise(signo);
        }
    }
    process::exit(termination.exit_code())
}
