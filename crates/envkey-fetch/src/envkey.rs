//! envkey-source backend
//!
//! Runs `envkey-source <KEY> --json` and decodes the JSON object it prints.
//! The binary reports problems (an invalid key, no connectivity) either
//! with a non-zero exit status or an `error: ...` line on stdout.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::debug;

use crate::source::{filter_permitted, FetchError, FetchOptions, SecretsSource};
use crate::EnvMap;

/// Fetches secrets by running the `envkey-source` executable
#[derive(Debug, Clone, Default)]
pub struct EnvkeySource {
    /// Explicit path to the executable; looked up on PATH when `None`
    binary: Option<PathBuf>,
}

impl EnvkeySource {
    /// Executable name looked up on PATH
    pub const BINARY_NAME: &'static str = "envkey-source";

    /// Variable holding an explicit path to the executable
    pub const BINARY_ENV: &'static str = "ENVKEY_SOURCE_BIN";

    pub fn new(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    /// Resolve the executable to run
    fn binary(&self) -> Result<PathBuf, FetchError> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => which::which(Self::BINARY_NAME).map_err(FetchError::MissingBinary),
        }
    }
}

#[async_trait]
impl SecretsSource for EnvkeySource {
    async fn fetch(&self, key: &str, options: &FetchOptions) -> Result<EnvMap, FetchError> {
        let binary = self.binary()?;
        debug!(binary = %binary.display(), "Running envkey-source");

        let output = Command::new(&binary)
            .arg(key)
            .arg("--json")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FetchError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() || stdout.trim_start().starts_with("error:") {
            return Err(FetchError::Rejected(rejection_message(
                &stdout,
                &stderr,
                output.status,
            )));
        }

        let vars = decode(&stdout)?;
        debug!(count = vars.len(), "Decoded secrets");

        Ok(filter_permitted(vars, options.permitted.as_deref()))
    }
}

/// Pick the most useful message out of a failed run
fn rejection_message(stdout: &str, stderr: &str, status: ExitStatus) -> String {
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.trim_start_matches("error:").trim().to_string();
    }

    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.trim_start_matches("error:").trim().to_string();
    }

    format!("envkey-source exited with {}", status)
}

/// Decode the JSON object printed by envkey-source
///
/// String values are taken as-is, other scalars keep their JSON text and
/// `null` entries are dropped.
fn decode(text: &str) -> Result<EnvMap, FetchError> {
    let object = match serde_json::from_str::<Value>(text.trim())? {
        Value::Object(object) => object,
        Value::Array(_) => return Err(FetchError::NotAnObject("an array")),
        Value::String(_) => return Err(FetchError::NotAnObject("a string")),
        Value::Number(_) => return Err(FetchError::NotAnObject("a number")),
        Value::Bool(_) => return Err(FetchError::NotAnObject("a boolean")),
        Value::Null => return Err(FetchError::NotAnObject("null")),
    };

    Ok(object
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((name, s)),
            other => Some((name, other.to_string())),
        })
        .collect())
}
