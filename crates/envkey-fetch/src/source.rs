//! Backend interface for fetching secrets

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::EnvMap;

/// Errors raised while fetching secrets for a key
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("envkey-source not found on PATH (set ENVKEY_SOURCE_BIN to its location)")]
    MissingBinary(#[source] which::Error),

    #[error("Failed to run {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Rejected(String),

    #[error("Failed to decode secrets: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to decode secrets: expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Options passed along with a fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Only these variable names are kept (all when `None`)
    pub permitted: Option<Vec<String>>,
}

/// A key-based source of environment variables
#[async_trait]
pub trait SecretsSource: Send + Sync {
    /// Fetch the variables unlocked by `key`
    async fn fetch(&self, key: &str, options: &FetchOptions) -> Result<EnvMap, FetchError>;
}

/// Drop every variable whose name is not in `permitted`
pub fn filter_permitted(mut vars: EnvMap, permitted: Option<&[String]>) -> EnvMap {
    if let Some(permitted) = permitted {
        vars.retain(|name, _| permitted.iter().any(|p| p == name));
    }
    vars
}
