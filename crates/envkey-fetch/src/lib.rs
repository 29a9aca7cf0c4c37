//! envkey-fetch - Secrets backend for envkey-cmd
//!
//! Given an ENVKEY, produce the environment variables it unlocks.
//!
//! The backend is a trait so the launcher never cares where the variables
//! come from. The shipped implementation drives the `envkey-source`
//! executable and decodes its JSON output.

pub mod envkey;
pub mod source;

use std::collections::BTreeMap;

pub use envkey::EnvkeySource;
pub use source::{filter_permitted, FetchError, FetchOptions, SecretsSource};

/// Environment variable name to value, iterated in key order
pub type EnvMap = BTreeMap<String, String>;
