//! Merging fetched secrets into the process environment

use envkey_fetch::EnvMap;
use tracing::debug;

/// Variable holding the secrets key; scrubbed from the child's environment
pub const ENVKEY_VAR: &str = "ENVKEY";

/// Variable listing the names of the fetched variables
pub const ENVKEYS_VAR: &str = "ENVKEYS";

/// Snapshot the current process environment
///
/// Variables whose name or value is not valid UTF-8 are left out of the
/// snapshot. The child still inherits them, see [`EnvChanges`].
pub fn process_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (name, _) => {
                debug!(name = ?name, "Skipping non UTF-8 environment variable");
                None
            }
        })
        .collect()
}

/// Combine `base` with `fetched` into the environment handed to the child
///
/// Fetched values win unless `no_override` is set and the name already
/// exists in `base`. When secrets were fetched at all, `ENVKEYS` lists
/// their names and `ENVKEY` is removed.
pub fn merge(base: EnvMap, fetched: Option<EnvMap>, no_override: bool) -> EnvMap {
    let mut env = base;

    let Some(fetched) = fetched else {
        return env;
    };

    let names: Vec<&str> = fetched.keys().map(String::as_str).collect();
    let envkeys = names.join(",");

    for (name, value) in fetched {
        if no_override && env.contains_key(&name) {
            debug!(name = %name, "Keeping existing value (--no-override)");
            continue;
        }
        env.insert(name, value);
    }

    env.remove(ENVKEY_VAR);
    env.insert(ENVKEYS_VAR.to_string(), envkeys);

    env
}

/// What the child's environment changes relative to the inherited one
///
/// The child inherits this process's environment as-is, including
/// variables that are not valid UTF-8, and only these changes are applied
/// on top.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvChanges {
    /// Variables set or overwritten
    pub set: EnvMap,
    /// Variables removed
    pub removed: Vec<String>,
}

impl EnvChanges {
    /// Changes that turn `base` into `merged`
    pub fn between(base: &EnvMap, merged: &EnvMap) -> Self {
        let set = merged
            .iter()
            .filter(|(name, value)| base.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let removed = base
            .keys()
            .filter(|name| !merged.contains_key(*name))
            .cloned()
            .collect();

        Self { set, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }
}
