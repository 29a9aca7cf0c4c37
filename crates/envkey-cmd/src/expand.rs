//! `$NAME` expansion for the command and its arguments

use regex::{Captures, Regex};
use std::sync::LazyLock;

use envkey_fetch::EnvMap;

/// An optional escaping backslash, then `$` and a shell variable name
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\\)?\$([A-Za-z_][A-Za-z0-9_]*)").expect("reference pattern is valid")
});

/// Replace `$NAME` references with values from `env`
///
/// Unknown names and escaped references (`\$NAME`) are left exactly as
/// written. Substituted values are not scanned again.
pub fn expand(text: &str, env: &EnvMap) -> String {
    REFERENCE
        .replace_all(text, |caps: &Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            match env.get(&caps[2]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
