//! Resolving the secrets for an invocation

use envkey_fetch::{filter_permitted, EnvMap, FetchError, FetchOptions, SecretsSource};
use tracing::debug;

/// Fetch the variables for `secrets_key`, keeping only `permitted` names
///
/// Returns `Ok(None)` when there is no key: nothing is fetched and the
/// source is never contacted. With `verbose`, failures are reported on
/// stderr before being returned.
pub async fn resolve<S>(
    source: &S,
    secrets_key: Option<&str>,
    permitted: Option<&[String]>,
    verbose: bool,
) -> Result<Option<EnvMap>, FetchError>
where
    S: SecretsSource + ?Sized,
{
    let Some(key) = secrets_key.filter(|key| !key.is_empty()) else {
        if verbose {
            eprintln!("Failed to find ENVKEY in arguments or environment variables");
        }
        debug!("No ENVKEY, skipping secrets");
        return Ok(None);
    };

    let options = FetchOptions {
        permitted: permitted.map(<[String]>::to_vec),
    };

    match source.fetch(key, &options).await {
        Ok(vars) => {
            let vars = filter_permitted(vars, permitted);
            debug!(count = vars.len(), "Fetched secrets");
            Ok(Some(vars))
        }
        Err(err) => {
            if verbose {
                eprintln!("envkey-cmd: failed to fetch secrets: {}", err);
            }
            Err(err)
        }
    }
}
