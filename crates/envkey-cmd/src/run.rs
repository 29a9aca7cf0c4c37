//! Orchestration of a single launch
//!
//! resolve secrets -> merge -> expand -> spawn -> wait

use tracing::debug;

use envkey_fetch::{EnvMap, SecretsSource};

use crate::cli::CommandSpec;
use crate::env::{merge, EnvChanges};
use crate::error::LaunchError;
use crate::expand::expand;
use crate::secrets::resolve;
use crate::signals::{TermSignals, Termination};
use crate::spawn::spawn;

/// Everything needed to start the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub command: String,
    pub args: Vec<String>,
    /// Environment as seen by `$VAR` expansion
    pub env: EnvMap,
    /// Applied on top of the inherited environment when spawning
    pub changes: EnvChanges,
}

/// Resolve secrets and compute the child's command line and environment
///
/// A secrets failure aborts unless `silent` is set, in which case the
/// child gets `base_env` alone.
pub async fn prepare<S>(
    spec: &CommandSpec,
    source: &S,
    base_env: EnvMap,
) -> Result<Prepared, LaunchError>
where
    S: SecretsSource + ?Sized,
{
    let options = spec.options;

    let fetched = match resolve(
        source,
        spec.secrets_key.as_deref(),
        spec.permitted.as_deref(),
        options.verbose,
    )
    .await
    {
        Ok(fetched) => fetched,
        Err(err) if options.silent => {
            debug!(error = %err, "Ignoring secrets failure (--silent)");
            None
        }
        Err(err) => return Err(err.into()),
    };

    let env = merge(base_env.clone(), fetched, options.no_override);
    let changes = EnvChanges::between(&base_env, &env);

    let (command, args) = if options.expand_envs {
        (
            expand(&spec.command, &env),
            spec.command_args.iter().map(|arg| expand(arg, &env)).collect(),
        )
    } else {
        (spec.command.clone(), spec.command_args.clone())
    };

    Ok(Prepared {
        command,
        args,
        env,
        changes,
    })
}

/// Start the prepared child and wait for it, forwarding termination signals
pub async fn launch(
    prepared: &Prepared,
    use_shell: bool,
    verbose: bool,
) -> Result<Termination, LaunchError> {
    let mut signals = TermSignals::install(verbose).map_err(LaunchError::SignalSetup)?;

    let child = spawn(&prepared.command, &prepared.args, &prepared.changes, use_shell)?;
    signals.arm(child);

    signals.supervise().await
}

/// Run one invocation end to end
pub async fn run<S>(
    spec: &CommandSpec,
    source: &S,
    base_env: EnvMap,
) -> Result<Termination, LaunchError>
where
    S: SecretsSource + ?Sized,
{
    if spec.options.verbose {
        eprintln!("Options: {}", spec.to_json());
    }

    let prepared = prepare(spec, source, base_env).await?;
    debug!(command = %prepared.command, args = ?prepared.args, "Launching");

    launch(&prepared, spec.options.use_shell, spec.options.verbose).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::LaunchOptions;
    use crate::env::{ENVKEYS_VAR, ENVKEY_VAR};
    use crate::spawn::TerminalEvent;
    use async_trait::async_trait;
    use envkey_fetch::{FetchError, FetchOptions};

    const VALID_ENVKEY: &str = "wYv78UmHsfEu6jSqMZrU-3w1kwyF35nRYwsAJ-env-staging.envkey.com";
    const INVALID_ENVKEY: &str = "Emzt4BE7C23QtsC7gb1zinvalid-3NvfNiG1Boy6XH2o-env-staging.envkey.com";

    /// Answers VALID_ENVKEY with fixed variables and rejects anything else
    struct StubSource(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl SecretsSource for StubSource {
        async fn fetch(&self, key: &str, _options: &FetchOptions) -> Result<EnvMap, FetchError> {
            if key != VALID_ENVKEY {
                return Err(FetchError::Rejected("ENVKEY invalid".to_string()));
            }
            Ok(self
                .0
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect())
        }
    }

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn spec(command: &str, args: &[&str], key: &str, options: LaunchOptions) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            command_args: args.iter().map(|a| a.to_string()).collect(),
            secrets_key: Some(key.to_string()),
            permitted: None,
            options,
        }
    }

    #[tokio::test]
    async fn test_fetched_overrides_by_default() {
        let source = StubSource(vec![("BOB", "test")]);
        let spec = spec("node", &["-v"], VALID_ENVKEY, LaunchOptions::default());

        let prepared = prepare(&spec, &source, env(&[("BOB", "cool")])).await.unwrap();
        assert_eq!(prepared.command, "node");
        assert_eq!(prepared.args, vec!["-v"]);
        assert_eq!(prepared.env["BOB"], "test");
    }

    #[tokio::test]
    async fn test_no_override_keeps_existing_and_drops_envkey() {
        let source = StubSource(vec![("BOB", "test")]);
        let options = LaunchOptions {
            no_override: true,
            ..Default::default()
        };
        let spec = spec("node", &["-v"], VALID_ENVKEY, options);

        let base = env(&[("BOB", "cool"), ("ENVKEY", VALID_ENVKEY)]);
        let prepared = prepare(&spec, &source, base).await.unwrap();
        assert_eq!(prepared.env["BOB"], "cool");
        assert!(!prepared.env.contains_key(ENVKEY_VAR));
        assert_eq!(prepared.env[ENVKEYS_VAR], "BOB");
        assert_eq!(prepared.changes.set, env(&[(ENVKEYS_VAR, "BOB")]));
        assert_eq!(prepared.changes.removed, vec![ENVKEY_VAR.to_string()]);
    }

    #[tokio::test]
    async fn test_expand_envs_in_command_and_args() {
        let source = StubSource(vec![("PING", "PONG"), ("CMD", "node")]);
        let options = LaunchOptions {
            expand_envs: true,
            ..Default::default()
        };
        let spec = spec("$CMD", &["$PING", "\\$IP"], VALID_ENVKEY, options);

        let prepared = prepare(&spec, &source, EnvMap::new()).await.unwrap();
        assert_eq!(prepared.command, "node");
        assert_eq!(prepared.args, vec!["PONG", "\\$IP"]);
        assert_eq!(prepared.env["PING"], "PONG");
    }

    #[tokio::test]
    async fn test_no_expansion_without_flag() {
        let source = StubSource(vec![("PING", "PONG")]);
        let spec = spec("echo", &["$PING"], VALID_ENVKEY, LaunchOptions::default());

        let prepared = prepare(&spec, &source, EnvMap::new()).await.unwrap();
        assert_eq!(prepared.args, vec!["$PING"]);
    }

    #[tokio::test]
    async fn test_silent_ignores_secrets_failure() {
        let source = StubSource(vec![("BOB", "test")]);
        let options = LaunchOptions {
            silent: true,
            ..Default::default()
        };
        let spec = spec("node", &["-v"], INVALID_ENVKEY, options);

        let base = env(&[("PATH", "/usr/bin:/bin")]);
        let prepared = prepare(&spec, &source, base.clone()).await.unwrap();
        assert_eq!(prepared.env, base);
        assert!(!prepared.env.contains_key("BOB"));
        assert!(prepared.changes.is_empty());
    }

    #[tokio::test]
    async fn test_secrets_failure_aborts_without_silent() {
        let source = StubSource(vec![("BOB", "test")]);
        let spec = spec("node", &["-v"], INVALID_ENVKEY, LaunchOptions::default());

        let err = prepare(&spec, &source, EnvMap::new()).await.unwrap_err();
        assert!(matches!(err, LaunchError::SecretsFetch(_)));
    }

    #[tokio::test]
    async fn test_no_key_means_no_fetch() {
        let source = StubSource(vec![("BOB", "test")]);
        let mut spec = spec("node", &[], VALID_ENVKEY, LaunchOptions::default());
        spec.secrets_key = None;

        let base = env(&[("ENVKEY_LIKE", "x")]);
        let prepared = prepare(&spec, &source, base.clone()).await.unwrap();
        assert_eq!(prepared.env, base);
        assert!(!prepared.env.contains_key(ENVKEYS_VAR));
    }

    #[tokio::test]
    async fn test_run_mirrors_child_exit_code() {
        let source = StubSource(vec![("BOB", "test")]);
        let options = LaunchOptions {
            use_shell: true,
            ..Default::default()
        };
        let spec = spec("test \"$BOB\" = test && exit 9", &[], VALID_ENVKEY, options);

        let t = run(&spec, &source, env(&[("PATH", "/usr/bin:/bin")])).await.unwrap();
        assert_eq!(t.event, TerminalEvent::Exited(9));
        assert_eq!(t.exit_code(), 9);
    }

    #[tokio::test]
    async fn test_run_reports_spawn_failure() {
        let source = StubSource(Vec::new());
        let spec = spec("/nonexistent/program", &[], VALID_ENVKEY, LaunchOptions::default());

        let err = run(&spec, &source, EnvMap::new()).await.unwrap_err();
        assert!(matches!(err, LaunchError::ChildSpawn { .. }));
    }
}
