//! Command line parsing
//!
//! The command line is `[options] <command> [...args]`. Everything from the
//! first token that is not an option (or an option's value) belongs to the
//! child, so the options are split off by hand and only that prefix is given
//! to clap.

use clap::{ArgAction, Parser};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::ArgumentError;

/// envkey-cmd - run a command with the variables unlocked by an ENVKEY
#[derive(Parser, Debug)]
#[command(name = "envkey-cmd")]
#[command(version)]
#[command(disable_version_flag = true)]
#[command(args_override_self = true)]
#[command(about = "Run a command with the environment variables unlocked by an ENVKEY")]
#[command(override_usage = "envkey-cmd [OPTIONS] <command> [...args]")]
#[command(after_help = "EXAMPLES:\n\
    envkey-cmd -e $MY_ENVKEY node server.js\n\
    envkey-cmd --permitted DATABASE_URL,PORT npm start\n\
    envkey-cmd -x --no-override curl $API_URL\n\
    envkey-cmd --use-shell 'echo $ENVKEYS | tr , \"\\n\"'")]
struct Flags {
    /// The ENVKEY to use; defaults to the ENVKEY environment variable
    #[arg(short = 'e', long = "envkey", value_name = "ENVKEY")]
    envkey: Option<String>,

    /// Only keep these fetched variables (defaults to all)
    #[arg(long, value_name = "VAR1,VAR2,...")]
    permitted: Option<String>,

    /// Do not override existing environment variables
    #[arg(long)]
    no_override: bool,

    /// Ignore secrets errors and only fail when the command fails
    #[arg(long)]
    silent: bool,

    /// Run the command through /bin/sh
    #[arg(long)]
    use_shell: bool,

    /// Print debugging information
    #[arg(long)]
    verbose: bool,

    /// Replace $VAR in the command and its arguments
    #[arg(short = 'x', long)]
    expand_envs: bool,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    #[allow(dead_code)]
    version: Option<bool>,
}

/// Behavioral switches for a launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaunchOptions {
    pub expand_envs: bool,
    pub no_override: bool,
    pub use_shell: bool,
    pub silent: bool,
    pub verbose: bool,
}

/// A fully parsed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub command: String,
    pub command_args: Vec<String>,
    #[serde(serialize_with = "serialize_masked")]
    pub secrets_key: Option<String>,
    pub permitted: Option<Vec<String>>,
    pub options: LaunchOptions,
}

impl CommandSpec {
    /// One-line JSON rendering with the secrets key masked
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unprintable: {}>", e))
    }
}

/// How a single leading token is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// A known option, complete in itself
    Flag,
    /// A known option whose value is the next token
    FlagWithValue,
    /// `--`: the next token is the command
    EndOfOptions,
    /// An option we don't know; dropped
    Unknown,
    /// The command
    Command,
}

fn classify(token: &str) -> Token {
    if token == "--" {
        return Token::EndOfOptions;
    }

    if let Some(long) = token.strip_prefix("--") {
        let (name, inline_value) = match long.split_once('=') {
            Some((name, _)) => (name, true),
            None => (long, false),
        };
        return match name {
            "envkey" | "permitted" if inline_value => Token::Flag,
            "envkey" | "permitted" => Token::FlagWithValue,
            "no-override" | "silent" | "use-shell" | "verbose" | "expand-envs" | "version"
            | "help" => Token::Flag,
            _ => Token::Unknown,
        };
    }

    // Clusters of short flags: -x, -xv, -e KEY, -eKEY, -xe KEY
    if let Some(shorts) = token.strip_prefix('-').filter(|s| !s.is_empty()) {
        for (i, c) in shorts.char_indices() {
            match c {
                'x' | 'v' | 'h' => continue,
                'e' if i + c.len_utf8() == shorts.len() => return Token::FlagWithValue,
                'e' => return Token::Flag,
                _ => return Token::Unknown,
            }
        }
        return Token::Flag;
    }

    Token::Command
}

/// Parse the arguments after the program name
///
/// `ambient_envkey` is used when no `--envkey` is given; callers pass the
/// value of the `ENVKEY` environment variable.
pub fn parse(
    raw_args: Vec<String>,
    ambient_envkey: Option<String>,
) -> Result<CommandSpec, ArgumentError> {
    let mut options: Vec<&str> = Vec::new();
    let mut command_at = None;

    let mut i = 0;
    while i < raw_args.len() {
        let token = raw_args[i].as_str();
        match classify(token) {
            Token::Flag => options.push(token),
            Token::FlagWithValue => {
                options.push(token);
                if let Some(value) = raw_args.get(i + 1) {
                    options.push(value.as_str());
                    i += 1;
                }
            }
            Token::Unknown => debug!(option = token, "Ignoring unknown option"),
            Token::EndOfOptions => {
                command_at = Some(i + 1);
                break;
            }
            Token::Command => {
                command_at = Some(i);
                break;
            }
        }
        i += 1;
    }

    let flags = Flags::try_parse_from(std::iter::once("envkey-cmd").chain(options))?;

    let command = command_at
        .and_then(|at| raw_args.get(at))
        .filter(|command| !command.is_empty())
        .ok_or(ArgumentError::MissingCommand)?
        .clone();
    let command_args = command_at
        .map(|at| raw_args[at + 1..].to_vec())
        .unwrap_or_default();

    let secrets_key = flags
        .envkey
        .filter(|key| !key.is_empty())
        .or_else(|| ambient_envkey.filter(|key| !key.is_empty()));

    Ok(CommandSpec {
        command,
        command_args,
        secrets_key,
        permitted: parse_permitted(flags.permitted),
        options: LaunchOptions {
            expand_envs: flags.expand_envs,
            no_override: flags.no_override,
            use_shell: flags.use_shell,
            silent: flags.silent,
            verbose: flags.verbose,
        },
    })
}

/// Split on commas, trim, drop empties and de-duplicate keeping the first
/// occurrence
fn parse_permitted(list: Option<String>) -> Option<Vec<String>> {
    let mut permitted: Vec<String> = Vec::new();
    for name in list.as_deref().unwrap_or_default().split(',') {
        let name = name.trim();
        if !name.is_empty() && !permitted.iter().any(|p| p == name) {
            permitted.push(name.to_string());
        }
    }

    if permitted.is_empty() {
        None
    } else {
        Some(permitted)
    }
}

fn serialize_masked<S: Serializer>(key: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match key {
        Some(key) => {
            let visible: String = key.chars().take(4).collect();
            serializer.serialize_some(&format!("{}****", visible))
        }
        None => serializer.serialize_none(),
    }
}
