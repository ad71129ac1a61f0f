use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tasksync",
    version,
    about = "Live-synced personal task board",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rcfile", global = true)]
    pub rcfile: Option<PathBuf>,

    /// Directory of the local backend.
    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in with a local account.
    Login {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        photo: Option<String>,
    },
    Logout,
    Whoami,
    /// Create a task.
    Add(AddArgs),
    /// Show tasks as a flat list.
    List(ViewArgs),
    /// Show tasks grouped by status.
    Board(ViewArgs),
    /// Show every field of one task.
    Show { id: String },
    /// Change fields of a task. Only the given fields are written.
    Edit(EditArgs),
    Delete { id: String },
    /// Set the status of every listed task.
    SelectStatus {
        status: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete every listed task.
    SelectDelete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show the change log of a task.
    History { id: String },
    /// Keep the view on screen and redraw it on every change until Ctrl-C.
    Watch {
        #[arg(long, conflicts_with = "list")]
        board: bool,
        #[arg(long)]
        list: bool,
        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    pub title: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    /// `today`, `tomorrow`, `+Nd`, `DD-MM-YYYY` or `YYYY-MM-DD`. Defaults to today.
    #[arg(long)]
    pub due: Option<String>,
    /// File to upload and attach.
    #[arg(long)]
    pub attach: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub category: Option<String>,
    /// One of today, tomorrow, this-week, this-month.
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Drag ACTIVE onto OVER within its status bucket before drawing.
    #[arg(long = "move", value_name = "ACTIVE:OVER")]
    pub move_pair: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}

/// Splits `ACTIVE:OVER`.
pub fn parse_move_pair(raw: &str) -> anyhow::Result<(String, String)> {
    let (active, over) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected ACTIVE:OVER, got: {raw}"))?;
    let (active, over) = (active.trim(), over.trim());
    if active.is_empty() || over.is_empty() {
        return Err(anyhow!("expected ACTIVE:OVER, got: {raw}"));
    }
    Ok((active.to_string(), over.to_string()))
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, parse_move_pair, preprocess_args};

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["tasksync", "rc.color=off", "list", "rc.view.mode:board"]));
        assert_eq!(pre.cleaned_args, args(&["tasksync", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.view.mode".to_string(), "board".to_string()),
            ]
        );
    }

    #[test]
    fn subcommands_parse() {
        let cli = GlobalCli::parse_from(args(&[
            "tasksync", "-vv", "select-status", "done", "a", "b",
        ]));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::SelectStatus { status, ids } => {
                assert_eq!(status, "done");
                assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = GlobalCli::parse_from(args(&[
            "tasksync", "board", "--category", "Work", "--move", "a:b",
        ]));
        assert!(matches!(cli.command, Command::Board(ref view) if view.move_pair.as_deref() == Some("a:b")));
    }

    #[test]
    fn move_pair_needs_both_ids() {
        assert_eq!(
            parse_move_pair("a:b").expect("pair"),
            ("a".to_string(), "b".to_string())
        );
        assert!(parse_move_pair("a").is_err());
        assert!(parse_move_pair(":b").is_err());
    }
}
