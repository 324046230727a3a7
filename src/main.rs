mod config;
mod error;
mod fetch;
mod identity;
mod logs;
mod process;
mod router;
#[cfg(test)]
mod test_support;
mod update;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use config::ConfigStore;
use error::{HassctlError, UsageError};
use fetch::{remote_base_url, HttpDownloader};
use identity::IdentityDelegate;
use process::SystemRunner;
use router::{print_usage, Command, Invocation, Router};
use std::env;
use std::io;
use std::iter;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use update::SelfUpdater;

const LOG_FILTER_ENV: &str = "HASSCTL_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "hassctl",
    version,
    about = "Control a Home Assistant installation",
    disable_help_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(short, long)]
    verbose: bool,
    #[arg(short, long)]
    help: bool,
}

/// Arguments split at the command name. Only `flags` ever reaches clap.
#[derive(Debug, Default, PartialEq, Eq)]
struct RawArgs {
    flags: Vec<String>,
    command: Option<String>,
    args: Vec<String>,
}

fn split_args(argv: impl IntoIterator<Item = String>) -> RawArgs {
    let mut raw = RawArgs::default();
    let mut rest = argv.into_iter();
    for arg in rest.by_ref() {
        if arg.len() > 1 && arg.starts_with('-') {
            raw.flags.push(arg);
        } else {
            raw.command = Some(arg);
            break;
        }
    }
    raw.args = rest.collect();
    raw
}

fn parse_flags(flags: Vec<String>) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(iter::once("hassctl".to_string()).chain(flags))
}

fn rejected_flag(err: &clap::Error) -> String {
    match err.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(arg)) => arg.clone(),
        _ => err.kind().to_string(),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "hassctl=debug" } else { "hassctl=warn" };
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

// Statuses outside 0..=255 (signal deaths, odd platforms) become 1.
fn exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn usage_error(err: &UsageError) -> ExitCode {
    eprintln!("hassctl: {err}\n");
    let _ = print_usage(&mut io::stderr());
    ExitCode::from(1)
}

fn run(command: Command) -> Result<i32, HassctlError> {
    let downloader = HttpDownloader::new(remote_base_url());
    let config = ConfigStore::from_env().resolve(&downloader)?;
    let runner = SystemRunner;
    let delegate = IdentityDelegate::for_current_user()?;
    let updater = SelfUpdater::for_current_exe(&downloader)?;
    let router = Router::new(&config, &runner, delegate, updater);
    let mut stdout = io::stdout().lock();
    router.dispatch(command, &mut stdout)
}

fn main() -> ExitCode {
    let raw = split_args(env::args().skip(1));
    let cli = match parse_flags(raw.flags) {
        Ok(cli) => cli,
        Err(err) if err.kind() == ErrorKind::DisplayVersion => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => return usage_error(&UsageError::UnknownOption(rejected_flag(&err))),
    };
    init_logging(cli.verbose);

    let name = if cli.help { Some("help") } else { raw.command.as_deref() };
    let command = match Invocation::parse(name, raw.args) {
        Ok(Invocation::Run(command)) => command,
        Ok(Invocation::Help) => {
            let _ = print_usage(&mut io::stdout());
            return ExitCode::from(1);
        }
        Err(err) => return usage_error(&err),
    };

    match run(command) {
        Ok(code) => ExitCode::from(exit_code(code)),
        Err(err) => {
            eprintln!("hassctl: {err}");
            ExitCode::from(1)
        }
    }
}
