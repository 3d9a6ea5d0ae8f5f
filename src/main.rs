//! Binary entry point for the Roost CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;

use roost::{
    AwsClients, AwsError, AwsProvider, DynamoLockStore, LeaseLock, LifecycleError,
    LifecycleOrchestrator, PemKeyStore, RoostConfig, collect_profiles, render_table,
};

#[derive(Debug, Parser)]
#[command(
    name = "roost",
    about = "Provision, reuse, and retire per-profile cloud instances",
    arg_required_else_help = true
)]
enum Cli {
    /// Reuse, restore, or create the instance for a profile.
    #[command(name = "use", about = "Reuse, restore, or create the instance for a profile")]
    Use(UseCommand),
    /// Snapshot and terminate the instance for a profile.
    #[command(name = "retire", about = "Snapshot and terminate the instance for a profile")]
    Retire(RetireCommand),
    /// List managed profiles.
    #[command(name = "list", about = "List managed profiles")]
    List(ListCommand),
}

#[derive(Debug, Parser)]
struct UseCommand {
    /// Profile identifying the managed instance slot.
    profile: String,
}

#[derive(Debug, Parser)]
struct RetireCommand {
    /// Profile identifying the managed instance slot.
    profile: String,
}

#[derive(Debug, Parser)]
struct ListCommand {
    /// Show all instances and snapshot-only profiles, not just running ones.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError<AwsError, AwsError>),
    #[error("failed to list managed profiles: {0}")]
    List(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Use(command) => use_command(command).await,
        Cli::Retire(command) => retire_command(command).await,
        Cli::List(command) => list_command(command).await,
    }
}

async fn build_orchestrator()
-> Result<LifecycleOrchestrator<AwsProvider, DynamoLockStore, PemKeyStore>, CliError> {
    let config =
        RoostConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let settings = config
        .as_settings()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let clients = AwsClients::connect(&config)
        .await
        .map_err(|err| CliError::Config(err.to_string()))?;

    let provider = AwsProvider::new(clients.ec2);
    let lock = LeaseLock::new(DynamoLockStore::new(clients.dynamodb));
    let key_writer = PemKeyStore::current_dir();
    Ok(LifecycleOrchestrator::new(
        provider, lock, key_writer, settings,
    ))
}

async fn use_command(args: UseCommand) -> Result<i32, CliError> {
    let orchestrator = build_orchestrator().await?;
    let outcome = orchestrator.ensure(&args.profile).await?;

    let address = outcome
        .public_address
        .unwrap_or_else(|| String::from("no public address yet"));
    writeln!(
        io::stdout(),
        "instance {} ready for profile {} ({}; {address})",
        outcome.instance_id,
        args.profile,
        outcome.source,
    )
    .ok();
    Ok(0)
}

async fn retire_command(args: RetireCommand) -> Result<i32, CliError> {
    let orchestrator = build_orchestrator().await?;
    let outcome = orchestrator.retire(&args.profile).await?;

    writeln!(
        io::stdout(),
        "instance {} retired for profile {}; snapshot {} saved",
        outcome.instance_id,
        args.profile,
        outcome.snapshot_id,
    )
    .ok();
    for warning in &outcome.cleanup.warnings {
        writeln!(io::stderr(), "warning: {warning}").ok();
    }
    Ok(0)
}

async fn list_command(args: ListCommand) -> Result<i32, CliError> {
    let config =
        RoostConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let clients = AwsClients::connect(&config)
        .await
        .map_err(|err| CliError::Config(err.to_string()))?;
    let provider = AwsProvider::new(clients.ec2);

    let rows = collect_profiles(&provider, args.all)
        .await
        .map_err(|err| CliError::List(err.to_string()))?;

    if rows.is_empty() {
        writeln!(io::stdout(), "No profiles managed by roost found.").ok();
    } else {
        write!(io::stdout(), "{}", render_table(&rows)).ok();
    }
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_renders_config_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(String::from("missing access key"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("configuration error: missing access key"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn cli_parses_use_with_profile() {
        let cli = Cli::try_parse_from(["roost", "use", "alpha"])
            .unwrap_or_else(|err| panic!("parse: {err}"));
        let Cli::Use(command) = cli else {
            panic!("expected use subcommand");
        };
        assert_eq!(command.profile, "alpha");
    }

    #[test]
    fn cli_parses_list_all_flag() {
        let cli = Cli::try_parse_from(["roost", "list", "--all"])
            .unwrap_or_else(|err| panic!("parse: {err}"));
        let Cli::List(command) = cli else {
            panic!("expected list subcommand");
        };
        assert!(command.all);
    }

    #[test]
    fn cli_requires_profile_argument() {
        let result = Cli::try_parse_from(["roost", "use"]);
        assert!(result.is_err(), "missing profile should fail parsing");
    }
}
