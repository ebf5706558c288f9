//! juiced CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use juiced_core::{TracingConfig, TracingOutputFormat, init_tracing};

use juiced_cli::cli::{Cli, Command, ConfigAction};
use juiced_cli::commands;
use juiced_cli::config::ClientConfig;
use juiced_cli::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(tracing_config(&cli, &config)) {
        eprintln!("error: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> ClientResult<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    config.merge_cli(cli);
    Ok(config)
}

fn tracing_config(cli: &Cli, config: &ClientConfig) -> TracingConfig {
    let base = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::from_log_level(&config.log_level).unwrap_or_else(|e| {
            eprintln!("warning: {e}, using info");
            TracingConfig::default()
        })
    };
    if cli.json_logs {
        base.with_format(TracingOutputFormat::Json)
    } else {
        base
    }
}

async fn run(cli: Cli, config: ClientConfig) -> ClientResult<()> {
    match cli.command {
        None => commands::run::run(&config, false).await,
        Some(Command::Run { no_reconnect }) => commands::run::run(&config, no_reconnect).await,
        Some(Command::Queue { message }) => commands::queue::queue(&config, &message.join(" ")),
        Some(Command::Status) => commands::status::status(&config),
        Some(Command::Config { action }) => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
