mod cli;
mod commands;
mod config;
mod error;
mod output;
mod progress;

use crate::{
    cli::{Args, Commands},
    commands::{CommandExecutor, DownloadRequest, parse_id},
    config::AppConfig,
    error::Result,
    output::OutputManager,
};
use clap::Parser;
use std::process;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json_output = matches!(
        args.command,
        Some(Commands::Download { json: true, .. }) | Some(Commands::Info { json: true, .. })
    );

    if let Err(e) = run(args).await {
        if json_output {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("Application error: {}", e);
            eprintln!("{}", OutputManager::new(true).format_error(&e));
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet, args.log_json);

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout.max(1);
    }

    let executor = CommandExecutor::new(config, !args.quiet);

    match args.command.unwrap_or(Commands::Interactive) {
        Commands::Download { id, opts, json } => {
            let request = DownloadRequest::new(parse_id(&id)?, executor.config(), &opts);
            executor.download(&request, json).await?;
        }

        Commands::Info {
            id,
            cookie_file,
            json,
        } => {
            executor.info(&id, cookie_file.as_deref(), json).await?;
        }

        Commands::Interactive => {
            executor.interactive().await?;
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }

        Commands::Config { show, reset } => {
            if reset {
                let path = AppConfig::reset(args.config.as_deref())?;
                println!("✓ Configuration reset to defaults ({})", path.display());
            } else if show {
                print!("{}", executor.config().show()?);
            } else {
                println!(
                    "Use --show to display current configuration or --reset to reset to defaults"
                );
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `--json` output on stdout stays parseable.
    if json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
