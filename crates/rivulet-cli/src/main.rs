//! rivulet CLI entry point.
//!
//! Binary name: `rivulet`
//!
//! Loads engine configuration, sets up tracing, then dispatches to the
//! command handler.

mod cli;
mod demos;

use clap::Parser;
use clap_complete::generate;
use rivulet_core::config::load_engine_config;
use rivulet_observe::tracing_setup::{init_tracing, shutdown_tracing};
use rivulet_types::config::LogFormat;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "rivulet", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_engine_config(&cli.config).await;

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,rivulet_core=debug",
        _ => "trace",
    };
    let log_format = cli.log_format.map(LogFormat::from).unwrap_or(config.log_format);
    init_tracing(log_format, config.otel, filter)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    tracing::debug!(config = ?config, "loaded engine configuration");

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, &config, cli.json, cli.quiet).await,
        Commands::Call { demo, step, args } => {
            cli::call::handle_call(demo, &step, &args, &config, cli.json).await
        }
        Commands::Describe { demo } => cli::describe::handle_describe(demo, cli.json),
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
