//! Lintloop CLI entry point.

use clap::Parser;

use lintloop::cli::{self, Cli, Commands};
use lintloop::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli::load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => cli::commands::run::execute(args, config, cli.json).await,
        Commands::Sessions(args) => {
            cli::commands::sessions::execute(args, &config, cli.json).await
        }
    };

    if let Err(err) = result {
        cli::handle_error(err, cli.json);
    }
}
