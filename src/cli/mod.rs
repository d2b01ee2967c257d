//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::domain::errors::DomainError;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

use commands::run::RunArgs;
use commands::sessions::SessionsArgs;

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(name = "lintloop")]
#[command(about = "Iteratively fix lint findings until the codebase converges", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .lintloop/config.yaml and .lintloop/local.yaml)
    #[arg(short, long, global = true, env = "LINTLOOP_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the fix loop over a scope, or resume an interrupted session
    Run(RunArgs),

    /// Inspect persisted sessions
    Sessions(SessionsArgs),
}

/// Load layered configuration, preferring an explicit file when given.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = exit_code(&err);
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "chain": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", console::style("error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(code)
}

/// 2 for usage-level problems (unknown or finished sessions), 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DomainError>() {
        Some(DomainError::SessionNotFound(_) | DomainError::SessionTerminated { .. }) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn parses_run_with_resume() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["lintloop", "--json", "run", "--resume", &id.to_string()]);
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.resume, Some(id));
                assert_eq!(args.scope, ".");
            }
            Commands::Sessions(_) => panic!("expected run"),
        }
    }

    #[test]
    fn parses_run_with_scope_and_cap() {
        let cli = Cli::parse_from(["lintloop", "run", "--scope", "src/", "--max-iterations", "3"]);
        assert!(!cli.json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.scope, "src/");
        assert_eq!(args.max_iterations, Some(3));
        assert!(args.resume.is_none());
    }

    #[test]
    fn session_errors_map_to_usage_exit_code() {
        let err = anyhow::Error::new(DomainError::SessionNotFound(Uuid::nil()));
        assert_eq!(exit_code(&err), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
