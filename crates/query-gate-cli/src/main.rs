// crates/query-gate-cli/src/main.rs
// ============================================================================
// Module: Query Gate CLI Entry Point
// Description: Command dispatcher for the Query Gate MCP server.
// Purpose: Load configuration, validate it, and serve the tool surface.
// Dependencies: clap, query-gate-mcp, tokio
// ============================================================================

//! ## Overview
//! The Query Gate CLI starts the MCP server from a TOML configuration file
//! and offers a standalone configuration check for deployment pipelines.
//! Inputs are untrusted and validated before any component starts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use query_gate_mcp::McpServer;
use query_gate_mcp::QueryGateConfig;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Query Gate command-line interface.
#[derive(Debug, Parser)]
#[command(name = "query-gate", about = "MCP gateway for named, pre-approved SQL queries")]
struct Cli {
    /// Selected subcommand.
    #[command(subcommand)]
    command: Command,
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Start the MCP server with the given configuration.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Validate a configuration file and exit.
    CheckConfig {
        /// Path to the TOML configuration file.
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Process entry point.
#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            let _ = writeln!(std::io::stderr(), "query-gate: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed command.
async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Serve {
            config,
        } => {
            let config = QueryGateConfig::load(&config).map_err(|error| error.to_string())?;
            let server = McpServer::from_config(config).map_err(|error| error.to_string())?;
            server.serve().await.map_err(|error| error.to_string())
        }
        Command::CheckConfig {
            config,
        } => {
            let config = QueryGateConfig::load(&config).map_err(|error| error.to_string())?;
            config.validate().map_err(|error| error.to_string())?;
            let _ = writeln!(std::io::stdout(), "configuration ok");
            Ok(())
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
