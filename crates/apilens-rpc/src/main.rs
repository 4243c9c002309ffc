//! apilens - API schema scanner, request runner and JSON-RPC server.
//!
//! `apilens serve` exposes the executor and the schema catalog over JSON-RPC
//! for assistant clients; the other subcommands run the same operations once
//! from the shell.

mod commands;
mod handlers;
mod server;

use anyhow::Result;
use apilens_core::ProbeSettings;
use clap::{Parser, Subcommand};
use commands::{ExecArgs, RecordArgs, RequestArgs};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "apilens")]
#[command(version, about = "Resilient HTTP request runner and API schema manager")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Settings file (defaults to ./apilens.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the JSON-RPC server
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory of schema files
        #[arg(long)]
        schemas_dir: Option<PathBuf>,
    },

    /// List schemas and endpoints found in the schemas directory
    Scan {
        /// Directory of schema files
        #[arg(long)]
        schemas_dir: Option<PathBuf>,

        /// Print JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Execute an ad-hoc request and print the result as JSON
    Request(RequestArgs),

    /// Execute an endpoint from a schema
    Call {
        /// Schema name
        schema: String,

        /// Endpoint name or "METHOD /path"
        endpoint: String,

        /// Path parameter as "name=value" (repeatable)
        #[arg(short = 'P', long = "path-param")]
        path_params: Vec<String>,

        /// Directory of schema files
        #[arg(long)]
        schemas_dir: Option<PathBuf>,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Execute a request and record the endpoint in a schema file
    Record(RecordArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let settings = ProbeSettings::load_or_default(cli.config.as_deref())?;
    let schemas_dir = |flag: Option<PathBuf>| flag.unwrap_or_else(|| settings.schemas_dir());

    let succeeded = match cli.command {
        Command::Serve {
            port,
            host,
            schemas_dir: dir,
        } => {
            let dir = schemas_dir(dir);
            info!("Starting apilens RPC server");
            info!("Schemas directory: {}", dir.display());

            let state = Arc::new(server::AppState::from_settings(&settings, dir)?);
            let addr = server::start_server(state, &host, port).await?;

            // Machine-readable port for the launching process
            println!("RPC_PORT={}", addr.port());
            info!("RPC server running on {}", addr);

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, exiting");
            true
        }
        Command::Scan {
            schemas_dir: dir,
            json,
        } => {
            commands::scan(&schemas_dir(dir), json)?;
            true
        }
        Command::Request(args) => commands::request(&settings, &args).await?,
        Command::Call {
            schema,
            endpoint,
            path_params,
            schemas_dir: dir,
            exec,
        } => {
            commands::call(
                &settings,
                &schemas_dir(dir),
                &schema,
                &endpoint,
                &path_params,
                &exec,
            )
            .await?
        }
        Command::Record(args) => commands::record(&settings, &args).await?,
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
