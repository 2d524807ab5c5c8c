//! Purpose: `pgpipe` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, builds the pool, runs commands.
//! Invariants: The connection pool is constructed once here and passed
//! explicitly to the server and the periodic client.
//! Invariants: Process exit code is derived from `api::to_exit_code`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::aot::Shell;

mod pull;
mod serve;

use pgpipe::api::{Error, ErrorKind, build_pool, to_exit_code};
use pull::{PullConfig, parse_where, pull};
use serve::{ServeConfig, init_tracing, serve};

#[derive(Parser)]
#[command(
    name = "pgpipe",
    version,
    about = "Stream PostgreSQL tables over HTTP with the COPY protocol"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP bridge server.
    Serve(ServeArgs),
    /// Periodically fetch an export from a bridge and reload a local table.
    Pull(PullArgs),
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:2001")]
    bind: SocketAddr,
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    /// Maximum pooled connections.
    #[arg(long, default_value_t = 8)]
    pool_size: usize,
    /// How long a transfer may wait for a pooled connection.
    #[arg(long, default_value_t = 30_000)]
    acquire_timeout_ms: u64,
    /// Allow binding to a non-loopback address.
    #[arg(long)]
    allow_non_loopback: bool,
}

#[derive(clap::Args)]
struct PullArgs {
    /// Full export endpoint URL of the remote bridge.
    #[arg(long)]
    host: String,
    /// Source table to export from the remote bridge.
    #[arg(long)]
    table: String,
    /// Destination table to load into.
    #[arg(long)]
    to: String,
    /// Comma-separated column list applied to both sides.
    #[arg(long)]
    select: Option<String>,
    /// Filter in the form <column>.<op>=<value>; repeatable.
    #[arg(long = "where", value_name = "COL.OP=VALUE")]
    wheres: Vec<String>,
    /// Transfer CSV with a header row instead of the native text format.
    #[arg(long)]
    csv: bool,
    /// Seconds between cycles.
    #[arg(long, default_value_t = 3)]
    interval_secs: u64,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
    /// Skip truncating the destination before each load.
    #[arg(long)]
    keep_existing: bool,
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    /// Maximum pooled connections.
    #[arg(long, default_value_t = 2)]
    pool_size: usize,
    /// How long a cycle may wait for a pooled connection.
    #[arg(long, default_value_t = 30_000)]
    acquire_timeout_ms: u64,
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            init_tracing();
            let config = ServeConfig {
                bind: args.bind,
                allow_non_loopback: args.allow_non_loopback,
            };
            let pool = build_pool(
                &args.database_url,
                args.pool_size,
                Duration::from_millis(args.acquire_timeout_ms),
            )?;
            runtime()?.block_on(serve(config, pool))
        }
        Command::Pull(args) => {
            init_tracing();
            let wheres = args
                .wheres
                .iter()
                .map(|arg| parse_where(arg))
                .collect::<Result<Vec<_>, _>>()?;
            let config = PullConfig {
                host: args.host,
                table: args.table,
                to: args.to,
                select: args.select,
                wheres,
                csv: args.csv,
                interval: Duration::from_secs(args.interval_secs),
                once: args.once,
                keep_existing: args.keep_existing,
            };
            let pool = build_pool(
                &args.database_url,
                args.pool_size,
                Duration::from_millis(args.acquire_timeout_ms),
            )?;
            runtime()?.block_on(pull(config, pool))
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::aot::generate(shell, &mut command, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })
}

fn emit_error(err: &Error) {
    eprintln!("pgpipe: {err}");
    if let Some(hint) = err.hint() {
        eprintln!("hint: {hint}");
    }
}
