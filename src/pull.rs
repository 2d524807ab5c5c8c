//! Purpose: Periodic client: poll a bridge's export and reload a local table.
//! Exports: `PullConfig`, `parse_where`, `pull`.
//! Role: The only retry mechanism in the system; a failed cycle is logged and
//! retried on the next interval.
//! Invariants: Truncate and import run on the same pooled connection.
//! Invariants: With `--once`, the first cycle's failure is the process result.

use std::time::Duration;

use deadpool_postgres::Pool;
use tracing::{info, warn};

use pgpipe::api::{
    CopyFormat, Error, ErrorKind, ImportSpec, export_url, fetch_export, run_reload,
};

#[derive(Clone, Debug)]
pub struct PullConfig {
    /// Full export endpoint URL of the remote bridge.
    pub host: String,
    /// Source table exported by the remote bridge.
    pub table: String,
    /// Destination table to load into.
    pub to: String,
    pub select: Option<String>,
    /// Filters as `<column>.<op>` keys with their operand values.
    pub wheres: Vec<(String, String)>,
    pub csv: bool,
    pub interval: Duration,
    pub once: bool,
    pub keep_existing: bool,
}

/// Parse a `--where` argument of the form `<column>.<op>=<value>`.
pub fn parse_where(arg: &str) -> Result<(String, String), Error> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("invalid --where argument")
            .with_hint("Use the form <column>.<op>=<value>, e.g. age.gt=30.")),
    }
}

pub async fn pull(config: PullConfig, pool: Pool) -> Result<(), Error> {
    validate_config(&config)?;
    loop {
        match cycle(&config, &pool).await {
            Ok(rows) => info!(rows, table = %config.to, "cycle complete"),
            Err(err) if config.once => return Err(err),
            Err(err) => warn!(error = %err, "cycle failed; retrying next interval"),
        }
        if config.once {
            return Ok(());
        }
        tokio::time::sleep(config.interval).await;
    }
}

fn validate_config(config: &PullConfig) -> Result<(), Error> {
    if config.table.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("--table must not be empty"));
    }
    if config.to.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("--to must not be empty"));
    }
    if config.interval.is_zero() && !config.once {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--interval-secs must be greater than zero")
            .with_hint("Use a positive value like 3, or --once for a single cycle."));
    }
    Ok(())
}

async fn cycle(config: &PullConfig, pool: &Pool) -> Result<u64, Error> {
    let url = export_url(
        &config.host,
        &config.table,
        config.select.as_deref(),
        &config.wheres,
        config.csv,
    )?;
    info!(url = %url, "fetching export");
    let source = fetch_export(url).await?;
    let spec = ImportSpec {
        table: config.to.clone(),
        columns: config.select.clone(),
        format: if config.csv {
            CopyFormat::Csv
        } else {
            CopyFormat::Text
        },
        host: None,
    };
    run_reload(pool, &spec, source, !config.keep_existing).await
}
