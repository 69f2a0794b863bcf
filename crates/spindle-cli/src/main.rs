use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use spindle_core::store::Catalog;
use spindle_import::Importer;
use spindle_server::{CddbProtocol, LineServer};

/// Sessions idle longer than this are closed.
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "spindle", version, about)]
struct Cli {
    /// Suppress the protocol greeting on connect (the port expects
    /// HTTP; a greeting would corrupt the first response)
    #[arg(short = 'c')]
    expect_http: bool,

    /// Database file
    #[arg(short = 'd', value_name = "FILE", default_value = "spindle.sqlite")]
    database: PathBuf,

    /// Per-track difference allowed in relaxed matching, in seconds
    #[arg(short = 'f', value_name = "SEC", default_value_t = 4,
          value_parser = clap::value_parser!(u16).range(1..=8))]
    max_trackdiff: u16,

    /// Import an initial catalog from a tar archive ('-' for stdin;
    /// a .bz2 suffix enables decompression)
    #[arg(short = 'i', value_name = "FILE")]
    import: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', value_name = "PORT", default_value_t = 8880)]
    port: u16,

    /// Apply an incremental update archive ('-' for stdin)
    #[arg(short = 'u', value_name = "FILE")]
    update: Option<String>,

    /// Print protocol traffic on stderr
    #[arg(short = 'v')]
    log_protocol: bool,
}

fn run_import(database: &Path, file: &str, initial: bool) -> Result<()> {
    let catalog = Catalog::open(database)?;
    let mut importer = Importer::new(catalog);
    importer.import(file, initial)?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(file) = &cli.import {
        run_import(&cli.database, file, true)?;
    }
    if let Some(file) = &cli.update {
        // an update differs from an import only by keeping the indexes
        // up while it runs
        run_import(&cli.database, file, false)?;
    }

    let catalog = Catalog::open(&cli.database)?;
    let protocol = CddbProtocol::new(catalog, cli.expect_http, cli.log_protocol, cli.max_trackdiff);
    let server = LineServer::new(protocol, cli.port, SESSION_TIMEOUT);
    server.run()?;

    Ok(())
}
