use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use chatvault_lib::config;
use chatvault_lib::sync::maintenance::run_maintenance;
use chatvault_lib::sync::ProtocolEvent;
use chatvault_lib::{Result, Vault};

#[derive(Parser)]
#[command(name = "chatvault")]
#[command(version, about = "Write-behind store for messaging account data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the standard search paths)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read newline-delimited JSON events from stdin until EOF or Ctrl-C
    Ingest,
    /// Print sync metadata as JSON
    Stats,
    /// Export a backup and print its path
    Backup,
    /// Run one retention sweep and flush
    Trim,
}

#[tokio::main]
async fn main() -> ExitCode {
    chatvault_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::load_config(cli.config.as_deref())?;
    let vault = Vault::open(config)?;

    let outcome = execute(&vault, cli.command).await;

    // Always flush, even when the command failed
    let report = vault.shutdown().await;
    outcome?;
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn execute(vault: &Vault, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest => ingest(vault).await?,
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&vault.store().metadata())?);
        }
        Commands::Backup => {
            let path = vault.backup().await?;
            println!("{}", path.display());
        }
        Commands::Trim => {
            let sweep_length = vault.config().retention.sweep_length;
            let (report, flushed) = run_maintenance(vault.store(), sweep_length).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Err(e) = flushed {
                warn!("Flush after sweep failed: {}", e);
            }
        }
    }
    Ok(())
}

/// Feed stdin lines to the ingestor until EOF or Ctrl-C
async fn ingest(vault: &Vault) -> Result<()> {
    let (tx, rx) = flume::unbounded::<ProtocolEvent>();
    let ingestor = vault.ingestor();
    let worker = tokio::spawn(async move { ingestor.run(rx).await });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0u64;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("End of input after {} line(s)", line_number);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input after line {}: {}", line_number, e);
                        break;
                    }
                };
                line_number += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ProtocolEvent>(&line) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            warn!("Ingestion stopped, discarding remaining input");
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed event on line {}: {}", line_number, e),
                }
            }
            _ = &mut interrupted => {
                info!("Interrupted, finishing queued events");
                break;
            }
        }
    }

    drop(tx);
    match worker.await {
        Ok(report) => println!("{}", serde_json::to_string(&report)?),
        Err(e) => error!("Ingestion task failed: {}", e),
    }
    Ok(())
}
