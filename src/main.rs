mod classify;
mod config;
mod csv_sink;
mod errors;
mod fanout;
mod heuristics;
mod ingest;
mod invoice;
mod invoice_intake;
mod llm_extract;
mod normalize;
mod ocr;
mod server;
mod voucher_db;

use clap::{Parser, Subcommand};
use csv_sink::CsvSink;
use invoice_intake::InvoiceIntake;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voucher_db::VoucherStore;

#[derive(Parser)]
#[command(name = "site_inward", about = "Voucher ingestion and invoice extraction for the site back office")]
struct Cli {
    /// TOML config file; defaults apply when it is missing.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve,
    /// Ingest a voucher export file.
    Ingest { file: PathBuf },
    /// Extract and store the fields of one scanned bill (PDF, PNG or JPEG).
    ExtractInvoice {
        file: PathBuf,
        #[arg(long)]
        vehicle_number: Option<String>,
    },
    /// Print row counts for every table.
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = Cli::parse();
    let cfg = config::Config::load_or_default(&cli.config)?;
    cfg.ensure_dirs()?;

    match cli.command {
        Command::Serve => server::serve(&cfg).await?,
        Command::Ingest { file } => {
            let bytes = std::fs::read(&file)?;
            let store = VoucherStore::new(&cfg.db_path)?;
            let sink = CsvSink::new(&cfg.csv.dir);
            let summary = ingest::ingest_bytes(&store, &sink, &cfg.audit, &bytes)?;
            info!(file = %file.display(), po_written = summary.po_written, "Ingest finished");
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::ExtractInvoice { file, vehicle_number } => {
            let store = VoucherStore::new(&cfg.db_path)?;
            let intake = InvoiceIntake::from_config(&cfg);
            let fields = intake.process_path(&file, vehicle_number.as_deref()).await?;
            let id = store.insert_invoice_item(&fields)?;
            info!(id, file = %file.display(), "Invoice stored");
            println!("{}", serde_json::to_string_pretty(&fields)?);
        }
        Command::Stats => {
            let store = VoucherStore::new(&cfg.db_path)?;
            let counts = store.get_counts()?;
            info!(
                vouchers = counts.vouchers,
                po_details = counts.po_details,
                invoice_items = counts.invoice_items,
                "STATISTICS"
            );
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}
