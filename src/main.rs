use clap::{Args, Parser, Subcommand, ValueEnum};
use clinic_billing::application::sweeper;
use clinic_billing::config::{
    DEFAULT_GATEWAY_BASE_URL, DEFAULT_PUBLIC_BASE_URL, GatewayConfig, LiveCredentials, Settings,
};
use clinic_billing::domain::plan;
use clinic_billing::domain::ports::{PaymentStoreBox, SubscriptionStoreBox};
use clinic_billing::infrastructure::in_memory::{InMemoryPaymentStore, InMemorySubscriptionStore};
#[cfg(feature = "storage-rocksdb")]
use clinic_billing::infrastructure::rocksdb::RocksDBStore;
use clinic_billing::interfaces::csv::command_reader::CommandReader;
use clinic_billing::interfaces::csv::report_writer::ReportWriter;
use clinic_billing::interfaces::replay::ScriptRunner;
use clinic_billing::telemetry;
use miette::{IntoDiagnostic, Result, miette};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the subscription plan catalogue as CSV
    Plans,
    /// Replay a CSV script of billing commands and print a report
    Replay(ReplayArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Report {
    Payments,
    Subscriptions,
    Stats,
}

#[derive(Args)]
struct ReplayArgs {
    /// Input commands CSV file
    input: PathBuf,

    /// What to print once the script has run
    #[arg(long, value_enum, default_value = "payments")]
    report: Report,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Staff member recorded as the creator of every payment
    #[arg(long, default_value_t = 1)]
    staff_id: u64,

    /// Seconds between background expiry sweeps
    #[arg(long, default_value_t = 3600)]
    sweep_interval_secs: u64,

    #[command(flatten)]
    gateway: GatewayArgs,
}

#[derive(Args)]
struct GatewayArgs {
    /// Talk to the real payment provider instead of simulating checkouts
    #[arg(long)]
    live_gateway: bool,

    #[arg(long, env = "CLINIC_GATEWAY_API_KEY", hide_env_values = true)]
    gateway_api_key: Option<String>,

    #[arg(long, env = "CLINIC_GATEWAY_SITE_ID")]
    gateway_site_id: Option<String>,

    #[arg(long, env = "CLINIC_GATEWAY_BASE_URL", default_value = DEFAULT_GATEWAY_BASE_URL)]
    gateway_base_url: String,

    /// Shared secret for webhook signatures
    #[arg(long, env = "CLINIC_GATEWAY_SIGNING_SECRET", hide_env_values = true)]
    gateway_signing_secret: Option<String>,

    /// Public base URL of this service, used in simulated checkout links
    #[arg(long, env = "CLINIC_PUBLIC_URL", default_value = DEFAULT_PUBLIC_BASE_URL)]
    public_url: String,

    #[arg(long)]
    return_url: Option<String>,

    #[arg(long)]
    notify_url: Option<String>,
}

impl GatewayArgs {
    fn into_config(self) -> Result<GatewayConfig> {
        let config = if self.live_gateway {
            let (Some(api_key), Some(site_id)) = (self.gateway_api_key, self.gateway_site_id)
            else {
                return Err(miette!(
                    "--live-gateway requires CLINIC_GATEWAY_API_KEY and CLINIC_GATEWAY_SITE_ID"
                ));
            };
            GatewayConfig::live(LiveCredentials {
                api_key,
                site_id,
                base_url: self.gateway_base_url,
                signing_secret: self.gateway_signing_secret,
            })
        } else {
            GatewayConfig::simulation()
        };
        Ok(config
            .with_public_base_url(self.public_url)
            .with_callbacks(self.return_url, self.notify_url))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plans => {
            let stdout = io::stdout();
            let mut writer = ReportWriter::new(stdout.lock());
            writer.write_plans(&plan::catalogue()).into_diagnostic()?;
            Ok(())
        }
        Commands::Replay(args) => replay(args).await,
    }
}

fn in_memory_stores() -> (PaymentStoreBox, SubscriptionStoreBox) {
    (
        Box::new(InMemoryPaymentStore::new()),
        Box::new(InMemorySubscriptionStore::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(PaymentStoreBox, SubscriptionStoreBox)> {
    match db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            Ok((Box::new(store.clone()), Box::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(PaymentStoreBox, SubscriptionStoreBox)> {
    if db_path.is_some() {
        tracing::warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

async fn replay(args: ReplayArgs) -> Result<()> {
    let settings = Settings {
        gateway: args.gateway.into_config()?,
        sweep_interval: Duration::from_secs(args.sweep_interval_secs.max(1)),
    };
    let (payments, subscriptions) = open_stores(args.db_path)?;
    let runner = ScriptRunner::new(payments, subscriptions, settings.gateway, args.staff_id)
        .into_diagnostic()?;
    let sweeps = sweeper::spawn(
        runner.orchestrator().lifecycle().clone(),
        settings.sweep_interval,
    );

    let file = File::open(args.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (row, command) in reader.commands().enumerate() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.execute(command).await {
                    error!(row = row + 1, error = %e, "Error processing command");
                }
            }
            Err(e) => {
                error!(row = row + 1, error = %e, "Error reading command");
            }
        }
    }
    sweeps.abort();

    let orchestrator = runner.orchestrator();
    let stdout = io::stdout();
    match args.report {
        Report::Payments => {
            let payments = orchestrator.ledger().all().await.into_diagnostic()?;
            ReportWriter::new(stdout.lock())
                .write_payments(&payments)
                .into_diagnostic()?;
        }
        Report::Subscriptions => {
            let subscriptions = orchestrator.lifecycle().all().await.into_diagnostic()?;
            ReportWriter::new(stdout.lock())
                .write_subscriptions(&subscriptions)
                .into_diagnostic()?;
        }
        Report::Stats => {
            let report = serde_json::json!({
                "payments": orchestrator.payment_stats().await.into_diagnostic()?,
                "subscriptions": orchestrator.subscription_stats().await.into_diagnostic()?,
            });
            serde_json::to_writer_pretty(stdout.lock(), &report).into_diagnostic()?;
            println!();
        }
    }

    Ok(())
}
