use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use form_export::app::{ExportUseCase, RunOutcome, RunRequest};
use form_export::config::{AppConfig, SourceConfig};
use form_export::constants::{DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH, METRICS_TEXTFILE};
use form_export::infra::OutboxDelivery;
use form_export::observability::{self, metrics};
use form_export::source::{InMemorySource, RecordSource, SqliteSource};
use form_export::types::Frequency;

#[derive(Parser)]
#[command(name = "form_export")]
#[command(about = "Form submission CSV export and summary report")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to $FORM_EXPORT_CONFIG, then form_export.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduled export for the configured recipients
    Run {
        /// Start of the selection window (RFC 3339), instead of the frequency window
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Send a one-off export to the contact address
    Test {
        /// Frequency to report on: daily, weekly or monthly
        #[arg(long, default_value = "weekly")]
        frequency: String,
    },
    /// List known forms with their titles and entry counts
    Forms,
}

fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn build_source(config: &AppConfig) -> Result<Arc<dyn RecordSource>> {
    match &config.source {
        Some(SourceConfig::Sqlite { path }) => {
            info!(path = %path.display(), "Using SQLite record source");
            Ok(Arc::new(SqliteSource::open(path)?))
        }
        Some(SourceConfig::Snapshot { path }) => {
            info!(path = %path.display(), "Using snapshot record source");
            Ok(Arc::new(InMemorySource::load(path)?))
        }
        None => bail!("No record source configured; add a [source] table to the config file"),
    }
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped(reason) => {
            println!("⚠️  Export skipped: {}", reason);
        }
        RunOutcome::Completed(report) => {
            println!("\n📊 {} export (run {}):", report.frequency.title(), report.run_id);
            println!("   Window start: {}", report.since.to_rfc3339());
            println!();
            for line in report.summary.render_text(report.frequency).lines() {
                println!("   {}", line);
            }
            println!();
            for artifact in &report.artifacts {
                println!("   📄 {} ({} rows)", artifact.path.display(), artifact.rows.len());
            }
            println!("✅ Queued for {} recipient(s) at {}", report.receipt.recipients, report.receipt.location);
        }
    }
}

async fn list_forms(source: &dyn RecordSource) -> Result<()> {
    let form_ids = source.list_form_ids().await?;
    if form_ids.is_empty() {
        println!("No forms found");
        return Ok(());
    }
    println!("📋 {} form(s):", form_ids.len());
    for form_id in &form_ids {
        let title = source.form_title(form_id).await?.unwrap_or_default();
        let entries = source.fetch_entries(form_id, None).await?.len();
        println!("   {:>6}  {:<40} {} entries", form_id, title, entries);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    observability::init_logging();

    let cli = Cli::parse();

    let path = config_path(cli.config);
    let config = AppConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    let source = build_source(&config)?;

    let request = match cli.command {
        Commands::Forms => return list_forms(source.as_ref()).await,
        Commands::Run { since } => {
            let request = RunRequest::scheduled();
            match since {
                Some(since) => request.since(since),
                None => request,
            }
        }
        Commands::Test { frequency } => {
            let frequency: Frequency = frequency.parse()?;
            RunRequest::test(frequency)
        }
    };

    if let Err(e) = metrics::init() {
        warn!(error = %e, "Metrics recorder unavailable");
    }

    let output_dir = config.export.output_dir.clone();
    let delivery = OutboxDelivery::new(&config.outbox_dir);
    let use_case = ExportUseCase::new(source, Box::new(delivery), config.export);

    let outcome = use_case.run(request).await?;
    print_outcome(&outcome);

    let textfile = output_dir.join(METRICS_TEXTFILE);
    match metrics::write_textfile(&textfile) {
        Ok(true) => info!(path = %textfile.display(), "Metrics textfile written"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, path = %textfile.display(), "Failed to write metrics textfile"),
    }

    Ok(())
}
