use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log_error::LogError;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_rusqlite::Connection;
use yml_export::config::Settings;
use yml_export::export::{ExportDriver, ExportSummary};

/// Exports published catalog products into YML feed files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Offers per feed file, 0 writes everything into one file
    #[arg(long, visible_alias = "products_limit")]
    products_limit: Option<usize>,
    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite catalog database
    #[arg(long)]
    database: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    if Path::new(".env").exists() {
        envmnt::load_file(".env").log_error("Unable to load .env file");
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(summary) => {
            for path in &summary.files {
                log::info!("{}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("Export failed: {err:#}");
            log::debug!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExportSummary, anyhow::Error> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(limit) = cli.products_limit {
        settings.products_limit = limit;
    }
    if let Some(database) = cli.database {
        settings.database = database;
    }
    if let Some(output_dir) = cli.output_dir {
        settings.output_dir = output_dir;
    }
    log::debug!("{settings:?}");

    if !settings.database.exists() {
        bail!("Database {} not found", settings.database.display());
    }
    let conn = Connection::open(&settings.database)
        .await
        .with_context(|| format!("Unable to open {}", settings.database.display()))?;

    let pb_style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos:>7}/{len:7} {msg}");
    let progress = match pb_style {
        Ok(p) => ProgressBar::new(0).with_style(p.progress_chars("=-")),
        Err(err) => {
            log::warn!("Unable to initialize progress bar: {err}");
            ProgressBar::hidden()
        }
    };

    ExportDriver::open(&settings, conn)
        .await?
        .with_progress(progress)
        .run()
        .await
}
