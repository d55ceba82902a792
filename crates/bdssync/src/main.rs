// # bdssync - Brightspace Data Sets sync
//
// Thin integration layer: parse flags and environment, initialise logging,
// wire the file credential store, the Brightspace client and the PostgreSQL
// warehouse into a `SyncEngine`, run it once, and exit.
//
// All sync logic lives in bds-core.
//
// ## Configuration
//
// Every flag falls back to an environment variable:
//
// ### Credentials
// - `BDS_CREDENTIALS_PATH`: JSON credential document (rewritten on every run)
//
// ### Database
// - `BDS_DB_HOST`, `BDS_DB_PORT`, `BDS_DB_NAME`, `BDS_DB_USER`, `BDS_DB_PASSWORD`
//
// ### Sync
// - `BDS_BATCH_SIZE`: Rows per load transaction (default 10000)
// - `BDS_DISCOVERY`: `catalog` or `direct`
// - `BDS_ON_DATASET_ERROR`: `abort` or `continue`
// - `BDS_UPSERT_DIR`: Directory holding `upsert_<table>.sql` merge statements
// - `BDS_DATASETS_FILE`: JSON file overriding the built-in dataset sets
// - `BDS_API_VERSION`: LP API version (default 1.18)
// - `BDS_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export BDS_CREDENTIALS_PATH=/var/lib/bds/credentials.json
// export BDS_DB_HOST=db.internal BDS_DB_NAME=lms BDS_DB_USER=loader
// export BDS_DB_PASSWORD=...
//
// bdssync               # full data sets
// bdssync --differential
// ```

use anyhow::{Context, Result};
use bds_core::config::{
    DEFAULT_API_VERSION, DEFAULT_BATCH_SIZE, DatabaseConfig, DatasetSets, DiscoveryMode,
    FailurePolicy, SyncConfig, SyncMode,
};
use bds_core::{EngineEvent, FileCredentialStore, RunReport, SyncEngine};
use bds_provider_brightspace::BrightspaceClient;
use bds_sink_postgres::PostgresWarehouse;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Every selected dataset loaded
/// - 1: Configuration or startup error
/// - 2: Run failure (token exchange, download, archive or load)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BdsExitCode {
    Success = 0,
    ConfigError = 1,
    RunFailure = 2,
}

impl From<BdsExitCode> for ExitCode {
    fn from(code: BdsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Sync Brightspace Data Sets exports into PostgreSQL
#[derive(Parser)]
#[command(name = "bdssync", version, about)]
struct Cli {
    /// Use the differential data sets instead of the full data sets
    #[arg(long)]
    differential: bool,

    /// Credential document, rewritten with the rotated refresh token
    #[arg(long, env = "BDS_CREDENTIALS_PATH", default_value = "credentials.json")]
    credentials_path: PathBuf,

    #[arg(long, env = "BDS_DB_HOST")]
    db_host: String,

    #[arg(long, env = "BDS_DB_PORT", default_value_t = 5432)]
    db_port: u16,

    #[arg(long, env = "BDS_DB_NAME")]
    db_name: String,

    #[arg(long, env = "BDS_DB_USER")]
    db_user: String,

    #[arg(long, env = "BDS_DB_PASSWORD", hide_env_values = true, default_value = "")]
    db_password: String,

    /// Rows per load transaction
    #[arg(long, env = "BDS_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// How download links are resolved: catalog or direct
    #[arg(long, env = "BDS_DISCOVERY", default_value = "catalog")]
    discovery: DiscoveryMode,

    /// What a failed dataset does to the run: abort or continue
    #[arg(long, env = "BDS_ON_DATASET_ERROR", default_value = "abort")]
    on_dataset_error: FailurePolicy,

    /// Directory of upsert_<table>.sql merge statements
    #[arg(long, env = "BDS_UPSERT_DIR")]
    upsert_dir: Option<PathBuf>,

    /// JSON file overriding the built-in dataset sets
    #[arg(long, env = "BDS_DATASETS_FILE")]
    datasets_file: Option<PathBuf>,

    #[arg(long, env = "BDS_API_VERSION", default_value = DEFAULT_API_VERSION)]
    api_version: String,

    #[arg(long, env = "BDS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl std::fmt::Debug for Cli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cli")
            .field("differential", &self.differential)
            .field("credentials_path", &self.credentials_path)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"<REDACTED>")
            .field("batch_size", &self.batch_size)
            .field("discovery", &self.discovery)
            .field("on_dataset_error", &self.on_dataset_error)
            .field("upsert_dir", &self.upsert_dir)
            .field("datasets_file", &self.datasets_file)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Cli {
    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => anyhow::bail!(
                "BDS_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                other
            ),
        }
    }

    fn mode(&self) -> SyncMode {
        if self.differential {
            SyncMode::Differential
        } else {
            SyncMode::Full
        }
    }

    fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            user: self.db_user.clone(),
            password: self.db_password.clone(),
        }
    }

    /// Build and validate the engine configuration
    fn sync_config(&self) -> Result<SyncConfig> {
        let mut datasets = match &self.datasets_file {
            Some(path) => DatasetSets::from_json_file(path)?,
            None => DatasetSets::default(),
        };

        if let Some(dir) = &self.upsert_dir {
            datasets = datasets.with_merge_statements(dir)?;
        }

        let config = SyncConfig {
            datasets,
            discovery: self.discovery,
            batch_size: self.batch_size,
            on_dataset_error: self.on_dataset_error,
            ..SyncConfig::default()
        };
        config.validate()?;

        if config.datasets.select(self.mode()).is_empty() {
            anyhow::bail!("No datasets configured for {} mode", self.mode());
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.log_level()?;
        self.database().validate()?;

        if !self.credentials_path.exists() {
            anyhow::bail!(
                "Credential document not found: {}. Set BDS_CREDENTIALS_PATH to its location",
                self.credentials_path.display()
            );
        }

        if self.api_version.trim().is_empty() {
            anyhow::bail!("BDS_API_VERSION cannot be empty");
        }

        Ok(())
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too
            let _ = e.print();
            return if e.use_stderr() {
                BdsExitCode::ConfigError.into()
            } else {
                BdsExitCode::Success.into()
            };
        }
    };

    if let Err(e) = cli.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return BdsExitCode::ConfigError.into();
    }

    let config = match cli.sync_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return BdsExitCode::ConfigError.into();
        }
    };

    let log_level = cli.log_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return BdsExitCode::ConfigError.into();
    }

    info!("Starting bdssync ({} mode)", cli.mode());
    debug!("Configuration: {:?}", cli);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return BdsExitCode::ConfigError.into();
        }
    };

    rt.block_on(async {
        let engine = match build_engine(&cli, config).await {
            Ok(engine) => engine,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return BdsExitCode::ConfigError;
            }
        };

        tokio::select! {
            outcome = engine.run(cli.mode()) => exit_code_for(outcome),
            received = wait_for_shutdown_signal() => {
                match received {
                    Ok(name) => warn!(
                        "Received {}; abandoning run (the in-flight batch rolls back)",
                        name
                    ),
                    Err(e) => error!("Signal handling error: {:#}", e),
                }
                BdsExitCode::RunFailure
            }
        }
    })
    .into()
}

/// Wire concrete implementations into the engine and start logging its events
async fn build_engine(cli: &Cli, config: SyncConfig) -> Result<SyncEngine> {
    let credential_store = FileCredentialStore::new(&cli.credentials_path)
        .await
        .context("Failed to open credential store")?;

    let api = BrightspaceClient::new()?.with_api_version(cli.api_version.clone());

    let warehouse = PostgresWarehouse::connect(&cli.database())
        .await
        .context("Failed to connect to the warehouse")?;

    let (engine, mut events) = SyncEngine::new(
        Box::new(api),
        Box::new(credential_store),
        Box::new(warehouse),
        config,
    )?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::DatasetFailed { table, error } => {
                    warn!("Dataset {} failed: {}", table, error)
                }
                other => debug!("Engine event: {:?}", other),
            }
        }
    });

    Ok(engine)
}

/// Map a finished (or aborted) run to an exit code
fn exit_code_for(outcome: bds_core::Result<RunReport>) -> BdsExitCode {
    match outcome {
        Ok(report) if report.is_success() => {
            info!(
                "Sync complete: {} dataset(s), {} rows",
                report.loaded.len(),
                report.total_rows()
            );
            BdsExitCode::Success
        }
        Ok(report) => {
            for failure in &report.failures {
                error!(
                    "Dataset {} ({}) failed: {}",
                    failure.dataset_id, failure.table, failure.error
                );
            }
            error!(
                "Sync finished with {} failed dataset(s) out of {}",
                report.failures.len(),
                report.failures.len() + report.loaded.len()
            );
            BdsExitCode::RunFailure
        }
        Err(bds_core::Error::Config(message)) => {
            error!("Configuration error: {}", message);
            BdsExitCode::ConfigError
        }
        Err(e) => {
            error!("Sync aborted: {}", e);
            BdsExitCode::RunFailure
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
