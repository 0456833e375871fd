use clap::Parser;
use dealsim_api::{RestApi, ServiceConfig, SimilarityService};
use dealsim_storage::{ProxySignal, TuningJob, TuningScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Explainable similar-deal retrieval service
#[derive(Parser, Debug)]
#[command(name = "dealsim")]
#[command(about = "Find, rank and explain similar historical deals", long_about = None)]
struct Args {
    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Structured vector dimension of the current representation version
    #[arg(long)]
    struct_dim: Option<usize>,

    /// Text vector dimension of the current representation version
    #[arg(long)]
    text_dim: Option<usize>,

    /// Current representation version stamp
    #[arg(long)]
    representation_version: Option<String>,

    /// JSON file of cold-start proxy pairs for the tuning job
    #[arg(long)]
    proxies: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(ServiceConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(dim) = self.struct_dim {
            config.representation.struct_dim = dim;
        }
        if let Some(dim) = self.text_dim {
            config.representation.text_dim = dim;
        }
        if let Some(version) = self.representation_version {
            config.representation.version = version;
        }
        config.validate()?;
        Ok((config, self.proxies))
    }
}

fn load_proxies(path: Option<PathBuf>) -> anyhow::Result<Vec<ProxySignal>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, proxies_path) = Args::parse().into_config()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting dealsim v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", config.data_dir);
    info!(
        "Representation {} (structured {}, text {})",
        config.representation.version, config.representation.struct_dim, config.representation.text_dim
    );

    let proxies = load_proxies(proxies_path)?;
    let http_port = config.http_port;
    let tuning = config.tuning.clone();

    let service = SimilarityService::open(config)?;
    let scheduler = Arc::new(TuningScheduler::spawn(
        TuningJob::new(tuning),
        Arc::clone(service.feedback_log()),
        Arc::clone(service.registry()),
        proxies,
    )?);
    let service = Arc::new(service.with_scheduler(Arc::clone(&scheduler)));
    info!("Storage and tuning worker initialized");

    let http_handle = std::thread::spawn(move || {
        info!("Starting HTTP server on port {}", http_port);
        let sys = actix_web::rt::System::new();
        sys.block_on(async {
            if let Err(e) = RestApi::start(service, http_port).await {
                tracing::error!("HTTP server error: {}", e);
            }
        })
    });

    info!("HTTP API: http://localhost:{}/", http_port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = tokio::task::spawn_blocking(move || {
            http_handle.join().ok();
        }) => {
            info!("HTTP server stopped");
        }
    }

    info!("Shutting down...");
    tokio::task::spawn_blocking(move || scheduler.shutdown()).await?;
    Ok(())
}
