//! # verstore - a versioned file store
//!
//! Entry point for the verstore HTTP service.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

use verstore::server::{FileStoreServer, ServerConfig};

/// A versioned file store.
///
/// Every upload of a named file becomes a new, numbered, immutable version. Versions can
/// be listed, downloaded, overwritten in place, or deleted one at a time or all together.
#[derive(Parser, Debug)]
#[command(
    name = "verstore",
    version,
    about = "A versioned file store",
    long_about = "verstore keeps every upload of a named file as a new numbered version, with a sled metadata index and a filesystem content store kept consistent."
)]
struct Args {
    /// Directory for persistent data.
    /// Metadata lives under `<data-dir>/metadata`.
    #[arg(long, env = "VERSTORE_DATA_DIR", default_value = "verstore.data")]
    data_dir: String,

    /// Root directory for file contents.
    /// Defaults to `<data-dir>/blobs`.
    #[arg(long, env = "VERSTORE_STORAGE_ROOT")]
    storage_root: Option<String>,

    /// Address to listen on for HTTP traffic.
    /// Format: host:port or http://host:port
    #[arg(long, env = "VERSTORE_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: String,

    /// Base URL used to build download links in responses.
    /// Set this when running behind a proxy or load balancer.
    #[arg(long, env = "VERSTORE_PUBLIC_URL")]
    public_url: Option<String>,

    /// Metadata page cache size in megabytes.
    #[arg(long, env = "VERSTORE_CACHE_SIZE_MB", default_value_t = 64)]
    cache_size_mb: u64,

    /// Largest accepted upload body in bytes.
    #[arg(long, env = "VERSTORE_MAX_UPLOAD_BYTES", default_value_t = 64 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Log level - 'trace', 'debug', 'info', 'warn', or 'error'.
    /// RUST_LOG takes precedence when set.
    #[arg(long, env = "VERSTORE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    initialize_tracing(&args.log_level)?;

    print_startup_banner(&args);

    let config = build_server_config(&args);

    let server = FileStoreServer::new(config)?;

    let shutdown = setup_signal_handlers();

    info!("Starting verstore server...");
    match server.run(shutdown).await {
        Ok(()) => {
            info!("Server shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {:?}", e);
            Err(e)
        }
    }
}

/// Initialize the tracing/logging system with the specified log level.
fn initialize_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(level_directive(log_level)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}

/// Maps a CLI log level onto a filter directive, falling back to `info`.
fn level_directive(log_level: &str) -> &'static str {
    match log_level {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            "info"
        }
    }
}

fn print_startup_banner(args: &Args) {
    let version = env!("CARGO_PKG_VERSION");
    println!("verstore v{}", version);
    println!();
    println!("Configuration:");
    println!("  Data directory:        {}", args.data_dir);
    println!(
        "  Storage root:          {}",
        args.storage_root.as_deref().unwrap_or("<data-dir>/blobs")
    );
    println!("  Listen address:        {}", args.listen_addr);
    println!(
        "  Public URL:            {}",
        args.public_url.as_deref().unwrap_or("<listen address>")
    );
    println!("  Cache size:            {}MB", args.cache_size_mb);
    println!("  Max upload:            {} bytes", args.max_upload_bytes);
    println!("  Log level:             {}", args.log_level);
    println!();
}

/// Build ServerConfig from CLI arguments.
fn build_server_config(args: &Args) -> ServerConfig {
    ServerConfig {
        data_dir: PathBuf::from(&args.data_dir),
        storage_root: args.storage_root.as_ref().map(PathBuf::from),
        listen_addr: args.listen_addr.clone(),
        public_url: args
            .public_url
            .as_ref()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()),
        cache_size_mb: args.cache_size_mb,
        max_upload_bytes: args.max_upload_bytes,
    }
}

/// Set up signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn setup_signal_handlers() -> impl std::future::Future<Output = ()> {
    async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(error = %e, "Failed to listen for ctrl-c");
                    }
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
        }
    }
}
