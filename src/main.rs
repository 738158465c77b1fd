//! WolfBucket - Object Storage as a Read-Only Filesystem
//!
//! Command line front end: serves a bucket tree over HTTP and offers
//! `ls`/`stat`/`cat` for poking at it from a shell.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfbucket::config::{LoggingConfig, WolfBucketConfig};
use wolfbucket::error::{Error, Result};
use wolfbucket::fs::{BucketFs, Entry};
use wolfbucket::http::FileServer;
use wolfbucket::store::S3Store;

/// WolfBucket - Browse S3-compatible object storage as a filesystem
#[derive(Parser)]
#[command(name = "wolfbucket")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfbucket.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP file server
    Serve,

    /// List a directory, or describe a single file
    Ls {
        /// Virtual path, e.g. /photos/album
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show metadata of a path
    Stat {
        /// Virtual path
        path: String,
    },

    /// Write a file's contents to stdout
    Cat {
        /// Virtual path
        path: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfbucket.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = WolfBucketConfig::from_file(&cli.config);
    let logging = match &loaded {
        Ok(config) => config.logging.clone(),
        Err(_) => LoggingConfig::default(),
    };

    // Initialize logging
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging.format);

    match cli.command {
        Commands::Serve => run_serve(load(&cli.config, loaded)?).await,
        Commands::Ls { path } => run_ls(load(&cli.config, loaded)?, &path).await,
        Commands::Stat { path } => run_stat(load(&cli.config, loaded)?, &path).await,
        Commands::Cat { path } => run_cat(load(&cli.config, loaded)?, &path).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(&cli.config, loaded),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Unwrap a loaded configuration, logging why it could not be used
fn load(path: &Path, loaded: Result<WolfBucketConfig>) -> Result<WolfBucketConfig> {
    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", path, e);
            tracing::error!("Run `wolfbucket init` to generate one");
            return Err(e);
        }
    };
    config.validate()?;
    Ok(config)
}

fn open_fs(config: &WolfBucketConfig) -> Result<BucketFs> {
    let store = match S3Store::new(&config.store) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to configure object store {}: {}", config.store.endpoint, e);
            return Err(e);
        }
    };
    if !config.has_credentials() {
        tracing::warn!("No credentials configured, using anonymous access");
    }
    Ok(BucketFs::from_config(store, &config.fs))
}

/// Start the HTTP file server
async fn run_serve(config: WolfBucketConfig) -> Result<()> {
    tracing::info!("Starting WolfBucket file server...");
    tracing::info!("Object store: {} ({})", config.store.endpoint, config.store.region);

    let fs = open_fs(&config)?;
    let server = FileServer::new(config.http.clone(), fs.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Received shutdown signal");
    };

    if let Err(e) = server.start(shutdown).await {
        tracing::error!("HTTP server error: {}", e);
        return Err(e);
    }

    let nodes = fs.pools().node_stats();
    tracing::info!(
        "Served {} opens, {} handles still open",
        nodes.acquired,
        nodes.outstanding()
    );
    Ok(())
}

/// List a directory
async fn run_ls(config: WolfBucketConfig, path: &str) -> Result<()> {
    let fs = open_fs(&config)?;
    let mut handle = fs.open(path).await?;

    if handle.is_dir() {
        let mut out = std::io::stdout().lock();
        for entry in handle.readdir(None)? {
            print_entry(&mut out, entry)?;
        }
    } else {
        let entry = handle.stat().await?;
        print_entry(&mut std::io::stdout().lock(), entry)?;
    }

    handle.close().await
}

/// Show metadata of a path
async fn run_stat(config: WolfBucketConfig, path: &str) -> Result<()> {
    let fs = open_fs(&config)?;
    let mut handle = fs.open(path).await?;
    let kind = handle.kind();

    {
        let entry = handle.stat().await?;
        println!("  Path:     {}", entry.name());
        println!("  Kind:     {}", kind);
        println!("  Size:     {}", entry.size());
        println!("  Mode:     {}", entry.mode());
        println!("  Modified: {}", entry.mod_time().to_rfc3339());
    }

    handle.close().await
}

/// Write a file to stdout
async fn run_cat(config: WolfBucketConfig, path: &str) -> Result<()> {
    let fs = open_fs(&config)?;
    let mut handle = fs.open(path).await?;

    if handle.is_dir() {
        handle.close().await?;
        return Err(Error::InvalidPath(format!("{} is a directory", path)));
    }

    let mut out = tokio::io::stdout();
    let copied = match tokio::io::copy(&mut handle, &mut out).await {
        Ok(_) => out.flush().await,
        Err(e) => Err(e),
    };

    let closed = handle.close().await;
    copied?;
    closed
}

fn print_entry(out: &mut impl Write, entry: &Entry) -> Result<()> {
    let name = if entry.is_dir() {
        format!("{}/", entry.name().trim_end_matches('/'))
    } else {
        entry.name().to_string()
    };
    writeln!(
        out,
        "{} {:>12} {} {}",
        entry.mode(),
        entry.size(),
        entry.mod_time().format("%Y-%m-%d %H:%M"),
        name
    )?;
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# WolfBucket Configuration
# Generated configuration file

[store]
endpoint = "http://localhost:9000"
region = "us-east-1"
# Leave both empty for anonymous access
access_key = ""
secret_key = ""
path_style = true

[fs]
# List bucket and directory contents (false serves files but hides listings)
show_directory_files = true
pool_capacity = 256

[http]
bind_address = "0.0.0.0:3000"
prefix = "/static"

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {:?}", output);
    println!("Edit the [store] section to point at your object store, then run:");
    println!("  wolfbucket -c {:?} serve", output);

    Ok(())
}

/// Validate configuration file
fn run_validate(path: &Path, loaded: Result<WolfBucketConfig>) -> Result<()> {
    let config = loaded?;
    config.validate()?;

    println!("Configuration is valid: {:?}", path);
    println!("  Store: {} (region {})", config.store.endpoint, config.store.region);
    println!(
        "  Credentials: {}",
        if config.has_credentials() { "configured" } else { "anonymous" }
    );
    println!("  Directory listings: {}", config.fs.show_directory_files);
    println!("  HTTP: {}{}", config.http.bind_address, config.http.prefix);

    Ok(())
}
