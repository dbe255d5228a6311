//! Cloud Archiver - move archived recordings to and from B2 storage

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use cloud_archiver::{cloud::Backend, config::Config, metrics, CloudBackend};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Cloud Archiver - resumable uploads and verified downloads for B2
#[derive(Parser, Debug)]
#[command(name = "cloud-archiver")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics after the command
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check credentials and bucket access
    TestConfig,

    /// Upload a local file
    Upload {
        /// Local file to upload
        #[arg(long)]
        file: PathBuf,

        /// Name in the bucket (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// File info sent with the upload, as key=value
        #[arg(long = "info", value_parser = parse_key_value)]
        info: Vec<(String, String)>,
    },

    /// Download a stored file
    Download {
        /// Name in the bucket
        #[arg(long)]
        name: String,

        /// Local destination
        #[arg(long)]
        dest: PathBuf,

        /// Expected SHA-1 of the content
        #[arg(long)]
        sha1: Option<String>,
    },

    /// Print a time-limited download URL
    Url {
        /// Name in the bucket
        #[arg(long)]
        name: String,
    },

    /// Print the metadata of a stored file
    Info {
        /// Backend file id
        #[arg(long)]
        file_id: String,
    },

    /// Cancel abandoned unfinished uploads
    ExpireUploads,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Starting Cloud Archiver v{}", cloud_archiver::VERSION);

    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    info!("Loaded configuration from {:?}", args.config);

    let backend = match Backend::from_config(&config).await? {
        Backend::B2(backend) => backend,
        Backend::Disabled => bail!("no cloud backend configured (backend.kind is none)"),
    };

    match args.command {
        Command::TestConfig => {
            let bucket = backend.test_configuration().await?;
            println!("OK: bucket {}", bucket);
        }
        Command::Upload { file, name, info } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("cannot derive a name from the file path")?,
            };
            let info: BTreeMap<String, String> = info.into_iter().collect();
            let version = backend.upload_file(&file, &info, &name).await?;
            println!("{}", serde_json::to_string_pretty(&version)?);
        }
        Command::Download { name, dest, sha1 } => {
            let outcome = backend.download_file(&name, &dest, sha1.as_deref()).await?;
            println!(
                "{} bytes written to {} (sha1 {})",
                outcome.bytes_written,
                outcome.path.display(),
                outcome.sha1
            );
        }
        Command::Url { name } => {
            println!("{}", backend.download_url(&name).await?);
        }
        Command::Info { file_id } => {
            let version = backend.file_info(&file_id).await?;
            println!("{}", serde_json::to_string_pretty(&version)?);
        }
        Command::ExpireUploads => {
            let cancelled = backend.expire_unfinished_uploads().await?;
            println!("Cancelled {} unfinished uploads", cancelled);
        }
    }

    if args.print_metrics && config.metrics.enabled {
        print!("{}", metrics::render()?);
    }

    Ok(())
}
