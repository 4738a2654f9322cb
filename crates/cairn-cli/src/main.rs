//! Cairn CLI
//!
//! Stores files as content-addressed, chunked objects and fetches them back
//! by digest.

mod config;
mod progress;

use anyhow::{Context, Result};
use cairn_core::{FileCatalog, ObjectStore, ProgressObserver, StoreError, TransferHandle};
use cairn_files::ContentDigest;
use cairn_transport::{TransportFactory, TransportFactoryConfig, TransportType};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use config::Config;
use progress::{ChunkProgressBar, format_bytes};

/// Cairn - content-addressed object store
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file and print its digest
    Put {
        /// File to store
        file: PathBuf,
    },

    /// Fetch an object into a file
    Get {
        /// Object digest (`algo:hex`)
        digest: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Check whether an object is stored
    Exists {
        /// Object digest
        digest: String,
    },

    /// Remove an object's manifest (chunk blobs are kept)
    Delete {
        /// Object digest
        digest: String,
    },

    /// Print an object's manifest as JSON
    Stat {
        /// Object digest
        digest: String,
    },

    /// List stored objects
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    let store = open_store(&config).await?;

    match cli.command {
        Commands::Put { file } => put(&store, file, cli.quiet).await,
        Commands::Get { digest, output } => get(&store, &parse_digest(&digest)?, output, cli.quiet).await,
        Commands::Exists { digest } => {
            let exists = store.exists(&parse_digest(&digest)?)?;
            println!("{exists}");
            if !exists {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Delete { digest } => {
            let digest = parse_digest(&digest)?;
            if store.delete(&digest)? {
                println!("Deleted {digest}");
            } else {
                println!("Not stored: {digest}");
            }
            Ok(())
        }
        Commands::Stat { digest } => {
            let manifest = store.manifest(&parse_digest(&digest)?)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
        Commands::List => {
            for digest in store.list()? {
                let manifest = store.manifest(&digest)?;
                println!(
                    "{}  {:>12}  {} chunks",
                    digest,
                    format_bytes(manifest.total_size),
                    manifest.num_chunks()
                );
            }
            Ok(())
        }
    }
}

fn parse_digest(text: &str) -> Result<ContentDigest> {
    text.parse()
        .with_context(|| format!("invalid digest {text:?} (expected algo:hex)"))
}

/// Build the store described by the configuration
async fn open_store(config: &Config) -> Result<ObjectStore> {
    let storage = &config.storage;
    let transport_config = match storage.transport_type()? {
        TransportType::Http => {
            let mut tc = TransportFactoryConfig::http(storage.base_url.clone().unwrap_or_default());
            if let Some(token) = &storage.bearer_token {
                tc = tc.with_bearer_token(token.clone());
            }
            tc
        }
        TransportType::LocalFs => TransportFactoryConfig::localfs(storage.blob_dir()),
        TransportType::Memory => TransportFactoryConfig::memory(),
    };
    let transport = TransportFactory::create(transport_config)
        .await
        .context("failed to open chunk storage")?;
    let catalog = FileCatalog::open(storage.manifest_dir())
        .with_context(|| format!("failed to open {}", storage.manifest_dir().display()))?;

    tracing::debug!(
        "Opened {} storage under {}",
        transport.transport_type(),
        storage.data_dir.display()
    );

    Ok(ObjectStore::builder()
        .config(config.store_config())
        .transport(transport)
        .catalog(Arc::new(catalog))
        .build()?)
}

async fn put(store: &ObjectStore, file: PathBuf, quiet: bool) -> Result<()> {
    let size = std::fs::metadata(&file)
        .with_context(|| format!("cannot read {}", file.display()))?
        .len();
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let bar = (!quiet).then(|| ChunkProgressBar::new(size, name));
    let observer = bar
        .clone()
        .map(|b| Arc::new(b) as Arc<dyn ProgressObserver>);

    let result = store
        .put_file_with(&file, &TransferHandle::new(), observer)
        .await;
    if let Some(bar) = &bar {
        bar.finish();
    }

    let digest = result.map_err(describe)?;
    println!("{digest}");
    Ok(())
}

async fn get(store: &ObjectStore, digest: &ContentDigest, output: PathBuf, quiet: bool) -> Result<()> {
    let manifest = store.manifest(digest)?;
    let bar = (!quiet).then(|| ChunkProgressBar::new(manifest.total_size, digest.short()));
    let observer = bar
        .clone()
        .map(|b| Arc::new(b) as Arc<dyn ProgressObserver>);

    let result = store
        .get_to_file_with(digest, &output, &TransferHandle::new(), observer)
        .await;
    if let Some(bar) = &bar {
        bar.finish();
    }

    let size = result.map_err(describe)?;
    println!("Wrote {} to {}", format_bytes(size), output.display());
    Ok(())
}

/// Expand a partial failure into one line per failed chunk
fn describe(err: StoreError) -> anyhow::Error {
    match err {
        StoreError::PartialFailure(failure) => {
            let details: Vec<String> = failure
                .failed
                .iter()
                .map(|f| format!("  {}", f.to_error()))
                .collect();
            anyhow::anyhow!(
                "{} of {} chunks failed ({}):\n{}",
                failure.failed.len(),
                failure.total,
                failure.state,
                details.join("\n")
            )
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{PartialFailure, TransferState};
    use cairn_core::{ChunkFailure, FailureKind};
    use tempfile::TempDir;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["cairn", "put", "file.bin"]).unwrap();
        assert!(matches!(cli.command, Commands::Put { file } if file == PathBuf::from("file.bin")));

        let cli = Cli::try_parse_from([
            "cairn", "-v", "--config", "c.toml", "get", "blake3:00", "-o", "out",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Commands::Get { output, .. } if output == PathBuf::from("out")));

        assert!(Cli::try_parse_from(["cairn", "get", "blake3:00"]).is_err());
        assert!(matches!(
            Cli::try_parse_from(["cairn", "list"]).unwrap().command,
            Commands::List
        ));
    }

    #[test]
    fn test_parse_digest() {
        let digest = ContentDigest::of(cairn_files::HashAlgorithm::Blake3, b"x");
        assert_eq!(parse_digest(&digest.to_string()).unwrap(), digest);
        assert!(parse_digest("not-a-digest").is_err());
    }

    #[test]
    fn test_describe_lists_chunks() {
        let err = describe(StoreError::PartialFailure(PartialFailure {
            failed: vec![ChunkFailure {
                index: 3,
                kind: FailureKind::Permanent,
                attempts: 1,
                error: "Unauthorized".into(),
            }],
            total: 10,
            state: TransferState::Aborted,
        }));
        let text = err.to_string();
        assert!(text.contains("1 of 10"), "{text}");
        assert!(text.contains("chunk 3"), "{text}");
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.store.chunk_size = 4096;

        let store = open_store(&config).await.unwrap();
        let src = dir.path().join("in.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        put(&store, src, true).await.unwrap();
        let digest = store.list().unwrap()[0];
        let out = dir.path().join("out.bin");
        get(&store, &digest, out.clone(), true).await.unwrap();
        assert_eq!(std::fs::read(out).unwrap(), data);

        // Manifests persist across reopen
        let reopened = open_store(&config).await.unwrap();
        assert!(reopened.exists(&digest).unwrap());
    }
}
