//! hotbundle - bundle download and cache maintenance CLI

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use hotbundle::{CacheStore, Config, Loader};

/// Hotbundle CLI
#[derive(Parser)]
#[command(name = "hotbundle")]
#[command(version = hotbundle::PKG_VERSION)]
#[command(about = "Download and manage verified script bundles")]
struct Args {
    /// Config file (default: ~/.hotbundle/config.toml if present)
    #[arg(short, long, env = "HOTBUNDLE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a bundle's manifest and modules into a directory
    Download {
        /// URL of the bundle manifest
        #[arg(short = 'M', long)]
        manifest_url: String,
        /// Directory to write the manifest and module files to
        #[arg(short = 'D', long)]
        download_dir: PathBuf,
    },

    /// Evict unpinned cache entries down to a size budget
    Prune {
        /// Budget in bytes (default: cache.max_size_bytes from config)
        #[arg(long)]
        max_size_bytes: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse before anything else so usage errors never reach the network.
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Download {
            manifest_url,
            download_dir,
        } => {
            let loader = Loader::builder()
                .timeout(config.network.timeout())
                .concurrency(config.loader.concurrency)
                .build()?;
            let result = loader.download(&manifest_url, &download_dir).await?;
            println!(
                "downloaded {} modules to {}",
                result.module_paths.len(),
                download_dir.display()
            );
            println!("manifest: {}", result.manifest_path.display());
        }

        Command::Prune { max_size_bytes } => {
            let store = CacheStore::open(config.cache.store_config()).await?;
            let budget = max_size_bytes.unwrap_or(config.cache.max_size_bytes);
            let summary = store.prune(budget).await?;
            let stats = store.stats()?;
            println!(
                "evicted {} entries ({} bytes)",
                summary.evicted, summary.bytes_freed
            );
            println!(
                "{} entries remain ({} bytes, {} pinned)",
                stats.entries, stats.total_bytes, stats.pinned_bytes
            );
        }
    }

    Ok(())
}
