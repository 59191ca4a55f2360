//! swiftlet CLI
//!
//! Seed files into a swarm, leech them back by root hash, or just print a
//! file's root hash.

mod config;

use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use config::Config;
use swiftlet_core::{
    Leecher, LeecherConfig, Seeder, SeederConfig, DEFAULT_CHUNK_SIZE,
};
use swiftlet_files::SharedFile;

/// swiftlet - peer-to-peer content distribution over UDP
#[derive(Parser)]
#[command(name = "swiftlet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share files or directories
    Seed {
        /// Files or directories to share
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// UDP port to serve on
        #[arg(short, long, default_value_t = 7777)]
        port: u16,

        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Per-peer inactivity timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Alternative seeder to advertise via PEX (repeatable)
        #[arg(long = "alt-seeder")]
        alt_seeders: Vec<SocketAddrV4>,
    },

    /// Fetch a file by root hash
    Leech {
        /// Seeder address (ip:port)
        seeder: SocketAddr,

        /// Root hash of the wanted file (40 hex digits)
        hash: String,

        /// Output file; defaults to the advertised file name
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Chunk range to fetch as start:end (inclusive); whole file when
        /// omitted
        #[arg(short, long)]
        range: Option<String>,

        /// Inactivity timeout in seconds before failover
        #[arg(long)]
        timeout: Option<u64>,

        /// Alternative seeder to fail over to (repeatable)
        #[arg(long = "alt-seeder")]
        alt_seeders: Vec<SocketAddr>,
    },

    /// Print a file's root hash
    Hash {
        /// File to hash
        file: PathBuf,

        /// Chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    let config = Config::load_if_given(cli.config.as_deref())?;

    match cli.command {
        Commands::Seed {
            paths,
            port,
            chunk_size,
            timeout,
            alt_seeders,
        } => seed(paths, port, chunk_size, timeout, alt_seeders, &config).await,
        Commands::Leech {
            seeder,
            hash,
            output,
            range,
            timeout,
            alt_seeders,
        } => leech(seeder, &hash, output, range, timeout, alt_seeders, &config).await,
        Commands::Hash { file, chunk_size } => hash_file(&file, chunk_size),
    }
}

async fn seed(
    paths: Vec<PathBuf>,
    port: u16,
    chunk_size: Option<u32>,
    timeout: Option<u64>,
    alt_seeders: Vec<SocketAddrV4>,
    config: &Config,
) -> anyhow::Result<()> {
    let seeder_config = SeederConfig {
        port: config.port.unwrap_or(port),
        chunk_size: chunk_size
            .or(config.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE),
        timeout: Duration::from_secs(
            timeout.or(config.timeout_secs).unwrap_or(60),
        ),
    };

    let seeder = Seeder::new(seeder_config);
    for addr in alt_seeders {
        seeder.add_seeder(addr);
    }
    for addr in &config.alt_seeders {
        if let SocketAddr::V4(v4) = addr {
            seeder.add_seeder(*v4);
        }
    }

    for path in &paths {
        let added = seeder
            .add_file_or_directory(path)
            .with_context(|| format!("sharing {}", path.display()))?;
        println!("added {added} file(s) from {}", path.display());
    }
    if seeder.shared_files().is_empty() {
        bail!("nothing to share");
    }
    for shared in seeder.shared_files() {
        println!(
            "{}  {}  ({} bytes, {} chunks)",
            hex::encode(shared.root_hash),
            shared.path.display(),
            shared.file_size,
            shared.nc,
        );
    }

    seeder.run().await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn leech(
    seeder: SocketAddr,
    hash: &str,
    output: Option<PathBuf>,
    range: Option<String>,
    timeout: Option<u64>,
    alt_seeders: Vec<SocketAddr>,
    config: &Config,
) -> anyhow::Result<()> {
    let sha_demanded = parse_root_hash(hash)?;

    let mut leecher_config = LeecherConfig::new(seeder, sha_demanded);
    if let Some(secs) = timeout.or(config.timeout_secs) {
        leecher_config.timeout = Duration::from_secs(secs);
    }
    leecher_config.alt_seeders = alt_seeders;
    leecher_config
        .alt_seeders
        .extend(config.alt_seeders.iter().copied());

    let mut leecher = Leecher::new(leecher_config)?;

    let meta = leecher
        .get_metadata()
        .await
        .context("fetching metadata")?;
    println!(
        "{}: {} bytes, {} chunks of {}",
        meta.file_name,
        meta.file_size,
        meta.num_chunks(),
        meta.chunk_size,
    );

    let (start, end) = match range {
        Some(spec) => parse_range(&spec)?,
        None => (meta.start_chunk, meta.end_chunk),
    };
    let expected = leecher.prepare_range(start, end)?;

    let bar = ProgressBar::new(expected);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {bytes}/{total_bytes} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let out_path = output.unwrap_or_else(|| PathBuf::from(&meta.file_name));
    let mut file = std::fs::File::create(&out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;
    let written = leecher.fetch_to_file(&mut file).await?;
    bar.set_position(written);
    bar.finish();

    leecher.close().await?;
    println!("wrote {} bytes to {}", written, out_path.display());
    Ok(())
}

fn hash_file(path: &std::path::Path, chunk_size: u32) -> anyhow::Result<()> {
    let shared = SharedFile::build(path, chunk_size)
        .with_context(|| format!("hashing {}", path.display()))?;
    println!("{}", hex::encode(shared.root_hash));
    Ok(())
}

fn parse_root_hash(hash: &str) -> anyhow::Result<[u8; 20]> {
    let bytes = hex::decode(hash.trim()).context("root hash is not valid hex")?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("root hash must be 20 bytes (40 hex digits)"))
}

fn parse_range(spec: &str) -> anyhow::Result<(u32, u32)> {
    let (start, end) = spec
        .split_once(':')
        .context("range must be start:end")?;
    let start: u32 = start.parse().context("range start")?;
    let end: u32 = end.parse().context("range end")?;
    if start > end {
        bail!("range start exceeds end");
    }
    Ok((start, end))
}
