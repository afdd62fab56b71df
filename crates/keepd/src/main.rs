//! AssetKeep Daemon - scripted console over the grouped asset cache

mod handler;
mod manifest;

use anyhow::{Context, Result};
use assetkeep::Backend;
use clap::Parser;
use keepcache::{global, CacheManager, ScopeEvents};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::handler::CommandHandler;
use crate::manifest::{Manifest, ManifestLoader, SceneGraph};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON manifest describing the loadable assets
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Command script to run instead of reading stdin
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Override the sweep interval in milliseconds
    #[arg(long)]
    sweep_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting AssetKeep Daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut manifest = match &args.manifest {
        Some(path) => Manifest::load(path)?,
        None => {
            warn!("No manifest given, every load will fail");
            Manifest::default()
        }
    };
    if let Some(ms) = args.sweep_ms {
        manifest.cache.sweep_interval_ms = ms;
    }
    info!("Sweep interval: {:?}", manifest.cache.sweep_interval());

    let loader = Arc::new(ManifestLoader::new(&manifest));
    let scene = Arc::new(SceneGraph::new());
    let backend = Backend::new(loader.clone(), scene.clone());

    let events = ScopeEvents::new(manifest.cache.scope_event_capacity);
    let manager = Arc::new(CacheManager::new(backend, manifest.cache.clone()));
    manager.start(&events)?;
    global::install(Arc::clone(&manager));

    let handler = CommandHandler::new(manager, events, loader);

    let result = match &args.script {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open script {:?}", path))?;
            run(&handler, BufReader::new(file)).await
        }
        None => run(&handler, BufReader::new(tokio::io::stdin())).await,
    };

    info!("Shutting down with {} live instances", scene.len());
    global::teardown();
    result
}

async fn run<R>(handler: &CommandHandler, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                println!("{}", handler.handle(line).await);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}
