//! # Redlab
//!
//! Command line entry point.
//!
//! - **acl**: render the Redis `users.acl` file from settings
//! - **ping**: check both store handles reach the server
//! - **demo**: run the mock service against Redis or an in-process store

use clap::{Parser, Subcommand};
use redlab_cache::{
    register_metrics, AsyncCacheLayer, AsyncCacheStore, CacheContext, CacheLayer, CacheStore, MemoryStore,
};
use redlab_cli::demo::{self, AsyncMockService, MockService};
use redlab_config::{AclFile, RedisSettings, SettingsLoader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding `default.toml` and `local.toml`.
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the Redis ACL file.
    Acl {
        #[arg(short, long, default_value = "users.acl")]
        output: PathBuf,
    },
    /// Check the blocking and async handles against the server.
    Ping,
    /// Run the caching demonstration.
    Demo {
        /// Simulated backend latency; predictions take four times as long.
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        /// Use the async service.
        #[arg(long = "async")]
        use_async: bool,
        /// Use an in-process store instead of Redis.
        #[arg(long)]
        memory: bool,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    register_metrics();

    let cli = Cli::parse();
    info!("redlab {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = SettingsLoader::new(&cli.config_dir).load()?;
    info!("Redis at {}", settings.redacted_url());

    match cli.command {
        Command::Acl { output } => {
            let acl = AclFile::from_settings(&settings)?;
            acl.write_to(&output)?;
            info!("Wrote {} ACL users to {}", acl.users().len(), output.display());
        }
        Command::Ping => ping(settings).await?,
        Command::Demo {
            delay_ms,
            use_async,
            memory,
        } => run_demo(settings, Duration::from_millis(delay_ms), use_async, memory).await?,
    }

    Ok(())
}

async fn ping(settings: RedisSettings) -> anyhow::Result<()> {
    let context = Arc::new(CacheContext::new(settings));

    let blocking = Arc::clone(&context);
    tokio::task::spawn_blocking(move || blocking.provider().sync_store()?.ping()).await??;
    info!("Blocking handle: PONG");

    context.provider().async_store().await?.ping().await?;
    info!("Async handle: PONG");
    Ok(())
}

async fn run_demo(settings: RedisSettings, delay: Duration, use_async: bool, memory: bool) -> anyhow::Result<()> {
    let fast_ttl = settings.fast_ttl();
    let slow_ttl = settings.slow_ttl();

    if use_async {
        let layer = if memory {
            AsyncCacheLayer::from_settings(Arc::new(MemoryStore::new()), &settings)
        } else {
            CacheContext::new(settings).async_layer().await?
        };
        let service = AsyncMockService::new(layer, fast_ttl, slow_ttl, delay);
        demo::run_async(&service).await?;
    } else {
        let layer = if memory {
            CacheLayer::from_settings(Arc::new(MemoryStore::new()), &settings)
        } else {
            CacheContext::new(settings).sync_layer()?
        };
        tokio::task::spawn_blocking(move || {
            let service = MockService::new(layer, fast_ttl, slow_ttl, delay);
            demo::run_sync(&service)
        })
        .await??;
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,redlab=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
