//! `mailbridge serve` -- run the HTTP surface.
//!
//! # Lifecycle
//!
//! ```text
//! 1. Load and validate config
//! 2. Open the key-value store (file-backed when store.path is set)
//! 3. Build the AppContext (Google, Gmail and Mattermost clients)
//! 4. Serve the router until Ctrl+C, then drain in-flight requests
//! ```
//!
//! With `--dry-run` nothing is posted to the chat server: posts are recorded
//! and logged instead, and an incomplete config is only a warning.

use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mailbridge_channels::{MemoryPoster, MessagePoster};
use mailbridge_core::AppContext;
use mailbridge_platform::kv::{FileKvStore, KvStore, MemoryKvStore};
use mailbridge_platform::{NativePlatform, Platform};
use mailbridge_services::{ApiState, build_router};
use mailbridge_types::config::BridgeConfig;

use super::load_config;

/// Arguments for the `mailbridge serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Config file path (overrides auto-discovery).
    #[arg(short, long)]
    pub config: Option<String>,

    /// Record chat posts in memory instead of sending them.
    #[arg(long)]
    pub dry_run: bool,
}

/// Open the configured store.
pub async fn open_store<P: Platform>(
    platform: &P,
    config: &BridgeConfig,
) -> anyhow::Result<Arc<dyn KvStore>> {
    match config.store.resolved_path(platform.fs().home_dir()) {
        Some(dir) => {
            info!(path = %dir.display(), "using file-backed store");
            Ok(Arc::new(FileKvStore::open(dir).await?))
        }
        None => {
            warn!("no store.path configured; state is lost on restart");
            Ok(Arc::new(MemoryKvStore::new()))
        }
    }
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let platform = NativePlatform::new();
    let config = load_config(&platform, args.config.as_deref()).await?;

    if let Err(e) = config.validate() {
        if !args.dry_run {
            return Err(e.into());
        }
        warn!(error = %e, "incomplete configuration (dry run)");
    }
    if config.plugin_base_url().is_none() {
        warn!("site_url is not set; connect and disconnect commands will fail");
    }

    let kv = open_store(&platform, &config).await?;
    let poster: Option<Arc<dyn MessagePoster>> = if args.dry_run {
        info!("dry run: chat posts are recorded, not sent");
        Some(Arc::new(MemoryPoster::new(config.chat.bot_user_id.clone())))
    } else {
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = Arc::new(AppContext::production(config, kv, poster)?);
    let router = build_router(ApiState::new(app.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        prefix = %app.config.route_prefix(),
        "mailbridge listening -- press Ctrl+C to stop"
    );

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }
        info!("received shutdown signal");
        signal.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("mailbridge shutdown complete");
    Ok(())
}
