use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use easel_core::{DeviceMap, GenerationEngine, ModelRegistry, StableDiffusionLoader};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;
mod handlers;
mod routes;
mod state;
mod types;

#[cfg(test)]
mod tests;

use routes::create_router;
use state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "Easel image generation server")]
struct Args {
    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Accelerator ordinal to use when one is available
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Display name of a model to load before accepting requests
    #[arg(long)]
    preload: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("easel_server={level},easel_core={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) => tracing::debug!("No .env file loaded: {e}"),
    }
    // hf-hub reads HUGGING_FACE_HUB_TOKEN only
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if std::env::var("HUGGING_FACE_HUB_TOKEN").is_err() {
            std::env::set_var("HUGGING_FACE_HUB_TOKEN", token);
        }
    }

    let loader = StableDiffusionLoader::new()?;
    let engine = GenerationEngine::new(loader, DeviceMap::from_flags(args.cpu, args.device));
    let state = Arc::new(AppState::new(engine));

    if let Some(name) = args.preload {
        let model = ModelRegistry::resolve(&name)?;
        let preload_state = state.clone();
        tokio::task::spawn_blocking(move || {
            let mut engine = preload_state.engine();
            engine.ensure_loaded(&model, &mut |_| {})?;
            Ok::<_, easel_core::EngineError>(())
        })
        .await
        .context("preload task failed")??;
    }

    let app = create_router(state);

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!("Started server on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
