//! API Server Binary Entry Point

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use video_grounding_api_server::{start_server, ApiState, DEFAULT_MAX_UPLOAD_BYTES};
use video_grounding_decoder::FfmpegVideoSource;
use video_grounding_inference::{Capabilities, InferenceConfig};
use video_grounding_orchestrator::{Orchestrator, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "video_grounding_api_server=info,video_grounding_orchestrator=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::load().context("Failed to load pipeline configuration")?;
    let capabilities = Capabilities::from_config(&InferenceConfig::from_env())
        .context("Failed to initialize model backends")?;
    tracing::info!("Storing videos under {}", config.storage_root.display());

    let orchestrator = Orchestrator::new(config, Arc::new(FfmpegVideoSource::new()), capabilities);

    let addr = std::env::var("API_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let max_upload_bytes = match std::env::var("MAX_UPLOAD_BYTES") {
        Ok(value) => value
            .parse()
            .with_context(|| format!("Invalid MAX_UPLOAD_BYTES: {value}"))?,
        Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
    };

    let state = ApiState::new(orchestrator).with_max_upload_bytes(max_upload_bytes);

    tracing::info!("Starting Video Grounding API Server");
    start_server(&addr, state).await?;

    Ok(())
}
