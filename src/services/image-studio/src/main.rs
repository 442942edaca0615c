use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use image_studio::config::Config;
use image_studio::diffusion::SdWebUiClient;
use image_studio::error::Result;
use image_studio::pipeline::StudioPipeline;
use image_studio::rewriter::{LlmClient, TextRewriter};
use image_studio::server::{create_router, AppState, HealthStatus};

#[derive(Parser, Debug)]
#[command(
    name = "image-studio",
    version,
    about = "Prompt engineering and diffusion image service"
)]
struct Args {
    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;

    // Initialize tracing, JSON-formatted in production
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("image_studio={},tower_http=debug", config.log_level).into());
    if config.is_production() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("Starting Image Studio Service");

    let config = Arc::new(config);

    // Initialize capabilities
    let backend = Arc::new(LlmClient::new(&config.rewriter)?);
    let rewriter = TextRewriter::new(backend, &config.rewriter);
    let diffusion = Arc::new(SdWebUiClient::new(&config.diffusion)?);
    let pipeline = Arc::new(StudioPipeline::new(
        rewriter,
        diffusion,
        config.diffusion.clone(),
        config.pipeline.clone(),
    ));
    info!(
        rewriter = pipeline.rewriter_model(),
        diffusion = pipeline.diffusion_backend(),
        "Capabilities initialized"
    );

    // Startup probes are advisory. The service still boots with a backend
    // down and reports degraded health until it comes back.
    if let Err(e) = pipeline.rewriter_health().await {
        warn!("Rewriter backend unreachable at startup: {}", e);
    }
    if let Err(e) = pipeline.diffusion_health().await {
        warn!("Diffusion backend unreachable at startup: {}", e);
    }

    let health_status = Arc::new(tokio::sync::RwLock::new(HealthStatus::starting()));

    let state = AppState {
        config: config.clone(),
        pipeline: pipeline.clone(),
        health_status: health_status.clone(),
    };

    // Start health monitoring task
    let start_time = std::time::Instant::now();
    let monitor_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;

            let rewriter_status = match monitor_state.pipeline.rewriter_health().await {
                Ok(_) => "connected",
                Err(_) => "disconnected",
            };
            let diffusion_status = match monitor_state.pipeline.diffusion_health().await {
                Ok(_) => "connected",
                Err(_) => "disconnected",
            };

            let mut health = monitor_state.health_status.write().await;
            health.timestamp = chrono::Utc::now();
            health.uptime_seconds = start_time.elapsed().as_secs();
            health.rewriter_status = rewriter_status.to_string();
            health.diffusion_status = diffusion_status.to_string();

            if rewriter_status == "connected" && diffusion_status == "connected" {
                health.status = "healthy".to_string();
            } else {
                health.status = "degraded".to_string();
                warn!(
                    rewriter = rewriter_status,
                    diffusion = diffusion_status,
                    "Service running in degraded mode"
                );
            }
        }
    });

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Image Studio Service listening on {}", addr);

    // Graceful shutdown
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Image Studio Service shut down gracefully");
    Ok(())
}
