use anyhow::{Context, Result};
use chatpilot::config::AppConfig;
use chatpilot::coordinator::Coordinator;
use chatpilot::session::WebChatSurface;
use chatpilot::speech::{ConsoleSpeaker, PipelineSpeaker, Speaker};
use chatpilot::{scheduler, server};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::default();
    info!(port = cfg.http_port, poll_ms = cfg.poll_interval.as_millis() as u64, "starting");

    // The one fatal failure: without a session there is nothing to serve.
    let surface = WebChatSurface::launch(&cfg)
        .await
        .context("failed to establish the messaging session")?;

    let speaker: Arc<dyn Speaker> = match &cfg.speak_url {
        Some(url) => Arc::new(PipelineSpeaker::new(url.clone())),
        None => Arc::new(ConsoleSpeaker),
    };

    let coordinator = Arc::new(Coordinator::new(surface, speaker, &cfg));
    tokio::spawn(scheduler::run(coordinator.clone(), cfg.poll_interval));

    server::serve(coordinator, &cfg).await
}
