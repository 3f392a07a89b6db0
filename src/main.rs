mod bot;
mod config;
mod llm;
mod platform;
mod responder;
mod session;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Bot;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::platform::sidecar::{start_sidecar, SidecarConfig};
use crate::platform::whatsapp::WhatsAppBridge;

const BRIDGE_STARTUP_ATTEMPTS: u32 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,groupbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => info!("No .env file found, using process environment"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }
    if let Ok(cwd) = std::env::current_dir() {
        info!("Working directory: {}", cwd.display());
    }

    // Optional TOML file; environment variables take precedence
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Target group: {:?}", config.target_group_name);
    info!("  Model: {}", config.gemini.model);
    info!("  Session directory: {}", config.whatsapp.session_dir.display());
    info!("  Bridge: {}", config.whatsapp.bridge_url);
    if config.gemini.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; every reply will be the fallback message");
    }

    let mut sidecar = match &config.whatsapp.sidecar_script {
        Some(script) => Some(
            start_sidecar(&SidecarConfig {
                program: "node".to_string(),
                script: script.clone(),
                session_dir: config.whatsapp.session_dir.clone(),
                client_id: config.whatsapp.client_id.clone(),
                bridge_url: config.whatsapp.bridge_url.clone(),
            })
            .await?,
        ),
        None => None,
    };

    info!("If this is your first time, scan the QR code shown below with WhatsApp");
    // A freshly spawned sidecar needs a moment before it accepts connections
    let attempts = if sidecar.is_some() { BRIDGE_STARTUP_ATTEMPTS } else { 1 };
    let (bridge, events) =
        WhatsAppBridge::connect_with_retry(&config.whatsapp.bridge_url, attempts).await?;

    let llm = Arc::new(LlmClient::new(config.gemini.clone()));
    let bot = Bot::new(&config, Arc::new(bridge), llm);

    info!("Bot is starting...");
    tokio::select! {
        _ = bot.run(events) => {
            info!("WhatsApp bridge closed; waiting for Ctrl-C");
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
        }
    }

    info!("Shutting down");
    if let Some(process) = sidecar.as_mut() {
        process.stop().await?;
    }

    Ok(())
}
