use anyhow::{Context, Result};
use axum::{response::Json, routing::get};
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fbot::{Config, Event, MessengerClient, Webhook};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    info!("Configuration loaded");
    info!("  API: {}", config.api_url);
    info!("  Webhook path: {}", config.webhook_path);

    let client = MessengerClient::new(config.client_config());
    apply_profile_settings(&client, &config).await;

    let webhook = Webhook::new(config.webhook_config(), log_event);

    let app = webhook
        .router(&config.webhook_path)
        .route("/health", get(health_check))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Server starting on {}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Publishes the configured greeting and Get Started payload. Failures are
/// logged; the webhook still starts.
async fn apply_profile_settings(client: &MessengerClient, config: &Config) {
    let greetings = config.greetings();
    if !greetings.is_empty() {
        match client.set_greetings(&greetings).await {
            Ok(()) => info!("Greeting updated"),
            Err(e) => warn!("Failed to set greeting: {}", e),
        }
    }

    if let Some(payload) = &config.get_started_payload {
        match client.set_get_started_payload(payload).await {
            Ok(()) => info!("Get Started payload set to {}", payload),
            Err(e) => warn!("Failed to set Get Started payload: {}", e),
        }
    }
}

fn log_event(event: Event) {
    match &event {
        Event::Error { text } => error!("Webhook error: {}", text),
        Event::Message { chat_id, text, .. } => info!(chat_id, "Message: {}", text),
        Event::Payload {
            chat_id,
            payload,
            reference,
            ..
        } => info!(chat_id, reference = %reference, "Payload: {}", payload),
        Event::Read { chat_id, time } => info!(chat_id, "Read up to {}", time),
        Event::Attachment {
            chat_id,
            attachments,
            ..
        } => {
            for attachment in attachments {
                info!(
                    chat_id,
                    kind = %attachment.kind,
                    sticker_id = attachment.sticker_id,
                    "Attachment: {}",
                    attachment.url
                );
            }
        }
        Event::Referral {
            chat_id, reference, ..
        } => info!(chat_id, "Referral: {}", reference),
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now()
    }))
}
