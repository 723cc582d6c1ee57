//! Messenger webhook endpoint.
//!
//! `GET` answers the subscription handshake. `POST` receives deliveries: the
//! signature is checked, the body parsed, the platform acknowledged, and only
//! then are the events handed to the [`EventHandler`], in delivery order.
//! Rejected requests are answered first as well; their error event follows.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::{classify, Event};
use crate::payload::{parse_batch, ParseError, RawEntryBatch};
use crate::signature::verify_signature;

const HEADER_SIGNATURE: &str = "x-hub-signature";
const PARAM_VERIFY_TOKEN: &str = "hub.verify_token";
const PARAM_CHALLENGE: &str = "hub.challenge";

const ACK_BODY: &str = r#"{"status":"ok"}"#;
const REJECTED_TOKEN_BODY: &str = "Incorrect verify token.";

/// Deliveries larger than this are treated as unreadable.
const BODY_LIMIT: usize = 1024 * 1024;

/// Receives the events of accepted deliveries and the errors of rejected
/// requests.
///
/// Deliveries are handled concurrently, so one handler may be called from
/// several threads at once. Within one delivery calls are sequential.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Event);
}

impl<F> EventHandler for F
where
    F: Fn(Event) + Send + Sync + 'static,
{
    fn handle(&self, event: Event) {
        self(event)
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// App secret used to sign deliveries.
    pub app_secret: String,
    /// Token entered in the app dashboard when subscribing the webhook.
    pub verify_token: String,
}

/// Reasons a request is turned away.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unable to read body: {0}")]
    UnreadableBody(#[source] axum::Error),

    #[error("invalid signature header: {0:?}")]
    InvalidSignature(Option<String>),

    #[error(transparent)]
    InvalidPayload(#[from] ParseError),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(Method),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebhookError::UnreadableBody(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "unable to read body")
            }
            WebhookError::InvalidSignature(_) => (StatusCode::UNAUTHORIZED, "invalid signature"),
            WebhookError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "JSON invalid"),
            WebhookError::MethodNotAllowed(_) => {
                (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
            }
        };

        (status, message).into_response()
    }
}

/// The webhook endpoint, cheap to clone.
#[derive(Clone)]
pub struct Webhook {
    config: Arc<WebhookConfig>,
    handler: Arc<dyn EventHandler>,
}

impl Webhook {
    pub fn new(config: WebhookConfig, handler: impl EventHandler) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
        }
    }

    /// Mounts the endpoint at `path` for every HTTP method.
    pub fn router(self, path: &str) -> Router {
        Router::new()
            .route(path, any(handle_request))
            .with_state(self)
    }

    fn verify_subscription(&self, params: &HashMap<String, String>) -> String {
        let token = params.get(PARAM_VERIFY_TOKEN).map(String::as_str);
        if token == Some(self.config.verify_token.as_str()) {
            info!("Webhook subscription verified");
            return params.get(PARAM_CHALLENGE).cloned().unwrap_or_default();
        }

        warn!(token = ?token, "Webhook subscription with incorrect verify token");
        REJECTED_TOKEN_BODY.to_string()
    }

    async fn accept(&self, headers: &HeaderMap, body: Body) -> Result<RawEntryBatch, WebhookError> {
        let data: Bytes = axum::body::to_bytes(body, BODY_LIMIT)
            .await
            .map_err(WebhookError::UnreadableBody)?;

        // Nothing is parsed before the sender is authenticated.
        let signature = headers
            .get(HEADER_SIGNATURE)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(&data, signature, self.config.app_secret.as_bytes()) {
            return Err(WebhookError::InvalidSignature(signature.map(str::to_string)));
        }

        Ok(parse_batch(&data)?)
    }

    fn reject(&self, error: WebhookError) -> Response {
        warn!(error = %error, "Rejected webhook request");
        let event = Event::error(error.to_string());
        let response = error.into_response();
        self.deliver(move |handler| handler.handle(event));
        response
    }

    /// Hands the events of an acknowledged delivery to the handler.
    fn dispatch(&self, batch: RawEntryBatch) {
        self.deliver(move |handler| {
            let mut delivered = 0usize;
            for event in batch.items().filter_map(classify) {
                debug!(kind = %event.kind(), chat_id = ?event.chat_id(), "Dispatching event");
                handler.handle(event);
                delivered += 1;
            }
            debug!(delivered, "Delivery processed");
        });
    }

    /// Runs handler work off the request path; the handler may block.
    fn deliver<F>(&self, work: F)
    where
        F: FnOnce(&dyn EventHandler) + Send + 'static,
    {
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || work(handler.as_ref()));
    }
}

async fn handle_request(
    State(webhook): State<Webhook>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match method {
        Method::GET => webhook.verify_subscription(&params).into_response(),
        Method::POST => match webhook.accept(&headers, body).await {
            Ok(batch) => {
                debug!(entries = batch.entries.len(), "Accepted webhook delivery");
                webhook.dispatch(batch);
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    ACK_BODY,
                )
                    .into_response()
            }
            Err(e) => webhook.reject(e),
        },
        other => webhook.reject(WebhookError::MethodNotAllowed(other)),
    }
}
