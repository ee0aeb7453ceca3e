//! Pub/Sub push delivery: each POST carries one message for the forwarder.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use log::{error, info};
use serde::Deserialize;

use crate::{
    config::ConfigSource,
    event::{InboundEvent, InvocationContext},
    forwarder::EventMailForwarder,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

/// Pub/Sub sends ids and times in both camelCase and snake_case.
#[derive(Debug, Clone, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default, rename = "messageId")]
    message_id: Option<String>,
    #[serde(default, rename = "message_id")]
    message_id_snake: Option<String>,
    #[serde(default, rename = "publishTime")]
    publish_time: Option<String>,
    #[serde(default, rename = "publish_time")]
    publish_time_snake: Option<String>,
}

impl PushMessage {
    pub fn message_id(&self) -> &str {
        self.message_id
            .as_deref()
            .or(self.message_id_snake.as_deref())
            .unwrap_or_default()
    }

    pub fn publish_time(&self) -> &str {
        self.publish_time
            .as_deref()
            .or(self.publish_time_snake.as_deref())
            .unwrap_or_default()
    }
}

impl PushEnvelope {
    pub fn into_parts(self) -> (InboundEvent, InvocationContext) {
        let context =
            InvocationContext::new(self.message.message_id(), self.message.publish_time());
        let event = InboundEvent {
            payload: self.message.data,
            attributes: self.message.attributes,
        };
        (event, context)
    }
}

pub fn router<S>(forwarder: Arc<EventMailForwarder<S>>) -> Router
where
    S: ConfigSource + Send + Sync + 'static,
{
    Router::new()
        .route("/", post(receive::<S>))
        .route("/pubsub", post(receive::<S>))
        .with_state(forwarder)
}

async fn receive<S>(
    State(forwarder): State<Arc<EventMailForwarder<S>>>,
    Json(envelope): Json<PushEnvelope>,
) -> Response
where
    S: ConfigSource + Send + Sync + 'static,
{
    let (event, context) = envelope.into_parts();
    let event_id = context.event_id.clone();

    let result = tokio::task::spawn_blocking(move || forwarder.handle(&event, &context)).await;
    match result {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => {
            error!("messageId {event_id} failed: {e}");
            e.into_response()
        }
        Err(e) => {
            error!("messageId {event_id} handler panicked: {e}");
            let body = serde_json::json!({ "error": "internal error" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

pub async fn run<S>(
    forwarder: Arc<EventMailForwarder<S>>,
    port: u16,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()>
where
    S: ConfigSource + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    info!("Push endpoint listening on port {}", port);
    axum::serve(listener, router(forwarder))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Push endpoint shut down gracefully");
    Ok(())
}
