use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub mod config;
pub mod event;
pub mod forwarder;
pub mod logs;
pub mod message;
pub mod push;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{ConfigSource, Flag, ForwarderConfig, ProcessEnv};
pub use event::{DecodeError, InboundEvent, InvocationContext};
pub use forwarder::EventMailForwarder;
pub use message::{OutboundMessage, RenderedMessage};
pub use session::{RelayAddress, RelaySession, SessionError, TlsMode};

/// Everything that can make a single invocation fail.
///
/// Nothing is retried here; the trigger runtime decides what to do with it.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("payload decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("relay session failed: {0}")]
    Transport(#[source] SessionError),

    #[error("relay did not accept message: {0}")]
    Send(#[source] SessionError),
}

pub type ForwardResult<T> = Result<T, ForwardError>;

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = match self {
            ForwardError::Decode(_) => StatusCode::BAD_REQUEST,
            ForwardError::Transport(_) | ForwardError::Send(_) => StatusCode::BAD_GATEWAY,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
