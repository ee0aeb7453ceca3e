use log::info;

use crate::{
    ForwardError, ForwardResult,
    config::{ConfigSource, ForwarderConfig, ProcessEnv},
    event::{InboundEvent, InvocationContext},
    message::OutboundMessage,
    session::RelaySession,
};

/// Relays the payload of one event as one email.
///
/// Configuration is read from the source on every call, so the forwarder
/// itself holds no state between invocations.
pub struct EventMailForwarder<S = ProcessEnv> {
    source: S,
}

impl Default for EventMailForwarder<ProcessEnv> {
    fn default() -> Self {
        Self::new(ProcessEnv)
    }
}

impl<S: ConfigSource> EventMailForwarder<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn handle(&self, event: &InboundEvent, context: &InvocationContext) -> ForwardResult<()> {
        info!("{}", begin_line(context));

        let config = ForwarderConfig::load(&self.source);
        let body = event.decode_payload()?;

        if config.debug.enabled() {
            for line in debug_lines(&config, &body) {
                info!("{line}");
            }
        }

        let email = OutboundMessage::new(&config, body).render();

        let mut session = RelaySession::open(&config).map_err(ForwardError::Transport)?;
        session.send(&email).map_err(ForwardError::Send)?;
        session.close().map_err(ForwardError::Transport)?;

        info!("{}", end_line(context));
        Ok(())
    }
}

pub fn begin_line(context: &InvocationContext) -> String {
    format!(
        "BEGIN messageId {} published at {}",
        context.event_id, context.timestamp
    )
}

pub fn end_line(context: &InvocationContext) -> String {
    format!("END messageId {}", context.event_id)
}

/// The labelled lines logged when debugging is on. Values are not masked.
pub fn debug_lines(config: &ForwarderConfig, body: &str) -> Vec<String> {
    vec![
        format!("Mail from: {}", config.from),
        format!("Mail to: {}", config.to),
        format!("Mail Bcc: {}", config.bcc),
        format!("Mail subject: {}", config.subject),
        format!("Mail server: {}", config.server),
        format!("Mail local host: {}", config.local_host),
        format!("Mail force TLS: {}", config.force_tls),
        format!("Mail message body: {body}"),
    ]
}
