//! One SMTP session with the relay, opened and closed by a single invocation.

use std::fmt;

use lettre::transport::smtp::{
    Error as SmtpError,
    client::{SmtpConnection, TlsParameters},
    extension::ClientId,
    response::Response,
};
use log::{info, warn};
use thiserror::Error;

use crate::{config::ForwarderConfig, message::RenderedMessage};

const DEFAULT_SMTP_PORT: u16 = 25;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no relay server configured")]
    NoServer,

    #[error("invalid relay port in `{0}`")]
    InvalidPort(String),

    #[error("session already closed")]
    Closed,

    #[error("relay accepted none of the {0} recipient(s)")]
    RecipientsRefused(usize),

    #[error(transparent)]
    Smtp(#[from] SmtpError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAddress {
    pub host: String,
    pub port: u16,
}

impl RelayAddress {
    /// Parses `host[:port]`. The text after the last colon is the port.
    pub fn parse(server: &str) -> Result<Self, SessionError> {
        let server = server.trim();
        if server.is_empty() {
            return Err(SessionError::NoServer);
        }

        let (host, port) = match server.rsplit_once(':') {
            // A bare IPv6 address has colons but no port.
            Some((host, _)) if host.contains(':') && !host.ends_with(']') => {
                (server, DEFAULT_SMTP_PORT)
            }
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| SessionError::InvalidPort(server.to_string()))?;
                (host, port)
            }
            None => (server, DEFAULT_SMTP_PORT),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(SessionError::NoServer);
        }

        Ok(RelayAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Wrapper,
    /// Plaintext, upgraded with STARTTLS when the relay offers it.
    Opportunistic,
}

impl TlsMode {
    pub fn for_config(config: &ForwarderConfig) -> Self {
        if config.force_tls.enabled() {
            TlsMode::Wrapper
        } else {
            TlsMode::Opportunistic
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Wrapper => f.write_str("wrapper TLS"),
            TlsMode::Opportunistic => f.write_str("opportunistic STARTTLS"),
        }
    }
}

/// An open SMTP session.
///
/// [`RelaySession::close`] ends it with QUIT. Dropping it without closing
/// aborts the connection instead, so a failed send never leaves it open.
pub struct RelaySession {
    connection: Option<SmtpConnection>,
    relay: RelayAddress,
    trace: bool,
}

impl RelaySession {
    pub fn open(config: &ForwarderConfig) -> Result<Self, SessionError> {
        let relay = RelayAddress::parse(&config.server)?;
        let hello_name = client_id(&config.local_host);
        let mode = TlsMode::for_config(config);
        let trace = config.debug.enabled();
        let insecure = config.tls_insecure.enabled();

        if trace {
            info!("smtp: connecting to {relay} as {hello_name} using {mode}");
        }

        let wrapper = match mode {
            TlsMode::Wrapper => Some(tls_parameters(&relay.host, insecure)?),
            TlsMode::Opportunistic => None,
        };
        let connection = SmtpConnection::connect(
            (relay.host.as_str(), relay.port),
            None,
            &hello_name,
            wrapper.as_ref(),
            None,
        )?;

        let mut session = RelaySession {
            connection: Some(connection),
            relay,
            trace,
        };
        session.trace_server_info();

        if mode == TlsMode::Opportunistic && session.connection()?.can_starttls() {
            if trace {
                info!("smtp: relay offers STARTTLS, upgrading");
            }
            let tls = tls_parameters(&session.relay.host, insecure)?;
            if let Err(err) = session.connection_mut()?.starttls(&tls, &hello_name) {
                // The stream is gone after a failed upgrade; nothing left to abort.
                session.connection.take();
                return Err(err.into());
            }
            session.trace_server_info();
        } else if trace && mode == TlsMode::Opportunistic {
            info!("smtp: relay does not offer STARTTLS, continuing in plaintext");
        }

        Ok(session)
    }

    pub fn relay(&self) -> &RelayAddress {
        &self.relay
    }

    pub fn is_encrypted(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.is_encrypted())
    }

    /// Runs one MAIL/RCPT/DATA transaction.
    ///
    /// Refused recipients are skipped as long as the relay accepts at least
    /// one of them.
    pub fn send(&mut self, message: &RenderedMessage) -> Result<Response, SessionError> {
        if self.trace {
            info!(
                "smtp: envelope from <{}> to [{}]",
                message.sender,
                message.recipients.join(", ")
            );
        }

        let connection = self.connection_mut()?;
        connection.command(format!("MAIL FROM:<{}>\r\n", message.sender))?;

        let mut accepted = 0;
        for recipient in &message.recipients {
            match connection.command(format!("RCPT TO:<{recipient}>\r\n")) {
                Ok(_) => accepted += 1,
                Err(err) if err.is_permanent() || err.is_transient() => {
                    warn!("smtp: relay refused recipient <{recipient}>: {err}");
                }
                Err(err) => return Err(err.into()),
            }
        }
        if accepted == 0 {
            return Err(SessionError::RecipientsRefused(message.recipients.len()));
        }

        connection.command("DATA\r\n")?;
        let response = connection.message(&message.bytes)?;
        self.trace_response("DATA", &response);
        Ok(response)
    }

    /// Ends the session with QUIT.
    pub fn close(mut self) -> Result<(), SessionError> {
        let Some(mut connection) = self.connection.take() else {
            return Err(SessionError::Closed);
        };
        let response = connection.quit()?;
        self.trace_response("QUIT", &response);
        Ok(())
    }

    fn connection(&self) -> Result<&SmtpConnection, SessionError> {
        self.connection.as_ref().ok_or(SessionError::Closed)
    }

    fn connection_mut(&mut self) -> Result<&mut SmtpConnection, SessionError> {
        self.connection.as_mut().ok_or(SessionError::Closed)
    }

    fn trace_server_info(&self) {
        if let (true, Some(connection)) = (self.trace, self.connection.as_ref()) {
            info!(
                "smtp: {} (encrypted: {})",
                connection.server_info(),
                connection.is_encrypted()
            );
        }
    }

    fn trace_response(&self, command: &str, response: &Response) {
        if self.trace {
            info!(
                "smtp: {command} -> {} {}",
                response.code(),
                response.first_line().unwrap_or_default()
            );
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            warn!("smtp: aborting unfinished session with {}", self.relay);
            connection.abort();
        }
    }
}

fn client_id(local_host: &str) -> ClientId {
    if local_host.is_empty() {
        ClientId::default()
    } else {
        ClientId::Domain(local_host.to_string())
    }
}

fn tls_parameters(host: &str, insecure: bool) -> Result<TlsParameters, SessionError> {
    let parameters = TlsParameters::builder(host.to_string())
        .dangerous_accept_invalid_certs(insecure)
        .dangerous_accept_invalid_hostnames(insecure)
        .build()?;
    Ok(parameters)
}
