//! Forwarder configuration, read from a key/value source once per invocation.

use std::{collections::HashMap, fmt};

pub const MAIL_FROM: &str = "MAIL_FROM";
pub const MAIL_TO: &str = "MAIL_TO";
pub const MAIL_BCC: &str = "MAIL_BCC";
pub const MAIL_SUBJECT: &str = "MAIL_SUBJECT";
pub const MAIL_SERVER: &str = "MAIL_SERVER";
pub const MAIL_LOCAL_HOST: &str = "MAIL_LOCAL_HOST";
pub const MAIL_FORCE_TLS: &str = "MAIL_FORCE_TLS";
pub const MAIL_DEBUG: &str = "MAIL_DEBUG";
pub const MAIL_TLS_INSECURE: &str = "MAIL_TLS_INSECURE";

/// Where configuration values come from.
pub trait ConfigSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// A boolean switch that remembers how it was written.
///
/// Only the exact text `TRUE` turns it on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flag(String);

impl Flag {
    pub fn new(raw: impl Into<String>) -> Self {
        Flag(raw.into())
    }

    pub fn enabled(&self) -> bool {
        self.0 == "TRUE"
    }

    pub fn raw(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub from: String,
    pub to: String,
    pub bcc: String,
    pub subject: String,
    /// `host[:port]` of the relay.
    pub server: String,
    /// Name announced in EHLO/HELO.
    pub local_host: String,
    pub force_tls: Flag,
    pub debug: Flag,
    /// Skip certificate and hostname checks on TLS sessions.
    pub tls_insecure: Flag,
}

impl ForwarderConfig {
    /// Missing keys are not an error, they load as empty.
    pub fn load<S: ConfigSource + ?Sized>(source: &S) -> Self {
        let get = |key: &str| {
            source
                .var(key)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };

        ForwarderConfig {
            from: get(MAIL_FROM),
            to: get(MAIL_TO),
            bcc: get(MAIL_BCC),
            subject: get(MAIL_SUBJECT),
            server: get(MAIL_SERVER),
            local_host: get(MAIL_LOCAL_HOST),
            force_tls: Flag::new(get(MAIL_FORCE_TLS)),
            debug: Flag::new(get(MAIL_DEBUG)),
            tls_insecure: Flag::new(get(MAIL_TLS_INSECURE)),
        }
    }
}
