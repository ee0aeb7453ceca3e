use lettre::message::{
    SinglePart,
    header::{Date, HeaderName, HeaderValue, Headers, MIME_VERSION_1_0},
};

use crate::config::ForwarderConfig;

/// The single plain-text email produced for an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub bcc: String,
    pub body: String,
}

/// A message ready for the wire, with the envelope taken from its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Reverse path. Empty means the null sender `<>`.
    pub sender: String,
    /// To recipients followed by Bcc recipients.
    pub recipients: Vec<String>,
    pub bytes: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(config: &ForwarderConfig, body: String) -> Self {
        OutboundMessage {
            subject: config.subject.clone(),
            from: config.from.clone(),
            to: config.to.clone(),
            bcc: config.bcc.clone(),
            body,
        }
    }

    /// Renders the message for the relay.
    ///
    /// Subject, From and To are written as configured, empty or not. Address
    /// syntax is left for the relay to judge. The Bcc field only feeds the
    /// envelope and never appears in the headers.
    pub fn render(&self) -> RenderedMessage {
        let mut headers = Headers::new();
        headers.insert_raw(raw_header("Subject", &self.subject));
        headers.insert_raw(raw_header("From", &self.from));
        headers.insert_raw(raw_header("To", &self.to));
        headers.set(Date::now());
        headers.set(MIME_VERSION_1_0);

        let mut bytes = headers.to_string().into_bytes();
        bytes.extend(SinglePart::plain(self.body.clone()).formatted());

        RenderedMessage {
            sender: self.envelope_sender(),
            recipients: self.envelope_recipients(),
            bytes,
        }
    }

    /// The first address in From, or the empty string.
    pub fn envelope_sender(&self) -> String {
        addresses(&self.from).into_iter().next().unwrap_or_default()
    }

    pub fn envelope_recipients(&self) -> Vec<String> {
        let mut recipients = addresses(&self.to);
        recipients.extend(addresses(&self.bcc));
        recipients
    }
}

fn raw_header(name: &'static str, value: &str) -> HeaderValue {
    HeaderValue::new(HeaderName::new_from_ascii_str(name), value.to_string())
}

/// Splits an address field into envelope addresses.
///
/// Entries are separated by commas outside quotes and angle brackets. An
/// entry with `<...>` contributes what is inside the brackets, anything else
/// is taken as written. Empty entries are skipped.
pub fn addresses(field: &str) -> Vec<String> {
    split_entries(field)
        .into_iter()
        .filter_map(|entry| {
            let address = match (entry.rfind('<'), entry.rfind('>')) {
                (Some(open), Some(close)) if open < close => &entry[open + 1..close],
                _ => entry,
            };
            let address: String = address
                .trim()
                .chars()
                .filter(|c| *c != '\r' && *c != '\n')
                .collect();
            (!address.is_empty()).then_some(address)
        })
        .collect()
}

fn split_entries(field: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    let mut angle = 0usize;

    for (i, c) in field.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle += 1,
            '>' if !quoted => angle = angle.saturating_sub(1),
            ',' if !quoted && angle == 0 => {
                entries.push(&field[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&field[start..]);
    entries
}
