//! Test doubles: a scripted SMTP peer and a log capture.

use std::{
    cell::RefCell,
    io::{BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Once,
    thread::JoinHandle,
};

use log::{Level, LevelFilter, Metadata, Record};
use native_tls::{Identity, TlsAcceptor, TlsStream};

const RELAY_CERT: &[u8] = include_bytes!("../testdata/relay.crt");
const RELAY_KEY: &[u8] = include_bytes!("../testdata/relay.key");

/// Self-signed certificate for `localhost` and `127.0.0.1`.
pub fn tls_acceptor() -> TlsAcceptor {
    let identity = Identity::from_pkcs8(RELAY_CERT, RELAY_KEY).unwrap();
    TlsAcceptor::new(identity).unwrap()
}

#[derive(Debug, Default)]
pub struct Transcript {
    /// Command lines, without line endings.
    pub commands: Vec<String>,
    /// Everything sent between DATA and the terminating dot.
    pub data: String,
    /// Index of the first command received over TLS.
    pub encrypted_from: Option<usize>,
}

impl Transcript {
    pub fn has_command(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }
}

#[derive(Clone)]
pub struct RelayOptions {
    pub offer_starttls: bool,
    /// Completes TLS handshakes. Without it the relay hangs up on STARTTLS.
    pub tls: Option<TlsAcceptor>,
    /// Expects TLS from the first byte.
    pub wrapper_tls: bool,
    /// Recipients answered with 550.
    pub refused: Vec<String>,
    pub quit_reply: &'static str,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            offer_starttls: false,
            tls: None,
            wrapper_tls: false,
            refused: Vec::new(),
            quit_reply: "221 2.0.0 bye",
        }
    }
}

/// Accepts a single connection and answers like a permissive relay.
pub struct FakeRelay {
    addr: SocketAddr,
    handle: JoinHandle<Transcript>,
}

impl FakeRelay {
    pub fn start(offer_starttls: bool) -> Self {
        Self::with_options(RelayOptions {
            offer_starttls,
            ..Default::default()
        })
    }

    pub fn with_options(options: RelayOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve(stream, &options)
        });
        FakeRelay { addr, handle }
    }

    pub fn server(&self) -> String {
        self.addr.to_string()
    }

    /// Waits for the client to go away and returns what it sent.
    pub fn finish(self) -> Transcript {
        self.handle.join().unwrap()
    }
}

enum Ending {
    Closed,
    StartTls,
}

fn serve(stream: TcpStream, options: &RelayOptions) -> Transcript {
    let mut transcript = Transcript::default();

    if options.wrapper_tls {
        if let Some(tls) = accept_tls(options, stream) {
            transcript.encrypted_from = Some(0);
            converse(&mut BufReader::new(tls), options, true, true, &mut transcript);
        }
        return transcript;
    }

    let mut reader = BufReader::new(stream);
    if let Ending::StartTls = converse(&mut reader, options, true, false, &mut transcript) {
        if let Some(tls) = accept_tls(options, reader.into_inner()) {
            transcript.encrypted_from = Some(transcript.commands.len());
            converse(&mut BufReader::new(tls), options, false, true, &mut transcript);
        }
    }
    transcript
}

fn accept_tls(options: &RelayOptions, stream: TcpStream) -> Option<TlsStream<TcpStream>> {
    options.tls.as_ref()?.accept(stream).ok()
}

fn reply<S: Write>(reader: &mut BufReader<S>, text: &str) -> bool {
    let stream = reader.get_mut();
    stream.write_all(text.as_bytes()).is_ok() && stream.flush().is_ok()
}

fn converse<S: Read + Write>(
    reader: &mut BufReader<S>,
    options: &RelayOptions,
    greet: bool,
    encrypted: bool,
    transcript: &mut Transcript,
) -> Ending {
    if greet && !reply(reader, "220 fake.relay ESMTP\r\n") {
        return Ending::Closed;
    }

    let mut in_data = false;
    loop {
        let mut raw = Vec::new();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) | Err(_) => return Ending::Closed,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        if in_data {
            if line == "." {
                in_data = false;
                if !reply(reader, "250 2.0.0 queued\r\n") {
                    return Ending::Closed;
                }
            } else {
                transcript.data.push_str(&line);
                transcript.data.push('\n');
            }
            continue;
        }

        transcript.commands.push(line.clone());
        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let ok = match verb.as_str() {
            "EHLO" if options.offer_starttls && !encrypted => reply(
                reader,
                "250-fake.relay\r\n250-STARTTLS\r\n250 SIZE 1000000\r\n",
            ),
            "EHLO" => reply(reader, "250-fake.relay\r\n250 SIZE 1000000\r\n"),
            "STARTTLS" => {
                reply(reader, "220 2.0.0 ready to start TLS\r\n");
                return match options.tls {
                    Some(_) => Ending::StartTls,
                    None => Ending::Closed,
                };
            }
            "RCPT" if is_refused(&line, options) => {
                reply(reader, "550 5.1.1 no such user\r\n")
            }
            "DATA" => {
                in_data = true;
                reply(reader, "354 end data with <CR><LF>.<CR><LF>\r\n")
            }
            "QUIT" => {
                reply(reader, &format!("{}\r\n", options.quit_reply));
                return Ending::Closed;
            }
            _ => reply(reader, "250 2.0.0 ok\r\n"),
        };
        if !ok {
            return Ending::Closed;
        }
    }
}

fn is_refused(line: &str, options: &RelayOptions) -> bool {
    options
        .refused
        .iter()
        .any(|address| line.ends_with(&format!("<{address}>")))
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Keeps `info` and louder records from threads that are capturing.
struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        CAPTURED.with(|captured| {
            if let Some(lines) = captured.borrow_mut().as_mut() {
                lines.push(record.args().to_string());
            }
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Runs `f` and returns the log messages it produced on this thread.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    INSTALL.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Info);
        }
    });

    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
    let result = f();
    let lines = CAPTURED
        .with(|captured| captured.borrow_mut().take())
        .unwrap_or_default();
    (result, lines)
}
