use std::io::Read;

use pubsub_sendmail::{EventMailForwarder, ForwarderConfig, ProcessEnv, logs, push::PushEnvelope};

fn main() {
    dotenvy::dotenv().ok();

    if std::env::args().len() != 1 {
        eprintln!("Usage: send_event < push-envelope.json");
        std::process::exit(2);
    }

    let verbose = ForwarderConfig::load(&ProcessEnv).debug.enabled();
    logs::init_logger(verbose).expect("Failed to initialize logger");

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .expect("Failed to read stdin");

    let envelope: PushEnvelope = match serde_json::from_str(&input) {
        Ok(envelope) => envelope,
        Err(e) => {
            eprintln!("Invalid push envelope: {}", e);
            std::process::exit(2);
        }
    };

    let (event, context) = envelope.into_parts();
    if let Err(e) = EventMailForwarder::new(ProcessEnv).handle(&event, &context) {
        log::error!("messageId {} failed: {}", context.event_id, e);
        std::process::exit(1);
    }
}
