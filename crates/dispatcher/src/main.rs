//! OBD Assistant - Main Entry Point
//!
//! Reads utterances from stdin. `/connect [device]`, `/disconnect` and
//! `/quit` control the adapter session; anything else is routed.

use dispatcher::{default_corpus, init_logging, AssistantConfig, DispatchEvent, Dispatcher};
use generation::MockGenerator;
use obd_protocol::{MockTransport, PidDecoder, SerialTransport, Transport};
use query_router::{load_corpus, EmbeddingOracle, HashingEmbedder};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

const MOCK_IDENTITY: &str = "mock-elm327";

const INTRO: &str = "Ask about your car, e.g. \"read engine rpm\" or \"why is coolant important\".";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AssistantConfig::load(config_path.as_deref())?;
    init_logging(&config);

    info!("=== OBD Assistant v{} ===", env!("CARGO_PKG_VERSION"));

    let transport: Arc<dyn Transport> = match &config.device {
        Some(_) => Arc::new(SerialTransport::new(config.baud_rate)),
        None => {
            info!("No device configured, using the mock adapter");
            Arc::new(MockTransport::new())
        }
    };
    let corpus = match &config.corpus_path {
        Some(path) => load_corpus(path)?,
        None => default_corpus()?,
    };
    let oracle = EmbeddingOracle::load(HashingEmbedder::default(), corpus, config.similarity_threshold)?;

    let (dispatcher, mut events) = Dispatcher::new(
        &config,
        transport,
        Arc::new(oracle),
        Arc::new(MockGenerator::new()),
        Arc::new(PidDecoder::new()),
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    println!("{}", INTRO);
    let default_identity = config.device.clone().unwrap_or_else(|| MOCK_IDENTITY.to_string());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').map_or((line, ""), |(cmd, arg)| (cmd, arg.trim())) {
            ("/quit", _) => break,
            ("/disconnect", _) => {
                dispatcher.disconnect().await;
            }
            ("/connect", identity) => {
                let identity = if identity.is_empty() { default_identity.as_str() } else { identity };
                if let Err(e) = dispatcher.connect(identity).await {
                    error!("Connect failed: {}", e);
                }
            }
            _ => {
                if let Err(e) = dispatcher.submit(line).await {
                    error!("Could not handle {:?}: {}", line, e);
                }
            }
        }
    }

    dispatcher.disconnect().await;
    info!("Bye");
    Ok(())
}

fn print_event(event: DispatchEvent) {
    match event {
        DispatchEvent::FramedOutput { .. } | DispatchEvent::Echo(_) => {}
        DispatchEvent::Narration(text) => println!("{}", text),
        DispatchEvent::Status(text) => println!("[{}]", text),
        DispatchEvent::RouteError(kind) => println!("[error: {:?}]", kind),
        DispatchEvent::DisplayDelta(delta) => {
            print!("{}", delta.rendered());
            std::io::stdout().flush().ok();
        }
        DispatchEvent::SessionState(state) => println!("[session: {:?}]", state),
    }
}
