//! Transport Boundary to the OBD-II Adapter
//!
//! The session core never touches sockets directly. A [`Transport`] opens a
//! link to an adapter identity and hands back a channel of read events; the
//! caller writes commands through it and closes it on failure or request.

use crate::error::ObdError;
use crate::session::Epoch;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Capacity of the per-session read event channel
pub const EVENT_CAPACITY: usize = 64;

/// Size of the serial read buffer
const READ_BUFFER: usize = 256;

/// Something the transport observed on a live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw bytes, in arrival order, at an arbitrary boundary
    Read(Vec<u8>),
    /// The link failed after it was established
    Lost(String),
}

/// Byte transport to an adapter.
///
/// Every link is tagged with the session epoch that opened it. A link never
/// replaces one opened under a newer epoch, and `disconnect` only closes the
/// link carrying the given epoch, so a late teardown cannot close a newer link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `identity` (an opaque device handle such as a hardware
    /// address or device path) for session `link`. Read events for this link
    /// arrive on the returned channel until it closes.
    async fn connect(&self, identity: &str, link: Epoch) -> Result<mpsc::Receiver<TransportEvent>, ObdError>;

    /// Write raw bytes to the live link
    async fn write(&self, data: &[u8]) -> Result<(), ObdError>;

    /// Close the link opened for `link` and release its resources.
    /// Does nothing when that link is already closed or was superseded.
    async fn disconnect(&self, link: Epoch);
}

struct SerialLink {
    epoch: Epoch,
    writer: WriteHalf<SerialStream>,
    reader: JoinHandle<()>,
}

/// Transport over a serial device, e.g. an RFCOMM-bound `/dev/rfcomm0`
pub struct SerialTransport {
    baud_rate: u32,
    link: tokio::sync::Mutex<Option<SerialLink>>,
}

impl SerialTransport {
    /// Create a serial transport using `baud_rate` for every link it opens
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            link: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&self, identity: &str, link: Epoch) -> Result<mpsc::Receiver<TransportEvent>, ObdError> {
        info!("Opening serial link {} to {} at {} baud", link, identity, self.baud_rate);
        let port = tokio_serial::new(identity, self.baud_rate).open_native_async()?;
        let (mut read_half, write_half) = tokio::io::split(port);

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; READ_BUFFER];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        let _ = tx.send(TransportEvent::Lost("adapter closed the link".to_string())).await;
                        break;
                    }
                    Ok(n) => {
                        debug!("Serial read of {} bytes", n);
                        if tx.send(TransportEvent::Read(buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Serial read failed: {}", e);
                        let _ = tx.send(TransportEvent::Lost(e.to_string())).await;
                        break;
                    }
                }
            }
        });

        let mut current = self.link.lock().await;
        if let Some(open) = current.as_ref() {
            if open.epoch > link {
                reader.abort();
                return Err(ObdError::TransportConnect(format!(
                    "link {} superseded by link {}",
                    link, open.epoch
                )));
            }
            open.reader.abort();
        }
        *current = Some(SerialLink {
            epoch: link,
            writer: write_half,
            reader,
        });
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> Result<(), ObdError> {
        let mut current = self.link.lock().await;
        let open = current.as_mut().ok_or(ObdError::NotConnected)?;
        open.writer.write_all(data).await?;
        open.writer.flush().await?;
        Ok(())
    }

    async fn disconnect(&self, link: Epoch) {
        let mut current = self.link.lock().await;
        match current.as_ref().map(|open| open.epoch) {
            Some(epoch) if epoch == link => {
                info!("Closing serial link {}", link);
                if let Some(open) = current.take() {
                    open.reader.abort();
                }
            }
            Some(epoch) => debug!("Link {} already replaced by link {}", link, epoch),
            None => {}
        }
    }
}

/// Canned mode 01 reply for the mock adapter
fn mock_reply(command: &str) -> &'static str {
    match command {
        "0101" => "41 01 82 07 65 04",
        "0104" => "41 04 7F",
        "0105" => "41 05 73",
        "0106" | "0107" => "41 06 80",
        "010B" => "41 0B 65",
        "010C" => "41 0C 1A F8",
        "010D" => "41 0D 37",
        "010F" => "41 0F 41",
        "0110" => "41 10 01 F4",
        "0111" => "41 11 33",
        "0114" => "41 14 5A",
        _ => "NO DATA",
    }
}

#[derive(Default)]
struct MockState {
    /// Open link and the epoch it was opened for
    link: Option<(Epoch, mpsc::Sender<TransportEvent>)>,
    refuse_connect: Option<String>,
    fail_writes: Option<String>,
    replies: HashMap<String, String>,
    written: Vec<Vec<u8>>,
    connects: usize,
    disconnects: usize,
}

/// In-memory adapter for tests and hardware-free runs.
///
/// Each written command is answered with a scripted (or canned) reply
/// terminated by CRLF and the `>` prompt, delivered in chunks of
/// `chunk_size` bytes so replies exercise split framing.
pub struct MockTransport {
    state: Mutex<MockState>,
    chunk_size: usize,
}

impl MockTransport {
    /// Create a mock adapter answering canned mode 01 replies in 5-byte chunks
    pub fn new() -> Self {
        info!("Creating mock OBD transport");
        Self {
            state: Mutex::new(MockState::default()),
            chunk_size: 5,
        }
    }

    /// Answer `command` (without line terminator) with `reply`
    pub fn with_reply(self, command: &str, reply: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.replies.insert(command.to_string(), reply.to_string());
        }
        self
    }

    /// Deliver replies in chunks of `chunk_size` bytes (minimum 1)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make every connect attempt fail with `reason`
    pub fn refuse_connect(self, reason: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.refuse_connect = Some(reason.to_string());
        }
        self
    }

    /// Make writes fail with `reason` (`None` restores normal writes)
    pub fn set_write_failure(&self, reason: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_writes = reason.map(str::to_string);
        }
    }

    /// Push raw bytes as if the adapter sent them; false when no link is open
    pub fn inject(&self, bytes: &[u8]) -> bool {
        self.emit(TransportEvent::Read(bytes.to_vec()))
    }

    /// Report the open link as lost; false when no link is open
    pub fn drop_link(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Lost(reason.to_string()))
    }

    /// Everything written so far, lossily decoded
    pub fn written(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| {
                state
                    .written
                    .iter()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of connect attempts seen
    pub fn connect_count(&self) -> usize {
        self.state.lock().map(|state| state.connects).unwrap_or(0)
    }

    /// Number of disconnect calls seen, including ones for links already closed
    pub fn disconnect_count(&self) -> usize {
        self.state.lock().map(|state| state.disconnects).unwrap_or(0)
    }

    /// Whether a link is currently open
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.link.is_some())
            .unwrap_or(false)
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        match &state.link {
            Some((_, tx)) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, identity: &str, link: Epoch) -> Result<mpsc::Receiver<TransportEvent>, ObdError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ObdError::TransportConnect(format!("Lock error: {}", e)))?;
        state.connects += 1;

        if let Some(reason) = &state.refuse_connect {
            return Err(ObdError::TransportConnect(reason.clone()));
        }

        if let Some((open, _)) = &state.link {
            if *open > link {
                return Err(ObdError::TransportConnect(format!(
                    "link {} superseded by link {}",
                    link, open
                )));
            }
        }

        debug!("Mock link {} opened to {}", link, identity);
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        state.link = Some((link, tx));
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> Result<(), ObdError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ObdError::TransportIo(format!("Lock error: {}", e)))?;

        if let Some(reason) = &state.fail_writes {
            return Err(ObdError::TransportIo(reason.clone()));
        }
        let Some(tx) = state.link.as_ref().map(|(_, tx)| tx.clone()) else {
            return Err(ObdError::TransportIo("link is not open".to_string()));
        };
        state.written.push(data.to_vec());

        let command = String::from_utf8_lossy(data).trim().to_string();
        let reply = state
            .replies
            .get(&command)
            .cloned()
            .unwrap_or_else(|| mock_reply(&command).to_string());
        let framed = format!("{}\r\n>", reply);
        drop(state);

        for chunk in framed.as_bytes().chunks(self.chunk_size) {
            if tx.try_send(TransportEvent::Read(chunk.to_vec())).is_err() {
                warn!("Mock reply to {} dropped: event channel full or closed", command);
                break;
            }
        }
        Ok(())
    }

    async fn disconnect(&self, link: Epoch) {
        if let Ok(mut state) = self.state.lock() {
            state.disconnects += 1;
            if state.link.as_ref().is_some_and(|(open, _)| *open == link) {
                state.link = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::Read(chunk) = event {
                bytes.extend(chunk);
            }
        }
        bytes
    }

    #[tokio::test]
    async fn test_mock_answers_in_chunks() {
        let transport = MockTransport::new().with_chunk_size(3);
        let mut rx = transport.connect("00:1D:A5:68:98:8B", 1).await.unwrap();

        transport.write(b"010C\r\n").await.unwrap();
        assert_eq!(drain(&mut rx).await, b"41 0C 1A F8\r\n>");
        assert_eq!(transport.written(), vec!["010C\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_scripted_reply() {
        let transport = MockTransport::new().with_reply("010D", "41 0D 55");
        let mut rx = transport.connect("mock", 1).await.unwrap();

        transport.write(b"010D\r\n").await.unwrap();
        assert_eq!(drain(&mut rx).await, b"41 0D 55\r\n>");
    }

    #[tokio::test]
    async fn test_mock_refused_connect() {
        let transport = MockTransport::new().refuse_connect("device not found");
        let err = transport.connect("mock", 1).await.unwrap_err();
        assert_eq!(err, ObdError::TransportConnect("device not found".to_string()));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_mock_write_requires_open_link() {
        let transport = MockTransport::new();
        assert!(matches!(transport.write(b"010C\r\n").await, Err(ObdError::TransportIo(_))));

        transport.connect("mock", 1).await.unwrap();
        transport.disconnect(1).await;
        assert!(!transport.is_open());
        assert!(!transport.inject(b"late"));
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_link_loss() {
        let transport = MockTransport::new();
        let mut rx = transport.connect("mock", 1).await.unwrap();
        assert!(transport.drop_link("rfcomm reset"));
        assert_eq!(rx.recv().await, Some(TransportEvent::Lost("rfcomm reset".to_string())));
    }

    #[tokio::test]
    async fn test_mock_ignores_teardown_of_older_link() {
        let transport = MockTransport::new();
        let _old = transport.connect("mock", 1).await.unwrap();
        let _rx = transport.connect("mock", 3).await.unwrap();

        transport.disconnect(1).await;
        assert!(transport.is_open());
        assert!(transport.inject(b"41 0D 37"));

        transport.disconnect(3).await;
        assert!(!transport.is_open());
        assert_eq!(transport.disconnect_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_refuses_to_replace_newer_link() {
        let transport = MockTransport::new();
        transport.connect("mock", 3).await.unwrap();

        let err = transport.connect("mock", 1).await.unwrap_err();
        assert!(matches!(err, ObdError::TransportConnect(_)));
        assert!(transport.is_open());
    }
}
