//! OBD-II Session Plumbing
//!
//! This crate provides the adapter-facing half of a diagnostic session with
//! ELM327-compatible OBD-II adapters: reconstructing lines from arbitrarily
//! chunked reads, classifying decoded replies, tracking the connection
//! lifecycle, and the transport boundary itself.

mod classifier;
mod error;
mod framer;
mod pid;
mod session;
mod transport;

pub use classifier::{Assessment, ResponseClassifier, Sentinel, DEFAULT_ECHO_MIN_WORDS, NO_DATA_NOTICE};
pub use error::ObdError;
pub use framer::{
    Framed, FramedLine, LineFramer, ReplyAssembler, CRLF_ROLLBACK_CHARS, CR_CARET, MAX_REPLY_LEN, PROMPT,
};
pub use pid::{Pid, PidDecoder, PidResponse, ResponseDecoder, NO_MESSAGE};
pub use session::{Epoch, SessionState, SessionStateMachine};
pub use transport::{MockTransport, SerialTransport, Transport, TransportEvent, EVENT_CAPACITY};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Added to the request mode in a positive reply
    pub const RESPONSE_OFFSET: u8 = 0x40;
}
