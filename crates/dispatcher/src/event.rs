//! Caller-facing Events

use crate::error::ErrorKind;
use generation::Delta;
use obd_protocol::SessionState;
use serde::{Deserialize, Serialize};

/// One item on the dispatcher's ordered output channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// Framed adapter text. When `rollback` is non-zero, first remove that
    /// many characters from what was previously shown.
    FramedOutput { text: String, rollback: usize },
    /// Decoded reading from a valid adapter reply
    Narration(String),
    /// Plain-text echo of a long narration
    Echo(String),
    /// Human-readable status such as "No data from OBD" or a transport failure
    Status(String),
    /// A submitted utterance failed
    RouteError(ErrorKind),
    /// Generation output to merge into the display
    DisplayDelta(Delta),
    /// Session lifecycle change
    SessionState(SessionState),
}
