//! Line Framing for Adapter Byte Streams
//!
//! Reconstructs logical text lines from transport reads that arrive at
//! arbitrary boundaries. A CR/LF pair always collapses to one LF, including
//! when the CR ends one read and the LF starts the next. Other control
//! characters (a bare CR included) are rendered in caret notation, so an
//! unresolved trailing CR shows up as the two characters `^M` until the next
//! read decides what it was.

use tracing::debug;

/// Number of rendered characters the caller removes when a split CR/LF pair is detected
pub const CRLF_ROLLBACK_CHARS: usize = 2;

/// Caret rendering of a bare carriage return
pub const CR_CARET: &str = "^M";

/// ELM327 prompt closing every reply
pub const PROMPT: char = '>';

/// Unprompted text is released as a reply once it grows past this many bytes
pub const MAX_REPLY_LEN: usize = 4096;

/// One logical line recovered from a read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FramedLine {
    /// Rendered text without its terminator
    pub text: String,
    /// Whether the line ended with LF inside this read
    pub terminated: bool,
    /// Whether the line ends with a bare CR still waiting for a possible LF
    pub pending_cr: bool,
}

/// Result of feeding one read into the framer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Framed {
    /// A CR ending the previous read paired with an LF starting this one.
    /// The caller drops the last [`CRLF_ROLLBACK_CHARS`] characters it
    /// accumulated before appending [`Framed::text`].
    pub rollback: bool,
    /// Lines recovered from this read, in order
    pub lines: Vec<FramedLine>,
}

impl Framed {
    /// Render the lines back into display text (terminated lines keep their LF)
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            if line.terminated {
                out.push('\n');
            }
        }
        out
    }

    /// Whether the read produced no text at all
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether the read ended on an unresolved CR
    pub fn pending_cr(&self) -> bool {
        self.lines.last().is_some_and(|line| line.pending_cr)
    }
}

/// Stateful byte-to-line reconstruction
#[derive(Debug, Default)]
pub struct LineFramer {
    /// The previous non-empty read ended with a bare CR
    pending_cr: bool,
    /// Trailing bytes of an incomplete UTF-8 sequence
    utf8_carry: Vec<u8>,
}

impl LineFramer {
    /// Create a framer with no carried state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last read ended on a bare CR
    pub fn pending_cr(&self) -> bool {
        self.pending_cr
    }

    /// Forget carried state (used when a new transport session starts)
    pub fn reset(&mut self) {
        self.pending_cr = false;
        self.utf8_carry.clear();
    }

    /// Feed one raw read and return the lines it completes or extends
    pub fn feed(&mut self, chunk: &[u8]) -> Framed {
        let decoded = self.decode(chunk);
        if decoded.is_empty() {
            return Framed::default();
        }

        let rollback = self.pending_cr && decoded.starts_with('\n');
        if rollback {
            debug!("CR/LF pair split across reads, rolling back caret");
        }

        let mut rendered = String::with_capacity(decoded.len() + 4);
        let mut chars = decoded.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' if chars.peek() == Some(&'\n') => {
                    chars.next();
                    rendered.push('\n');
                }
                '\n' => rendered.push('\n'),
                c => push_caret(&mut rendered, c),
            }
        }

        self.pending_cr = decoded.ends_with('\r');

        let mut lines: Vec<FramedLine> = Vec::new();
        let mut pieces = rendered.split('\n').peekable();
        while let Some(piece) = pieces.next() {
            let terminated = pieces.peek().is_some();
            if !terminated && piece.is_empty() {
                break;
            }
            lines.push(FramedLine {
                text: piece.to_string(),
                terminated,
                pending_cr: false,
            });
        }
        if let Some(last) = lines.last_mut() {
            last.pending_cr = self.pending_cr;
        }

        Framed { rollback, lines }
    }

    /// Decode `chunk` after any carried partial UTF-8 sequence, keeping a
    /// trailing incomplete sequence for the next read
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.utf8_carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.utf8_carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Groups framed text into whole adapter replies, each closed by [`PROMPT`]
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    buffer: String,
}

impl ReplyAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one framed read, honouring its CR/LF rollback
    pub fn push(&mut self, framed: &Framed) {
        if framed.rollback && self.buffer.ends_with(CR_CARET) {
            self.buffer.truncate(self.buffer.len() - CR_CARET.len());
        }
        self.buffer.push_str(&framed.text());
    }

    /// Take the next complete reply (prompt included), if any
    pub fn next_reply(&mut self) -> Option<String> {
        if let Some(pos) = self.buffer.find(PROMPT) {
            let rest = self.buffer.split_off(pos + PROMPT.len_utf8());
            return Some(std::mem::replace(&mut self.buffer, rest));
        }
        if self.buffer.len() > MAX_REPLY_LEN {
            debug!("No prompt after {} bytes, releasing reply", self.buffer.len());
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Text received since the last complete reply
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drop any partial reply
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Append `c`, rendering control characters other than LF in caret notation
fn push_caret(out: &mut String, c: char) {
    match c {
        '\u{7f}' => out.push_str("^?"),
        c if (c as u32) < 0x20 => {
            out.push('^');
            out.push(char::from(c as u8 + 0x40));
        }
        c => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Accumulate framed reads the way a display does, applying rollbacks
    fn render(framer: &mut LineFramer, chunks: &[&[u8]]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            let framed = framer.feed(chunk);
            if framed.rollback {
                for _ in 0..CRLF_ROLLBACK_CHARS {
                    out.pop();
                }
            }
            out.push_str(&framed.text());
        }
        out
    }

    #[test]
    fn test_crlf_collapses_within_read() {
        let mut framer = LineFramer::new();
        let framed = framer.feed(b"41 0C 1A F8\r\n>");
        assert!(!framed.rollback);
        assert_eq!(framed.text(), "41 0C 1A F8\n>");
        assert_eq!(framed.lines.len(), 2);
        assert!(framed.lines[0].terminated);
        assert!(!framed.lines[1].terminated);
        assert!(!framer.pending_cr());
    }

    #[test]
    fn test_crlf_split_across_reads() {
        let mut framer = LineFramer::new();

        let first = framer.feed(b"41 0D 55\r");
        assert_eq!(first.text(), "41 0D 55^M");
        assert!(first.pending_cr());
        assert!(framer.pending_cr());

        let second = framer.feed(b"\n>");
        assert!(second.rollback);
        assert_eq!(second.text(), "\n>");
        assert!(!framer.pending_cr());
    }

    #[test]
    fn test_bare_cr_is_caret_rendered() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"SEARCHING...\r41 05 73").text(), "SEARCHING...^M41 05 73");
    }

    #[test]
    fn test_cr_then_crlf_is_not_a_split_pair() {
        let mut framer = LineFramer::new();
        assert_eq!(render(&mut framer, &[b"a\r", b"\r\nb"]), "a^M\nb");

        let mut whole = LineFramer::new();
        assert_eq!(render(&mut whole, &[b"a\r\r\nb"]), "a^M\nb");
    }

    #[test]
    fn test_empty_read_keeps_pending_cr() {
        let mut framer = LineFramer::new();
        framer.feed(b"NO DATA\r");
        assert!(framer.feed(b"").is_empty());
        assert!(framer.pending_cr());
        assert!(framer.feed(b"\n").rollback);
    }

    #[test]
    fn test_split_utf8_sequence_is_carried() {
        let euro = "€".as_bytes();
        let mut framer = LineFramer::new();
        assert!(framer.feed(&euro[..1]).is_empty());
        assert_eq!(framer.feed(&euro[1..]).text(), "€");
    }

    #[test]
    fn test_invalid_utf8_degrades_to_replacement() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(&[b'a', 0xFF, b'b']).text(), "a\u{FFFD}b");
    }

    #[test]
    fn test_other_control_characters() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(&[0x01, b'x', 0x7F]).text(), "^Ax^?");
    }

    #[test]
    fn test_reset_clears_carry() {
        let mut framer = LineFramer::new();
        framer.feed(b"x\r");
        framer.reset();
        assert!(!framer.feed(b"\ny").rollback);
    }

    #[test]
    fn test_reply_assembly_across_reads() {
        let mut framer = LineFramer::new();
        let mut replies = ReplyAssembler::new();

        let chunks: [&[u8]; 4] = [b"41 0D", b" 37\r", b"\n>41", b" 05 73\r\n>"];
        for chunk in chunks {
            replies.push(&framer.feed(chunk));
        }
        assert_eq!(replies.next_reply().as_deref(), Some("41 0D 37\n>"));
        assert_eq!(replies.next_reply().as_deref(), Some("41 05 73\n>"));
        assert_eq!(replies.next_reply(), None);
        assert_eq!(replies.pending(), "");
    }

    #[test]
    fn test_unprompted_reply_is_released_when_oversized() {
        let mut framer = LineFramer::new();
        let mut replies = ReplyAssembler::new();
        replies.push(&framer.feed(b"BUS INIT: ..."));
        assert_eq!(replies.next_reply(), None);

        replies.push(&framer.feed(&vec![b'x'; MAX_REPLY_LEN]));
        assert!(replies.next_reply().unwrap().starts_with("BUS INIT"));
        assert_eq!(replies.pending(), "");
    }

    fn stream_bytes() -> impl Strategy<Value = Vec<u8>> {
        let piece = prop_oneof![
            Just(b"\r".to_vec()),
            Just(b"\n".to_vec()),
            Just(b"\r\n".to_vec()),
            Just(b"41 0C".to_vec()),
            Just(b">".to_vec()),
            Just("é".as_bytes().to_vec()),
            Just(vec![0xFF]),
            any::<u8>().prop_map(|b| vec![b]),
        ];
        prop::collection::vec(piece, 0..32).prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn split_reads_render_like_one_read(bytes in stream_bytes(), split in any::<prop::sample::Index>()) {
            let at = split.index(bytes.len() + 1);
            let (head, tail) = bytes.split_at(at);

            let whole = render(&mut LineFramer::new(), &[&bytes]);
            let pieces = render(&mut LineFramer::new(), &[head, tail]);
            prop_assert_eq!(whole, pieces);
        }

        #[test]
        fn rendered_text_has_no_raw_carriage_returns(bytes in stream_bytes()) {
            let text = render(&mut LineFramer::new(), &[&bytes]);
            prop_assert!(!text.contains('\r'));
        }
    }
}
