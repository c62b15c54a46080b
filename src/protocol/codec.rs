//! Frame encoding and decoding for the pool wire protocol
//!
//! Commands are ASCII written verbatim with no terminator. Responses are
//! decoded either as best-effort single reads ([`Framing::Raw`]) or as
//! newline-delimited lines ([`Framing::Line`]).

use crate::{Error, Result, Username};
use bytes::BytesMut;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum length of the server version banner
pub const BANNER_MAX_LEN: usize = 3;

/// Maximum length of any other response
pub const RESPONSE_MAX_LEN: usize = 1024;

/// How responses are delimited on the inbound stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Whatever a single read returns, cut at the caller's bound
    Raw,
    /// One `\n`-terminated line per response, or an unterminated one that
    /// fills the bound exactly; oversized lines are errors
    #[default]
    Line,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => write!(f, "raw"),
            Framing::Line => write!(f, "line"),
        }
    }
}

/// Outbound command frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `JOB,<username>`
    Job(Username),
    /// `0`, the acknowledgment sent during the handshake
    Ack,
    /// Result of a unit of work, sent as-is
    Answer(String),
    /// `BALA`
    Balance,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Job(username) => write!(f, "JOB,{}", username),
            Command::Ack => write!(f, "0"),
            Command::Answer(answer) => write!(f, "{}", answer),
            Command::Balance => write!(f, "BALA"),
        }
    }
}

/// Codec for the pool connection
#[derive(Debug, Clone)]
pub struct PoolCodec {
    framing: Framing,
    max_len: usize,
}

impl PoolCodec {
    /// Create a codec with the default response bound
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            max_len: RESPONSE_MAX_LEN,
        }
    }

    /// Bound the next decoded response
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len.max(1);
    }

    /// Current response bound
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Framing mode
    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn decode_line(&self, buf: &mut BytesMut) -> Result<Option<String>> {
        // Terminators left over from a frame that was completed by its bound
        let leading = buf.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
        let _ = buf.split_to(leading);

        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) if pos > self.max_len => Err(Error::protocol(format!(
                "response of {} bytes exceeds limit of {}",
                pos, self.max_len
            ))),
            Some(pos) => {
                let line = buf.split_to(pos + 1);
                let mut text = &line[..pos];
                if let Some(stripped) = text.strip_suffix(b"\r") {
                    text = stripped;
                }
                Ok(Some(String::from_utf8_lossy(text).into_owned()))
            }
            None if buf.len() > self.max_len => Err(Error::protocol(format!(
                "unterminated response exceeds limit of {} bytes",
                self.max_len
            ))),
            // An unterminated frame that fills its bound exactly is complete
            None if buf.len() == self.max_len => {
                let frame = buf.split();
                Ok(Some(String::from_utf8_lossy(&frame).into_owned()))
            }
            None => Ok(None),
        }
    }
}

impl Default for PoolCodec {
    fn default() -> Self {
        Self::new(Framing::default())
    }
}

impl Decoder for PoolCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        match self.framing {
            Framing::Raw => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let len = buf.len().min(self.max_len);
                let frame = buf.split_to(len);
                Ok(Some(String::from_utf8_lossy(&frame).into_owned()))
            }
            Framing::Line => self.decode_line(buf),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // Peer closed after an unterminated final line
        let frame = buf.split();
        Ok(Some(String::from_utf8_lossy(&frame).trim_end().to_string()))
    }
}

impl Encoder<Command> for PoolCodec {
    type Error = Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<()> {
        let text = command.to_string();
        dst.reserve(text.len());
        dst.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(command: Command) -> Vec<u8> {
        let mut codec = PoolCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(command, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_command_encoding() {
        let username = Username::new("alice").unwrap();
        assert_eq!(encode(Command::Job(username)), b"JOB,alice");
        assert_eq!(encode(Command::Ack), b"0");
        assert_eq!(encode(Command::Balance), b"BALA");
        assert_eq!(encode(Command::Answer("1234".to_string())), b"1234");
    }

    #[test]
    fn test_raw_decoding_respects_bound() {
        let mut codec = PoolCodec::new(Framing::Raw);
        codec.set_max_len(BANNER_MAX_LEN);
        let mut buf = BytesMut::from(&b"2.4GOOD"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("2.4".to_string()));
        // Surplus bytes stay buffered for the next response
        codec.set_max_len(RESPONSE_MAX_LEN);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("GOOD".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_line_decoding_waits_for_terminator() {
        let mut codec = PoolCodec::new(Framing::Line);
        let mut buf = BytesMut::from(&b"GO"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"OD\r\nBAD\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("GOOD".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("BAD".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_decoding_rejects_oversized_frames() {
        let mut codec = PoolCodec::new(Framing::Line);
        codec.set_max_len(3);

        let mut buf = BytesMut::from(&b"2.45\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol { .. })));

        let mut buf = BytesMut::from(&b"2.456"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol { .. })));

        let mut buf = BytesMut::from(&b"2.4\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("2.4".to_string()));
    }

    #[test]
    fn test_line_decoding_completes_unterminated_banner_at_bound() {
        let mut codec = PoolCodec::new(Framing::Line);
        codec.set_max_len(BANNER_MAX_LEN);
        let mut buf = BytesMut::from(&b"2.7"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("2.7".to_string()));

        // A terminator sent after the banner does not become an empty frame
        codec.set_max_len(RESPONSE_MAX_LEN);
        buf.extend_from_slice(b"\nGOOD\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("GOOD".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_decode_eof_flushes_partial_line() {
        let mut codec = PoolCodec::new(Framing::Line);
        let mut buf = BytesMut::from(&b"12.34"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("12.34".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_max_len_never_zero() {
        let mut codec = PoolCodec::default();
        codec.set_max_len(0);
        assert_eq!(codec.max_len(), 1);
    }
}
