// src/imap/codec.rs

//! Implements a CRLF-delimited line codec for the IMAP command/response
//! exchange, as an `Encoder`/`Decoder` pair for network communication.

use crate::core::TidemailError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence terminating every line.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limit to prevent a hostile or broken server from making the
// client buffer an unbounded amount of data.
const MAX_LINE_SIZE: usize = 1024 * 1024; // 1MB max response line.

/// A `tokio_util::codec` implementation for CRLF-terminated protocol lines.
/// Decoded items carry the line content without the terminator.
#[derive(Debug, Default)]
pub struct LineCodec;

impl Encoder<String> for LineCodec {
    type Error = TidemailError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // A bare CR or LF inside a command would let the payload smuggle a
        // second command onto the wire.
        if item.contains(['\r', '\n']) {
            return Err(TidemailError::InvalidRequest(
                "command contains a line break".to_string(),
            ));
        }
        dst.reserve(item.len() + CRLF_LEN);
        dst.put_slice(item.as_bytes());
        dst.put_slice(CRLF);
        Ok(())
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = TidemailError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.windows(CRLF_LEN).position(|w| w == CRLF) else {
            if src.len() > MAX_LINE_SIZE {
                return Err(TidemailError::Protocol(format!(
                    "response line exceeds {MAX_LINE_SIZE} bytes"
                )));
            }
            return Ok(None);
        };

        if pos > MAX_LINE_SIZE {
            return Err(TidemailError::Protocol(format!(
                "response line exceeds {MAX_LINE_SIZE} bytes"
            )));
        }

        let line = src.split_to(pos);
        src.advance(CRLF_LEN);
        Ok(Some(String::from_utf8(line.to_vec())?))
    }
}
