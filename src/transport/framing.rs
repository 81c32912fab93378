//! Wire codec for the line-framed chat protocol.
//!
//! A command is a list of fields joined with `:` and terminated:
//!
//! ```text
//! field:field:field\0         (first frame on a fresh connection)
//! field:field:field\r\n\0     (every later frame)
//! ```
//!
//! Inbound frames always end with `\r\n\0`. A frame that is nothing but the
//! terminator is the server's keepalive echo and carries no command.

use anyhow::{bail, Result};

use crate::constants::{FIELD_SEPARATOR, FIRST_FRAME_TERMINATOR, FRAME_TERMINATOR, MAX_FRAME_SIZE};

/// Encode one outbound command.
#[must_use]
pub fn encode_command<S: AsRef<str>>(fields: &[S], first: bool) -> Vec<u8> {
    let terminator = if first {
        FIRST_FRAME_TERMINATOR
    } else {
        FRAME_TERMINATOR
    };

    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            let mut sep = [0u8; 4];
            out.extend_from_slice(FIELD_SEPARATOR.encode_utf8(&mut sep).as_bytes());
        }
        out.extend_from_slice(field.as_ref().as_bytes());
    }
    out.extend_from_slice(terminator.as_bytes());
    out
}

/// Bare keepalive frame.
#[must_use]
pub fn keepalive_frame() -> &'static [u8] {
    FRAME_TERMINATOR.as_bytes()
}

/// Streaming decoder that splits inbound bytes into frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// Returned frames have the terminator stripped. Keepalive echoes are
    /// dropped. Incomplete data is buffered for the next call.
    ///
    /// # Errors
    ///
    /// Fails once the buffered partial frame exceeds [`MAX_FRAME_SIZE`]; the
    /// stream cannot be resynchronised after that.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);
        let terminator = FRAME_TERMINATOR.as_bytes();
        let mut frames = Vec::new();

        let mut start = 0;
        while let Some(pos) = find(&self.buf[start..], terminator) {
            let frame = &self.buf[start..start + pos];
            if !frame.is_empty() {
                frames.push(frame.to_vec());
            }
            start += pos + terminator.len();
        }

        // Remove consumed bytes
        self.buf.drain(..start);
        if self.buf.len() > MAX_FRAME_SIZE {
            bail!(
                "Unterminated frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                self.buf.len()
            );
        }
        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
