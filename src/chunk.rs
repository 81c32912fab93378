//! Outbound message chunking and styling.
//!
//! The server rejects `msg` commands whose body is longer than
//! [`MAX_MESSAGE_LEN`](crate::constants::MAX_MESSAGE_LEN), so long messages are cut into consecutive chunks
//! and each chunk is wrapped with the sender's style markup.
//!
//! Chunk boundaries are counted in characters and never split a UTF-8
//! sequence. Word boundaries are not respected.

use serde::{Deserialize, Serialize};

/// Sender style attributes attached to every outbound chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageStyle {
    /// Hex colour of the sender name.
    pub name_color: String,
    /// Font size in points.
    pub font_size: u8,
    /// Hex colour of the message text.
    pub font_color: String,
    /// Font face index.
    pub font_face: String,
}

impl Default for MessageStyle {
    fn default() -> Self {
        Self {
            name_color: "000".to_string(),
            font_size: 11,
            font_color: "000".to_string(),
            font_face: "0".to_string(),
        }
    }
}

/// Split `body` into chunks of at most `max_len` characters.
///
/// Concatenating the chunks yields `body`. An empty body yields no chunks.
///
/// # Panics
///
/// Panics if `max_len == 0`.
#[must_use]
pub fn cut(body: &str, max_len: usize) -> Vec<&str> {
    assert!(max_len > 0, "chunk length must be > 0");

    let mut chunks = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(max_len)
            .map_or(rest.len(), |(idx, _)| idx);
        let (chunk, tail) = rest.split_at(split);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

/// Wrap one chunk with the sender's style markup.
#[must_use]
pub fn wrap(chunk: &str, style: &MessageStyle) -> String {
    format!(
        "<n{}/><m v=\"1\"><g xs0=\"0\"><g x{}s{}=\"{}\">{}</g></g></m>",
        style.name_color, style.font_size, style.font_color, style.font_face, chunk
    )
}

/// Cut `body` and wrap every chunk, ready to be sent as `msg` bodies.
#[must_use]
pub fn styled_chunks(body: &str, max_len: usize, style: &MessageStyle) -> Vec<String> {
    cut(body, max_len)
        .into_iter()
        .map(|chunk| wrap(chunk, style))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_MESSAGE_LEN;

    #[test]
    fn test_chunk_count_and_reassembly() {
        let body = "abcdefghij".repeat(7); // 70 chars
        for max in [1, 3, 7, 10, 69, 70, 71, 500] {
            let chunks = cut(&body, max);
            assert_eq!(chunks.len(), body.len().div_ceil(max), "max={max}");
            assert!(chunks.iter().all(|c| c.chars().count() <= max));
            assert_eq!(chunks.concat(), body);
        }
    }

    #[test]
    fn test_empty_body_has_no_chunks() {
        assert!(cut("", 10).is_empty());
    }

    #[test]
    fn test_multibyte_characters_are_not_split() {
        let body = "héllo wörld ✓✓✓";
        let chunks = cut(body, 4);
        assert_eq!(chunks, vec!["héll", "o wö", "rld ", "✓✓✓"]);
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn test_default_limit_splits_long_message() {
        let body = "x".repeat(MAX_MESSAGE_LEN * 2 + 1);
        let chunks = cut(&body, MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "x");
    }

    #[test]
    fn test_wrap_uses_style() {
        let style = MessageStyle {
            name_color: "F00".into(),
            font_size: 12,
            font_color: "0F0".into(),
            font_face: "1".into(),
        };
        assert_eq!(
            wrap("hi", &style),
            "<nF00/><m v=\"1\"><g xs0=\"0\"><g x12s0F0=\"1\">hi</g></g></m>"
        );
    }

    #[test]
    fn test_styled_chunks_wraps_each_chunk() {
        let out = styled_chunks("abcd", 2, &MessageStyle::default());
        assert_eq!(out.len(), 2);
        assert!(out[0].contains(">ab</g>"));
        assert!(out[1].contains(">cd</g>"));
    }
}
