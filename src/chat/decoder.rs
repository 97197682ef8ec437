//! Splits a chunked byte stream into newline-terminated lines.

/// Line framing over arbitrary read boundaries.
///
/// Bytes after the last `\n` stay buffered until more data or `finish`.
/// Splitting happens on raw bytes so a UTF-8 sequence cut by a read boundary
/// is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no `\n`
    scanned: usize,
}

/// A complete line, or one that was not valid UTF-8.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Text(String),
    Invalid(Vec<u8>),
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes, returning every line it completed.
    /// Blank lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            if let Some(line) = decode_line(&self.buffer[start..end]) {
                lines.push(line);
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    /// End of stream: whatever is left is treated as the last line.
    pub fn finish(&mut self) -> Option<Line> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        decode_line(&rest)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<Line> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(Line::Text(text.to_string())),
        Err(_) => Some(Line::Invalid(raw.to_vec())),
    }
}
