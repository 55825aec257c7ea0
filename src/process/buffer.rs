//! Append-only byte buffer with an optional hard cap

/// Growable byte buffer that freezes once it reaches its limit.
///
/// Invariant: `truncated` implies `data.len() == limit`.
#[derive(Debug, Clone, Default)]
pub struct CappedBuffer {
    data: Vec<u8>,
    limit: Option<usize>,
    truncated: bool,
}

impl CappedBuffer {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `chunk` as fits. Returns true if any byte was
    /// discarded.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let Some(limit) = self.limit else {
            self.data.extend_from_slice(chunk);
            return false;
        };

        let room = limit.saturating_sub(self.data.len());
        if chunk.len() <= room {
            self.data.extend_from_slice(chunk);
            return false;
        }

        self.data.extend_from_slice(&chunk[..room]);
        self.truncated = true;
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Decode as UTF-8, replacing invalid sequences. An incomplete sequence
    /// at the very end is dropped rather than replaced: it is either still
    /// in flight or was cut by the cap.
    pub fn to_text(&self) -> String {
        let bytes = &self.data;
        let end = match std::str::from_utf8(bytes) {
            Ok(s) => return s.to_string(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => bytes.len() - incomplete_tail(bytes),
        };
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }
}

/// Length of a trailing, not-yet-complete UTF-8 sequence
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        let have = bytes.len() - i;
        return if have < needed { have } else { 0 };
    }
    0
}
