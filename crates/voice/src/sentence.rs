//! Sentence-boundary text accumulator for the TTS pump.

/// Minimum accumulation before a punctuation flush.
pub const MIN_CHARS: usize = 80;
/// Fallback flush delay for buffered text with no boundary.
pub const MAX_WAIT_MS: u64 = 1_000;

/// Sentence-terminal boundaries.
const BOUNDARIES: [&str; 3] = [". ", "! ", "? "];

/// Accumulates streamed text and emits speakable units.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buf: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append streamed text. Returns a flushable unit once at least
    /// [`MIN_CHARS`] have accumulated and a sentence boundary exists:
    /// everything up to (and including) the last boundary, with the
    /// remainder retained.
    pub fn push(&mut self, text: &str) -> Option<String> {
        self.buf.push_str(text);
        if self.buf.chars().count() < MIN_CHARS {
            return None;
        }

        let cut = BOUNDARIES
            .iter()
            .filter_map(|b| self.buf.rfind(b).map(|i| i + b.len()))
            .max()?;
        let rest = self.buf.split_off(cut);
        let flushed = std::mem::replace(&mut self.buf, rest);
        let flushed = flushed.trim_end().to_owned();
        if flushed.is_empty() {
            None
        } else {
            Some(flushed)
        }
    }

    /// Drain whatever is buffered (timer fallback and `finish`).
    pub fn take(&mut self) -> Option<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return None;
        }
        let text = std::mem::take(&mut self.buf);
        Some(text.trim().to_owned())
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
