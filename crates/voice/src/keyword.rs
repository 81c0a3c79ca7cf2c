//! Transcript-driven keyword listener.
//!
//! Feeds of recognized ambient text (from whatever local recognizer the
//! host wires up) are matched against bound words with case-insensitive
//! word-boundary regexes. This pipeline is deliberately separate from
//! the speech socket: it keeps working while the session is frozen
//! during a blocking tool call.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ports::{KeywordBinding, KeywordGuard, KeywordListener};

/// Fan-out point for recognized text. One per voice session.
pub struct TranscriptKeywordMatcher {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
}

impl Default for TranscriptKeywordMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptKeywordMatcher {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Push one fragment of recognized text to all active subscriptions.
    pub fn feed(&self, text: &str) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(text.to_owned()).is_ok());
    }
}

impl KeywordListener for TranscriptKeywordMatcher {
    fn listen(&self, bindings: Vec<KeywordBinding>) -> Box<dyn KeywordGuard> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.subscribers.lock().push(tx);

        let compiled: Vec<(regex::Regex, crate::ports::KeywordCallback)> = bindings
            .into_iter()
            .filter_map(|binding| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(&binding.word));
                match regex::Regex::new(&pattern) {
                    Ok(re) => Some((re, binding.on_match)),
                    Err(e) => {
                        tracing::warn!(word = %binding.word, error = %e, "bad keyword binding");
                        None
                    }
                }
            })
            .collect();

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    text = rx.recv() => match text {
                        Some(text) => text,
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                };
                for (re, on_match) in &compiled {
                    if re.is_match(&text) {
                        on_match();
                    }
                }
            }
        });

        Box::new(MatcherGuard { cancel: stop })
    }
}

struct MatcherGuard {
    cancel: CancellationToken,
}

impl KeywordGuard for MatcherGuard {
    fn stop(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for MatcherGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn matches_whole_words_case_insensitively() {
        let matcher = TranscriptKeywordMatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let mut guard = matcher.listen(vec![KeywordBinding::new("stop", move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        })]);

        matcher.feed("please STOP now");
        matcher.feed("unstoppable"); // no word boundary
        matcher.feed("full stop.");
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        guard.stop();
    }

    #[tokio::test]
    async fn stopped_guard_receives_nothing() {
        let matcher = TranscriptKeywordMatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let mut guard = matcher.listen(vec![KeywordBinding::new("cancel", move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        })]);

        guard.stop();
        settle().await;
        matcher.feed("cancel that");
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn multi_word_phrase_matches() {
        let matcher = TranscriptKeywordMatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let _guard = matcher.listen(vec![KeywordBinding::new("never mind", move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        })]);

        matcher.feed("oh never mind then");
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_guard_unsubscribes() {
        let matcher = TranscriptKeywordMatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        {
            let _guard = matcher.listen(vec![KeywordBinding::new("stop", move || {
                hits2.fetch_add(1, Ordering::SeqCst);
            })]);
        }
        settle().await;
        matcher.feed("stop");
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
