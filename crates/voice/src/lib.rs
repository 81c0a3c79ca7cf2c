//! Voice relay: the client-side state machine owning one speech session,
//! the sentence-buffered TTS pump, and the in-flight converse lifecycle.
//!
//! Audio capture/playback, the concrete speech provider, and the
//! synthesis provider are ports ([`ports`]); the orchestration here is
//! provider-agnostic.

pub mod approval;
pub mod audio;
pub mod converse;
pub mod keyword;
pub mod ports;
pub mod relay;
pub mod sentence;
pub mod state;
pub mod tts;

pub use converse::{ConverseClient, ConverseTransport};
pub use keyword::TranscriptKeywordMatcher;
pub use relay::{ConverseMode, Intent, RelayConfig, RelayHandle, SessionDeps, VoiceRelay};
pub use state::{RelayStatus, Snapshot, VoiceStore};
pub use tts::TtsPump;
