//! Platform-specific speech backends

// Native TTS backend using the tts crate (cross-platform)
pub mod native;

// Command-line eSpeak (espeak-ng or classic espeak)
pub mod espeak;

// Speech Dispatcher through the spd-say client
pub mod speechd;
