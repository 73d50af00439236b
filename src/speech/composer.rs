//! Sentence composer
//!
//! Collects the phrases the user taps on the board and turns them into one
//! utterance for the negotiated backend.

use super::language::LanguageTag;
use super::synth::SpeechBackend;
use crate::{Result, XtalkError};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

/// Marks that already end a sentence
const TERMINAL_MARKS: &[char] = &['。', '！', '？', '!', '?', '.'];

/// Phrases selected so far plus the backend that will speak them
pub struct SentenceComposer {
    phrases: Vec<String>,
    language: LanguageTag,
    rate: f32,
    pitch: f32,
    backend: Option<Box<dyn SpeechBackend>>,
}

impl SentenceComposer {
    /// Composer for `language` at normal rate and pitch
    pub fn new(language: LanguageTag) -> Self {
        Self {
            phrases: Vec::new(),
            language,
            rate: 1.0,
            pitch: 1.0,
            backend: None,
        }
    }

    /// Rate and pitch applied before each sentence (1.0 = normal)
    pub fn with_voice(mut self, rate: f32, pitch: f32) -> Self {
        self.rate = rate;
        self.pitch = pitch;
        self
    }

    /// Append a phrase
    pub fn select(&mut self, phrase: &str) {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return;
        }
        debug!("Selected phrase: {}", phrase);
        self.phrases.push(phrase.to_string());
    }

    /// Remove and return the last phrase
    pub fn undo(&mut self) -> Option<String> {
        self.phrases.pop()
    }

    pub fn clear(&mut self) {
        debug!("Clearing {} phrase(s)", self.phrases.len());
        self.phrases.clear();
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn language(&self) -> &LanguageTag {
        &self.language
    }

    pub fn set_language(&mut self, language: LanguageTag) {
        self.language = language;
    }

    /// Text shown on the board: phrases separated by a space
    pub fn display_text(&self) -> String {
        self.phrases.join(" ")
    }

    /// Text handed to the backend
    ///
    /// Whitespace is dropped for languages written without spaces and
    /// collapsed otherwise; a terminal mark is appended when missing.
    pub fn utterance(&self) -> String {
        let joined = self.display_text();
        let unspaced = self.language.is_unspaced();

        let mut text = if unspaced {
            WHITESPACE.replace_all(&joined, "").into_owned()
        } else {
            WHITESPACE.replace_all(joined.trim(), " ").into_owned()
        };

        if !text.is_empty() && !text.ends_with(TERMINAL_MARKS) {
            text.push(if unspaced { '。' } else { '.' });
        }
        text
    }

    /// Attach a negotiated backend, returning the one it replaces
    pub fn attach(&mut self, backend: Box<dyn SpeechBackend>) -> Option<Box<dyn SpeechBackend>> {
        info!("Composer now speaks through {}", backend.id());
        self.backend.replace(backend)
    }

    /// Take the backend out, e.g. before renegotiating
    pub fn detach(&mut self) -> Option<Box<dyn SpeechBackend>> {
        self.backend.take()
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    /// Whether the backend is still playing a sentence
    pub fn is_speaking(&mut self) -> bool {
        self.backend.as_mut().map_or(false, |b| b.is_speaking())
    }

    pub fn backend_id(&self) -> Option<&str> {
        self.backend.as_ref().map(|b| b.id())
    }

    /// Speak the composed sentence, cutting off anything still playing
    ///
    /// Returns the text that was submitted.
    pub fn speak(&mut self) -> Result<String> {
        if self.phrases.is_empty() {
            return Err(XtalkError::EmptySentence);
        }
        let text = self.utterance();
        let backend = self.backend.as_mut().ok_or(XtalkError::NotReady)?;

        backend.stop()?;
        backend.set_rate(self.rate)?;
        backend.set_pitch(self.pitch)?;
        info!("Speaking: {}", text);
        backend.speak(&text, true)?;
        Ok(text)
    }

    /// Silence the backend without touching the sentence
    pub fn stop(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => backend.stop(),
            None => Ok(()),
        }
    }
}
