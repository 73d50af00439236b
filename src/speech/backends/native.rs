//! Native backend using the tts crate
//!
//! The `tts` crate provides a unified interface to:
//! - Speech Dispatcher on Linux (via native bindings)
//! - AVFoundation on macOS/iOS
//! - WinRT on Windows
//!
//! Language support is derived from the voices the platform reports.

use crate::speech::language::{LanguageAvailability, LanguageTag};
use crate::speech::synth::{InitNotifier, SpeechBackend};
use crate::{Result, XtalkError};
use log::{debug, error, warn};
use tts::Tts as TtsCrate;

/// Platform speech engine behind the tts crate
pub struct NativeBackend {
    /// The tts crate's TTS instance
    tts: TtsCrate,

    /// Language last applied with set_language
    language: Option<String>,
}

impl NativeBackend {
    /// Initialize the platform engine
    ///
    /// The tts crate initializes synchronously, so readiness is reported
    /// right away.
    pub fn new(notifier: InitNotifier) -> Result<Self> {
        debug!("Creating native TTS backend");

        let tts = TtsCrate::default()
            .map_err(|e| XtalkError::Speech(format!("Failed to initialize TTS: {}", e)))?;

        debug!("Native TTS backend created successfully");
        notifier.ready();

        Ok(Self {
            tts,
            language: None,
        })
    }

    /// Language tags of every installed voice
    fn voice_languages(&self) -> Result<Vec<String>> {
        if !self.tts.supported_features().voice {
            return Err(XtalkError::Speech(
                "Voice listing not supported on this platform".to_string(),
            ));
        }
        let voices = self
            .tts
            .voices()
            .map_err(|e| XtalkError::Speech(format!("Failed to get voices: {}", e)))?;
        Ok(voices.iter().map(|v| v.language().as_str().to_string()).collect())
    }

    /// Map a 1.0-is-normal multiplier onto the engine's range
    fn scale(normal: f32, min: f32, max: f32, factor: f32) -> f32 {
        (normal * factor).clamp(min, max)
    }
}

impl SpeechBackend for NativeBackend {
    fn id(&self) -> &str {
        "native"
    }

    fn is_language_available(&self, language: &str) -> Result<LanguageAvailability> {
        let tag = LanguageTag::parse(language)
            .ok_or_else(|| XtalkError::Speech(format!("Invalid language tag: {}", language)))?;
        let languages = self.voice_languages()?;
        Ok(tag.availability_among(languages.iter().map(String::as_str)))
    }

    fn set_language(&mut self, language: &str) -> Result<LanguageAvailability> {
        let tag = LanguageTag::parse(language)
            .ok_or_else(|| XtalkError::Speech(format!("Invalid language tag: {}", language)))?;
        let voices = self
            .tts
            .voices()
            .map_err(|e| XtalkError::Speech(format!("Failed to get voices: {}", e)))?;

        // Prefer a voice matching language and region
        let mut chosen = None;
        let mut level = LanguageAvailability::NotSupported;
        for voice in &voices {
            let lang = voice.language();
            let availability = tag.availability_among([lang.as_str()]);
            if availability == LanguageAvailability::CountryAvailable {
                chosen = Some(voice);
                level = availability;
                break;
            }
            if availability.is_available() && chosen.is_none() {
                chosen = Some(voice);
                level = availability;
            }
        }

        let Some(voice) = chosen else {
            debug!("No voice for {}", language);
            return Ok(LanguageAvailability::NotSupported);
        };

        debug!("Selecting voice {} for {}", voice.name(), language);
        self.tts
            .set_voice(voice)
            .map_err(|e| XtalkError::Speech(format!("Failed to set voice: {}", e)))?;
        self.language = Some(language.to_string());
        Ok(level)
    }

    fn speak(&mut self, text: &str, interrupt: bool) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        debug!("Speaking: {}", text);
        self.tts.speak(text, interrupt).map_err(|e| {
            error!("Failed to speak: {}", e);
            XtalkError::Speech(format!("Speak failed: {}", e))
        })?;

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("Stopping speech");
        if !self.tts.supported_features().stop {
            return Ok(());
        }
        self.tts.stop().map_err(|e| {
            error!("Failed to stop speech: {}", e);
            XtalkError::Speech(format!("Stop failed: {}", e))
        })?;

        Ok(())
    }

    fn is_speaking(&mut self) -> bool {
        self.tts.supported_features().is_speaking && self.tts.is_speaking().unwrap_or(false)
    }

    fn set_rate(&mut self, rate: f32) -> Result<()> {
        debug!("Setting rate to {}", rate);

        if !self.tts.supported_features().rate {
            warn!("Rate control not supported on this platform");
            return Ok(());
        }

        let converted = Self::scale(
            self.tts.normal_rate(),
            self.tts.min_rate(),
            self.tts.max_rate(),
            rate,
        );
        self.tts
            .set_rate(converted)
            .map_err(|e| XtalkError::Speech(format!("Failed to set rate: {}", e)))?;

        Ok(())
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        debug!("Setting pitch to {}", pitch);

        if !self.tts.supported_features().pitch {
            warn!("Pitch control not supported on this platform");
            return Ok(());
        }

        let converted = Self::scale(
            self.tts.normal_pitch(),
            self.tts.min_pitch(),
            self.tts.max_pitch(),
            pitch,
        );
        self.tts
            .set_pitch(converted)
            .map_err(|e| XtalkError::Speech(format!("Failed to set pitch: {}", e)))?;

        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("Shutting down native backend (language {:?})", self.language);
        if let Err(e) = self.stop() {
            debug!("Stop during shutdown failed: {}", e);
        }
    }
}
