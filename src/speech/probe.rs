//! Language capability probe
//!
//! Engines are unreliable about reporting what they can speak: some
//! answer "not supported" to an availability query and then accept the
//! same language when it is set, others refuse both and still speak it
//! correctly. The probe therefore escalates through three checks and
//! only gives up when all of them fail.

use super::language::{LanguageAvailability, LanguageTag};
use super::synth::SpeechBackend;
use log::{debug, info, warn};

/// Which check established support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSignal {
    AvailabilityCheck,
    DirectSetAttempt,
    TrialUtteranceSuccess,
}

/// Why a language was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFailure {
    /// Voice data for the language can be installed
    MissingData,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub supported: bool,
    pub signal: Option<ProbeSignal>,
    pub failure: Option<LanguageFailure>,
}

impl ProbeResult {
    fn supported(signal: ProbeSignal) -> Self {
        Self {
            supported: true,
            signal: Some(signal),
            failure: None,
        }
    }

    fn unsupported(failure: LanguageFailure) -> Self {
        Self {
            supported: false,
            signal: None,
            failure: Some(failure),
        }
    }
}

/// Tracks the most specific failure seen across variants
#[derive(Default)]
struct Observations {
    missing_data: bool,
}

impl Observations {
    fn record(&mut self, availability: LanguageAvailability) {
        if availability == LanguageAvailability::MissingData {
            self.missing_data = true;
        }
    }

    fn classify(&self) -> LanguageFailure {
        if self.missing_data {
            LanguageFailure::MissingData
        } else {
            LanguageFailure::NotSupported
        }
    }
}

/// Runs the language checks against one backend
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    trial_text: Option<String>,
}

impl CapabilityProbe {
    /// Probe with the target language's default trial text
    pub fn new() -> Self {
        Self { trial_text: None }
    }

    /// Use specific text for the trial utterance
    pub fn with_trial_text(text: impl Into<String>) -> Self {
        Self {
            trial_text: Some(text.into()),
        }
    }

    /// Decide whether `backend` can speak `target`
    ///
    /// `allow_trial` enables the trial utterance; the caller grants it only
    /// on the first probe of a session so a lying engine cannot loop.
    pub fn probe(
        &self,
        backend: &mut dyn SpeechBackend,
        target: &LanguageTag,
        allow_trial: bool,
    ) -> ProbeResult {
        let variants = target.variants();
        let mut seen = Observations::default();
        debug!("Probing {} for {} (variants {:?})", backend.id(), target, variants);

        // 1. Availability queries
        for variant in &variants {
            let availability = Self::ask(backend.is_language_available(variant), variant, "availability");
            seen.record(availability);
            if availability.is_available() {
                info!("{} reports {} as {}", backend.id(), variant, availability.as_str());
                // Make the backend actually use the matching spelling
                if let Err(e) = backend.set_language(variant) {
                    warn!("{} failed to switch to {}: {}", backend.id(), variant, e);
                }
                return ProbeResult::supported(ProbeSignal::AvailabilityCheck);
            }
        }

        // 2. Set the language directly
        for variant in &variants {
            let availability = Self::ask(backend.set_language(variant), variant, "set");
            seen.record(availability);
            if availability.is_available() {
                info!("{} accepted {} on direct set", backend.id(), variant);
                return ProbeResult::supported(ProbeSignal::DirectSetAttempt);
            }
        }

        // 3. Trial utterance
        if allow_trial {
            let text = self.trial_text.as_deref().unwrap_or_else(|| target.trial_text());
            debug!("{} refused {}, trying a trial utterance", backend.id(), target);
            match backend.speak(text, true) {
                Ok(()) => {
                    info!("{} spoke the trial utterance, treating {} as supported", backend.id(), target);
                    return ProbeResult::supported(ProbeSignal::TrialUtteranceSuccess);
                }
                Err(e) => debug!("Trial utterance failed: {}", e),
            }
        }

        let failure = seen.classify();
        info!("{} cannot speak {}: {:?}", backend.id(), target, failure);
        ProbeResult::unsupported(failure)
    }

    /// Backend errors count as "not supported" for that variant
    fn ask(
        answer: crate::Result<LanguageAvailability>,
        variant: &str,
        what: &str,
    ) -> LanguageAvailability {
        match answer {
            Ok(availability) => {
                debug!("{} {} -> {}", what, variant, availability.as_str());
                availability
            }
            Err(e) => {
                warn!("{} query for {} failed: {}", what, variant, e);
                LanguageAvailability::NotSupported
            }
        }
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Result, XtalkError};
    use std::collections::HashMap;

    /// Backend with scripted answers per variant
    #[derive(Default)]
    struct ScriptedBackend {
        available: HashMap<String, LanguageAvailability>,
        settable: HashMap<String, LanguageAvailability>,
        speak_ok: bool,
        failing_queries: bool,
        set_calls: Vec<String>,
        spoken: Vec<String>,
    }

    impl SpeechBackend for ScriptedBackend {
        fn id(&self) -> &str {
            "scripted"
        }

        fn is_language_available(&self, language: &str) -> Result<LanguageAvailability> {
            if self.failing_queries {
                return Err(XtalkError::Speech("engine crashed".into()));
            }
            Ok(*self
                .available
                .get(language)
                .unwrap_or(&LanguageAvailability::NotSupported))
        }

        fn set_language(&mut self, language: &str) -> Result<LanguageAvailability> {
            self.set_calls.push(language.to_string());
            Ok(*self
                .settable
                .get(language)
                .unwrap_or(&LanguageAvailability::NotSupported))
        }

        fn speak(&mut self, text: &str, _interrupt: bool) -> Result<()> {
            self.spoken.push(text.to_string());
            if self.speak_ok {
                Ok(())
            } else {
                Err(XtalkError::Speech("silent".into()))
            }
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_rate(&mut self, _rate: f32) -> Result<()> {
            Ok(())
        }

        fn set_pitch(&mut self, _pitch: f32) -> Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    fn zh() -> LanguageTag {
        LanguageTag::parse("zh").unwrap()
    }

    #[test]
    fn test_availability_check_wins_and_sets_variant() {
        let mut backend = ScriptedBackend::default();
        backend
            .available
            .insert("zh-CN".into(), LanguageAvailability::CountryAvailable);

        let result = CapabilityProbe::new().probe(&mut backend, &zh(), true);
        assert!(result.supported);
        assert_eq!(result.signal, Some(ProbeSignal::AvailabilityCheck));
        assert_eq!(backend.set_calls, vec!["zh-CN"]);
        assert!(backend.spoken.is_empty());
    }

    #[test]
    fn test_direct_set_after_failed_queries() {
        let mut backend = ScriptedBackend::default();
        backend
            .settable
            .insert("zh-Hans".into(), LanguageAvailability::Available);

        let result = CapabilityProbe::new().probe(&mut backend, &zh(), true);
        assert_eq!(result.signal, Some(ProbeSignal::DirectSetAttempt));
        // Earlier variants were tried and did not disqualify later ones
        assert_eq!(backend.set_calls, vec!["zh", "zh-CN", "zh-Hans"]);
    }

    #[test]
    fn test_trial_utterance_override() {
        let mut backend = ScriptedBackend {
            speak_ok: true,
            ..Default::default()
        };

        let result = CapabilityProbe::new().probe(&mut backend, &zh(), true);
        assert!(result.supported);
        assert_eq!(result.signal, Some(ProbeSignal::TrialUtteranceSuccess));
        assert_eq!(backend.spoken, vec!["测试语音播放"]);
    }

    #[test]
    fn test_trial_not_run_when_disallowed() {
        let mut backend = ScriptedBackend {
            speak_ok: true,
            ..Default::default()
        };

        let result = CapabilityProbe::new().probe(&mut backend, &zh(), false);
        assert!(!result.supported);
        assert_eq!(result.failure, Some(LanguageFailure::NotSupported));
        assert!(backend.spoken.is_empty());
    }

    #[test]
    fn test_missing_data_takes_precedence() {
        let mut backend = ScriptedBackend::default();
        backend
            .available
            .insert("zh-CN".into(), LanguageAvailability::MissingData);

        let result = CapabilityProbe::new().probe(&mut backend, &zh(), true);
        assert!(!result.supported);
        assert_eq!(result.failure, Some(LanguageFailure::MissingData));
    }

    #[test]
    fn test_backend_errors_are_absorbed() {
        let mut backend = ScriptedBackend {
            failing_queries: true,
            ..Default::default()
        };

        let result = CapabilityProbe::with_trial_text("hi").probe(&mut backend, &zh(), true);
        assert!(!result.supported);
        assert_eq!(result.failure, Some(LanguageFailure::NotSupported));
        assert_eq!(backend.spoken, vec!["hi"]);
    }
}
