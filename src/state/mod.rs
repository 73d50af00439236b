//! Application state management
//!
//! The State struct ties the phrase board together: configuration, the
//! phrase store, the sentence being composed, and the negotiator that
//! finds a backend able to speak it.

pub mod config;

use crate::speech::enumerate::{BackendEnumerator, BackendSource, StaticChannel};
use crate::speech::negotiator::{FailureReason, Negotiator, Outcome, Phase};
use crate::speech::synth::{BackendFactory, HostBackendFactory};
use crate::speech::{LanguageTag, SentenceComposer};
use crate::store::PhraseStore;
use crate::{Result, XtalkError};
use config::Config;
use log::{info, warn};
use std::time::{Duration, Instant};

/// Speech availability as the board sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechStatus {
    /// No session started yet
    Idle,
    /// Negotiation running
    Pending,
    /// Speaking through the named backend
    Ready(String),
    /// Negotiation ended without a backend
    Failed(FailureReason),
}

/// Main application state for the phrase board
pub struct State<F: BackendFactory = HostBackendFactory> {
    /// Configuration loaded from ~/.xtalk.cfg
    pub config: Config,

    /// Categorized phrases shown on the board
    pub store: PhraseStore,

    /// Sentence being built from selected phrases
    pub composer: SentenceComposer,

    /// Category currently shown
    pub category: Option<String>,

    negotiator: Negotiator<F>,
    status: SpeechStatus,
}

impl State<HostBackendFactory> {
    /// Load config and phrase store, and prepare host speech negotiation
    ///
    /// `language` overrides the configured target language.
    pub fn new(language: Option<LanguageTag>) -> Result<Self> {
        let config = Config::load()?;
        info!("Configuration loaded from {:?}", config.path());

        let store = PhraseStore::load(config.store_path())?;
        info!("Phrase store loaded: {} phrase(s)", store.len());

        let enumerator = Self::host_enumerator(&config);
        let negotiator = Negotiator::new(HostBackendFactory::new(), enumerator, config.negotiation_config());
        Ok(Self::with_parts(config, store, negotiator, language))
    }

    /// Host discovery plus engines named in the config
    pub fn host_enumerator(config: &Config) -> BackendEnumerator {
        let mut enumerator = BackendEnumerator::host().with_disabled(config.disabled_engines());
        let extra = config.extra_engines();
        if !extra.is_empty() {
            info!("Extra engines from config: {:?}", extra);
            enumerator = enumerator.with_channel(Box::new(StaticChannel::new(BackendSource::KnownDefault, extra)));
        }
        enumerator
    }
}

impl<F: BackendFactory> State<F> {
    /// Assemble state from already-built parts
    pub fn with_parts(
        config: Config,
        store: PhraseStore,
        negotiator: Negotiator<F>,
        language: Option<LanguageTag>,
    ) -> Self {
        let language = language.unwrap_or_else(|| config.language());
        let composer = SentenceComposer::new(language).with_voice(config.rate(), config.pitch());
        let category = store.list_categories().into_iter().next();

        Self {
            config,
            store,
            composer,
            category,
            negotiator,
            status: SpeechStatus::Idle,
        }
    }

    pub fn negotiator(&self) -> &Negotiator<F> {
        &self.negotiator
    }

    pub fn status(&self) -> &SpeechStatus {
        &self.status
    }

    /// Start negotiating a backend for the composer's language
    ///
    /// Any backend the composer holds is released first.
    pub fn start_speech(&mut self) -> Result<()> {
        if self.negotiator.in_progress() {
            return Err(XtalkError::NegotiationInProgress);
        }
        if let Some(mut old) = self.composer.detach() {
            info!("Releasing {} before renegotiating", old.id());
            old.shutdown();
        }
        self.negotiator.negotiate(self.composer.language().clone())?;
        self.status = SpeechStatus::Pending;
        self.poll_speech(Instant::now());
        Ok(())
    }

    /// Switch the target language and renegotiate
    pub fn set_language(&mut self, language: LanguageTag) -> Result<()> {
        info!("Target language changed to {}", language);
        self.composer.set_language(language);
        self.start_speech()
    }

    /// Drive negotiation; call from the event loop
    pub fn poll_speech(&mut self, now: Instant) -> &SpeechStatus {
        if let Some(outcome) = self.negotiator.poll(now) {
            self.apply_outcome(outcome);
        }
        &self.status
    }

    /// Block until negotiation settles or `timeout` passes
    pub fn wait_for_speech(&mut self, timeout: Duration) -> &SpeechStatus {
        if let Some(outcome) = self.negotiator.wait_for_outcome(timeout) {
            self.apply_outcome(outcome);
        }
        &self.status
    }

    /// Time until the negotiator next needs polling
    pub fn next_wakeup(&self) -> Option<Duration> {
        self.negotiator.time_until_next_scheduled()
    }

    fn apply_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Ready(ready) => {
                let id = ready.descriptor.identifier.clone();
                if let Some(mut old) = self.composer.attach(ready.backend) {
                    old.shutdown();
                }
                self.status = SpeechStatus::Ready(id);
            }
            Outcome::Failed(reason) => {
                warn!("Speech unavailable: {} ({})", reason, reason.recovery_hint());
                self.status = SpeechStatus::Failed(reason);
            }
        }
    }

    /// Abandon negotiation
    pub fn cancel_speech(&mut self) {
        self.negotiator.cancel();
        if self.negotiator.phase() == Phase::Idle && self.status == SpeechStatus::Pending {
            self.status = SpeechStatus::Idle;
        }
    }

    /// Add a phrase to the sentence
    pub fn select_phrase(&mut self, phrase: &str) {
        self.composer.select(phrase);
    }

    /// Speak the sentence; returns the submitted text
    pub fn play(&mut self) -> Result<String> {
        self.composer.speak()
    }

    /// Choose the category shown on the board
    pub fn show_category(&mut self, category: &str) -> bool {
        if self.store.list_categories().iter().any(|c| c == category) {
            self.category = Some(category.to_string());
            true
        } else {
            false
        }
    }

    /// Phrases in the shown category
    pub fn visible_phrases(&self) -> Vec<String> {
        self.category
            .as_deref()
            .map(|c| self.store.list_phrases(c))
            .unwrap_or_default()
    }
}
