//! Speech backend abstraction
//!
//! Every engine the phrase board can drive implements [`SpeechBackend`].
//! Backends are constructed by a [`BackendFactory`] and report readiness
//! later through an [`InitNotifier`], the same way platform engines call
//! back once their service connection is up.

use super::backends::espeak::EspeakBackend;
use super::backends::native::NativeBackend;
use super::backends::speechd::SpdSayBackend;
use super::enumerate::BackendDescriptor;
use super::language::LanguageAvailability;
use crate::{Result, XtalkError};
use log::{debug, info};
use std::fmt;
use std::sync::mpsc::Sender;

/// Identity of one constructed backend instance
///
/// A new id is issued every time a backend is constructed, including
/// retries of the same engine, so late callbacks can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a backend's asynchronous initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    Success,
    Error(String),
}

/// Event delivered from a backend to the negotiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub instance: InstanceId,
    pub status: InitStatus,
}

/// One-shot handle a backend uses to report that it finished starting up
///
/// Consumed on use, so each instance reports at most once.
#[derive(Debug)]
pub struct InitNotifier {
    instance: InstanceId,
    tx: Sender<BackendEvent>,
}

impl InitNotifier {
    pub fn new(instance: InstanceId, tx: Sender<BackendEvent>) -> Self {
        Self { instance, tx }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Report successful initialization
    pub fn ready(self) {
        self.send(InitStatus::Success);
    }

    /// Report failed initialization
    pub fn failed(self, reason: impl Into<String>) {
        self.send(InitStatus::Error(reason.into()));
    }

    fn send(self, status: InitStatus) {
        debug!("Backend {} reports {:?}", self.instance, status);
        // The negotiator may already be gone; nothing to do then
        let _ = self.tx.send(BackendEvent {
            instance: self.instance,
            status,
        });
    }
}

/// Speech backend trait
///
/// Language arguments are tag spellings such as `zh`, `zh-CN` or `zh-CHS`.
/// Rate and pitch are multipliers where 1.0 is the engine's normal value.
pub trait SpeechBackend: Send {
    /// Engine identifier this instance was built from
    fn id(&self) -> &str;

    /// Ask whether a language can be rendered, without changing anything
    fn is_language_available(&self, language: &str) -> Result<LanguageAvailability>;

    /// Switch the backend to a language
    fn set_language(&mut self, language: &str) -> Result<LanguageAvailability>;

    /// Speak text; with `interrupt` any current utterance is dropped first
    fn speak(&mut self, text: &str, interrupt: bool) -> Result<()>;

    /// Silence current speech
    fn stop(&mut self) -> Result<()>;

    /// Whether an utterance is currently playing
    fn is_speaking(&mut self) -> bool {
        false
    }

    fn set_rate(&mut self, rate: f32) -> Result<()>;

    fn set_pitch(&mut self, pitch: f32) -> Result<()>;

    /// Release engine resources. Called exactly once before the backend is dropped.
    fn shutdown(&mut self);
}

/// Constructs backends from enumerated descriptors
pub trait BackendFactory {
    /// Construct a backend. Readiness is reported later through `notifier`;
    /// an `Err` here counts as an initialization failure.
    fn create(
        &mut self,
        descriptor: &BackendDescriptor,
        notifier: InitNotifier,
    ) -> Result<Box<dyn SpeechBackend>>;
}

/// Factory for the engines this host can run
///
/// Identifiers:
/// - `native`: platform engine via the tts crate
/// - `espeak-ng`, `espeak`: command-line eSpeak
/// - `spd-say`, `speechd:<module>`: Speech Dispatcher client
#[derive(Debug, Default)]
pub struct HostBackendFactory;

impl HostBackendFactory {
    pub fn new() -> Self {
        Self
    }
}

impl BackendFactory for HostBackendFactory {
    fn create(
        &mut self,
        descriptor: &BackendDescriptor,
        notifier: InitNotifier,
    ) -> Result<Box<dyn SpeechBackend>> {
        let id = descriptor.identifier.as_str();
        info!("Constructing backend {} ({})", id, notifier.instance());

        match id {
            "native" => Ok(Box::new(NativeBackend::new(notifier)?)),
            "espeak-ng" | "espeak" => Ok(Box::new(EspeakBackend::new(id, notifier)?)),
            "spd-say" => Ok(Box::new(SpdSayBackend::new(None, notifier)?)),
            _ => match id.strip_prefix("speechd:") {
                Some(module) if !module.is_empty() => {
                    Ok(Box::new(SpdSayBackend::new(Some(module), notifier)?))
                }
                _ => Err(XtalkError::UnknownBackend(id.to_string())),
            },
        }
    }
}
