//! Speech backend negotiation
//!
//! Finds a backend that can speak the target language. The negotiator
//! constructs one backend at a time, waits for its init callback, probes
//! it, and either hands it to the caller or retries / falls back to the
//! next enumerated backend. Every retry and every fallback spends one
//! attempt, and the session ends once `max_attempts` is used up.
//!
//! The negotiator is driven from a single dispatch loop:
//!
//! ```text
//! negotiate(tag) ──► Initializing ──init ok──► Probing ──supported──► Ready
//!                      │    ▲                    │
//!                 init │    │ retry timer        ├─missing data──► Failed
//!                 fail ▼    │                    │
//!                    Retrying                    └─not supported─► FallingBack ──► Initializing
//! ```
//!
//! Callbacks and timers carry the [`InstanceId`] of the backend they belong
//! to. Anything addressed to an instance that is no longer current is
//! dropped.

use super::enumerate::{BackendDescriptor, BackendEnumerator};
use super::language::LanguageTag;
use super::probe::{CapabilityProbe, LanguageFailure, ProbeSignal};
use super::synth::{BackendEvent, BackendFactory, InitNotifier, InitStatus, InstanceId, SpeechBackend};
use crate::{Result, XtalkError};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Terminal failure reported to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The engine knows the language but its voice data is not installed
    MissingLanguageData,
    /// No tried engine speaks the language
    NotSupported,
    /// The engine never finished initializing
    InitError,
    /// Retries and fallbacks used up every attempt
    AttemptsExhausted,
}

impl FailureReason {
    /// What the user can do about it
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::MissingLanguageData => {
                "Install the voice data for this language (for example espeak-ng-data), then retry"
            }
            Self::NotSupported => {
                "Install or enable a speech engine that supports this language"
            }
            Self::InitError => "Check that a speech engine is installed and running, then retry",
            Self::AttemptsExhausted => "Every available engine failed; check the engine settings and retry",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingLanguageData => "language data missing",
            Self::NotSupported => "language not supported",
            Self::InitError => "speech engine failed to initialize",
            Self::AttemptsExhausted => "all attempts exhausted",
        };
        f.write_str(text)
    }
}

/// Most recent failure seen during a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastFailure {
    #[default]
    None,
    LanguageMissingData,
    LanguageNotSupported,
    BackendInitError,
}

/// Where the session is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for the init callback of `instance`
    Initializing { instance: InstanceId },
    Probing { instance: InstanceId },
    /// Waiting for the retry timer after `instance` failed
    Retrying { instance: InstanceId },
    FallingBack,
    Ready,
    Failed(FailureReason),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed(_))
    }
}

/// Counters for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationState {
    attempt_count: u32,
    max_attempts: u32,
    tried_backend_index: usize,
    last_failure: LastFailure,
    has_fallen_back: bool,
    probes_run: u32,
}

impl NegotiationState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            tried_backend_index: 0,
            last_failure: LastFailure::None,
            has_fallen_back: false,
            probes_run: 0,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn tried_backend_index(&self) -> usize {
        self.tried_backend_index
    }

    pub fn last_failure(&self) -> LastFailure {
        self.last_failure
    }

    pub fn has_fallen_back(&self) -> bool {
        self.has_fallen_back
    }

    fn can_spend_attempt(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    fn spend_attempt(&mut self) {
        debug_assert!(self.can_spend_attempt());
        self.attempt_count += 1;
    }
}

/// Tunables for a negotiation session
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    pub max_attempts: u32,
    /// Delay before re-initializing after a failed init callback
    pub retry_delay: Duration,
    /// Delay before re-initializing after the constructor itself failed
    pub construct_retry_delay: Duration,
    /// Allow the trial utterance on the first probe
    pub trial_utterance: bool,
    pub probe: CapabilityProbe,
    /// Rate applied once a backend is ready (1.0 = normal)
    pub rate: f32,
    /// Pitch applied once a backend is ready (1.0 = normal)
    pub pitch: f32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            construct_retry_delay: Duration::from_millis(1000),
            trial_utterance: true,
            probe: CapabilityProbe::new(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Backend handed to the caller when negotiation succeeds
pub struct ReadyBackend {
    pub descriptor: BackendDescriptor,
    pub signal: ProbeSignal,
    pub backend: Box<dyn SpeechBackend>,
}

impl fmt::Debug for ReadyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyBackend")
            .field("descriptor", &self.descriptor)
            .field("signal", &self.signal)
            .finish()
    }
}

/// Terminal result of a session
#[derive(Debug)]
pub enum Outcome {
    Ready(ReadyBackend),
    Failed(FailureReason),
}

struct ActiveBackend {
    instance: InstanceId,
    descriptor: BackendDescriptor,
    backend: Box<dyn SpeechBackend>,
}

/// The negotiation state machine
pub struct Negotiator<F: BackendFactory> {
    factory: F,
    enumerator: BackendEnumerator,
    config: NegotiationConfig,
    phase: Phase,
    state: NegotiationState,
    target: Option<LanguageTag>,
    backends: Vec<BackendDescriptor>,
    active: Option<ActiveBackend>,
    next_instance: u64,
    tx: Sender<BackendEvent>,
    rx: Receiver<BackendEvent>,
    /// Pending retry timers: (due, instance that failed)
    scheduled: Vec<(Instant, InstanceId)>,
    outcome: Option<Outcome>,
}

impl<F: BackendFactory> Negotiator<F> {
    pub fn new(factory: F, enumerator: BackendEnumerator, config: NegotiationConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let state = NegotiationState::new(config.max_attempts);
        Self {
            factory,
            enumerator,
            config,
            phase: Phase::Idle,
            state,
            target: None,
            backends: Vec::new(),
            active: None,
            next_instance: 1,
            tx,
            rx,
            scheduled: Vec::new(),
            outcome: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    /// True between `negotiate` and a terminal phase
    pub fn in_progress(&self) -> bool {
        matches!(
            self.phase,
            Phase::Initializing { .. } | Phase::Probing { .. } | Phase::Retrying { .. } | Phase::FallingBack
        )
    }

    /// Instance id of the backend currently being negotiated
    pub fn current_instance(&self) -> Option<InstanceId> {
        self.active.as_ref().map(|a| a.instance)
    }

    /// Backends enumerated for the current session
    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    /// Start a session for `target`
    ///
    /// Rejected with [`XtalkError::NegotiationInProgress`] while a session
    /// is running. The outcome arrives through [`poll`](Self::poll).
    pub fn negotiate(&mut self, target: LanguageTag) -> Result<()> {
        if self.in_progress() {
            warn!("Negotiation already in progress, ignoring request for {}", target);
            return Err(XtalkError::NegotiationInProgress);
        }

        info!("Negotiating a speech backend for {}", target);
        self.release_backend();
        self.scheduled.clear();
        self.outcome = None;
        self.state = NegotiationState::new(self.config.max_attempts);
        self.target = Some(target);

        self.backends = self.enumerator.list_backends();
        if self.backends.is_empty() {
            warn!("No speech backend available on this host");
            self.fail(FailureReason::InitError);
            return Ok(());
        }

        self.initialize();
        Ok(())
    }

    /// Abandon the current session and return to idle
    pub fn cancel(&mut self) {
        if self.in_progress() {
            info!("Negotiation cancelled");
        }
        self.release_backend();
        self.scheduled.clear();
        self.outcome = None;
        self.phase = Phase::Idle;
    }

    /// Handle one backend callback
    pub fn handle_event(&mut self, event: BackendEvent) -> Option<Outcome> {
        let current = match self.phase {
            Phase::Initializing { instance } => instance,
            _ => {
                debug!("Ignoring {:?} from {} in phase {:?}", event.status, event.instance, self.phase);
                return self.outcome.take();
            }
        };
        if event.instance != current {
            debug!("Ignoring stale callback from {} (current {})", event.instance, current);
            return self.outcome.take();
        }

        match event.status {
            InitStatus::Success => self.probe_current(current),
            InitStatus::Error(reason) => {
                warn!("Backend {} failed to initialize: {}", current, reason);
                self.init_failed(current, self.config.retry_delay);
            }
        }
        self.outcome.take()
    }

    /// Fire retry timers that are due at `now`
    pub fn run_scheduled(&mut self, now: Instant) -> Option<Outcome> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.scheduled.len() {
            if now >= self.scheduled[i].0 {
                due.push(self.scheduled.remove(i).1);
            } else {
                i += 1;
            }
        }

        for instance in due {
            if self.phase == (Phase::Retrying { instance }) {
                info!(
                    "Retrying backend initialization (attempt {}/{})",
                    self.state.attempt_count, self.state.max_attempts
                );
                self.initialize();
            } else {
                debug!("Dropping stale retry timer for {}", instance);
            }
        }
        self.outcome.take()
    }

    /// Time until the next retry timer, if any
    pub fn time_until_next_scheduled(&self) -> Option<Duration> {
        let now = Instant::now();
        let next = self.scheduled.iter().map(|(when, _)| *when).min()?;
        Some(next.saturating_duration_since(now))
    }

    /// Process queued callbacks and due timers
    pub fn poll(&mut self, now: Instant) -> Option<Outcome> {
        if let Some(outcome) = self.outcome.take() {
            return Some(outcome);
        }
        while let Ok(event) = self.rx.try_recv() {
            if let Some(outcome) = self.handle_event(event) {
                return Some(outcome);
            }
        }
        self.run_scheduled(now)
    }

    /// Block until the session ends or `timeout` passes
    ///
    /// Returns None on timeout or when no session is running.
    pub fn wait_for_outcome(&mut self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.poll(Instant::now()) {
                return Some(outcome);
            }
            if !self.in_progress() {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Timed out waiting for speech negotiation");
                return None;
            }
            let mut wait = deadline - now;
            if let Some(next) = self.time_until_next_scheduled() {
                wait = wait.min(next);
            }

            match self.rx.recv_timeout(wait) {
                Ok(event) => {
                    if let Some(outcome) = self.handle_event(event) {
                        return Some(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // We hold a sender ourselves, so this cannot happen
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Construct the backend at `tried_backend_index`
    fn initialize(&mut self) {
        self.release_backend();

        let Some(descriptor) = self.backends.get(self.state.tried_backend_index).cloned() else {
            self.fail(FailureReason::NotSupported);
            return;
        };

        let instance = InstanceId(self.next_instance);
        self.next_instance += 1;
        self.phase = Phase::Initializing { instance };
        info!(
            "Initializing {} as {} (attempt {}/{})",
            descriptor.identifier, instance, self.state.attempt_count, self.state.max_attempts
        );

        let notifier = InitNotifier::new(instance, self.tx.clone());
        match self.factory.create(&descriptor, notifier) {
            Ok(backend) => {
                self.active = Some(ActiveBackend {
                    instance,
                    descriptor,
                    backend,
                });
            }
            Err(e) => {
                warn!("Constructing {} failed: {}", descriptor.identifier, e);
                self.init_failed(instance, self.config.construct_retry_delay);
            }
        }
    }

    fn init_failed(&mut self, instance: InstanceId, delay: Duration) {
        self.state.last_failure = LastFailure::BackendInitError;
        self.release_backend();

        if self.state.can_spend_attempt() {
            self.state.spend_attempt();
            info!(
                "Scheduling retry in {:?} ({}/{})",
                delay, self.state.attempt_count, self.state.max_attempts
            );
            self.phase = Phase::Retrying { instance };
            self.scheduled.push((Instant::now() + delay, instance));
        } else {
            error!("Reached {} attempts, giving up", self.state.max_attempts);
            self.fail(FailureReason::InitError);
        }
    }

    fn probe_current(&mut self, instance: InstanceId) {
        let Some(target) = self.target.clone() else {
            self.fail(FailureReason::InitError);
            return;
        };
        let Some(active) = self.active.as_mut() else {
            self.init_failed(instance, self.config.retry_delay);
            return;
        };

        self.phase = Phase::Probing { instance };
        let allow_trial = self.config.trial_utterance && self.state.probes_run == 0;
        self.state.probes_run += 1;

        let result = self.config.probe.probe(active.backend.as_mut(), &target, allow_trial);
        match (result.supported, result.signal, result.failure) {
            (true, Some(signal), _) => self.become_ready(signal),
            (_, _, Some(LanguageFailure::MissingData)) => {
                self.state.last_failure = LastFailure::LanguageMissingData;
                self.fail(FailureReason::MissingLanguageData);
            }
            _ => self.not_supported(),
        }
    }

    fn not_supported(&mut self) {
        self.state.last_failure = LastFailure::LanguageNotSupported;

        if self.state.has_fallen_back {
            info!("Fallback backend does not support the language either");
            self.fail(FailureReason::NotSupported);
            return;
        }

        self.backends = self.enumerator.list_backends();
        if self.backends.len() > 1 && self.state.can_spend_attempt() {
            self.state.has_fallen_back = true;
            self.state.tried_backend_index += 1;
            self.fall_back();
        } else {
            info!(
                "No fallback possible ({} backend(s), attempt {}/{})",
                self.backends.len(),
                self.state.attempt_count,
                self.state.max_attempts
            );
            self.fail(FailureReason::NotSupported);
        }
    }

    fn fall_back(&mut self) {
        self.phase = Phase::FallingBack;
        self.release_backend();

        if self.state.tried_backend_index >= self.backends.len() {
            info!("Tried every enumerated backend");
            self.fail(FailureReason::NotSupported);
            return;
        }
        // not_supported only falls back with an attempt to spare
        debug_assert!(self.state.can_spend_attempt());
        self.state.spend_attempt();
        info!(
            "Falling back to {} ({}/{})",
            self.backends[self.state.tried_backend_index].identifier,
            self.state.attempt_count,
            self.state.max_attempts
        );
        self.initialize();
    }

    fn become_ready(&mut self, signal: ProbeSignal) {
        self.scheduled.clear();
        let Some(mut active) = self.active.take() else {
            self.fail(FailureReason::InitError);
            return;
        };

        if let Err(e) = active.backend.set_rate(self.config.rate) {
            warn!("Could not set baseline rate: {}", e);
        }
        if let Err(e) = active.backend.set_pitch(self.config.pitch) {
            warn!("Could not set baseline pitch: {}", e);
        }

        self.state.attempt_count = 0;
        self.state.has_fallen_back = false;
        self.state.last_failure = LastFailure::None;
        self.phase = Phase::Ready;
        info!("Speech ready on {} ({:?})", active.descriptor.identifier, signal);

        self.outcome = Some(Outcome::Ready(ReadyBackend {
            descriptor: active.descriptor,
            signal,
            backend: active.backend,
        }));
    }

    fn fail(&mut self, reason: FailureReason) {
        self.release_backend();
        self.scheduled.clear();
        self.phase = Phase::Failed(reason);
        error!("Speech negotiation failed: {}", reason);
        self.outcome = Some(Outcome::Failed(reason));
    }

    fn release_backend(&mut self) {
        if let Some(mut active) = self.active.take() {
            debug!("Releasing {} ({})", active.descriptor.identifier, active.instance);
            active.backend.shutdown();
        }
    }
}

impl<F: BackendFactory> Drop for Negotiator<F> {
    fn drop(&mut self) {
        self.release_backend();
    }
}
