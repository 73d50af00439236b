//! Negotiation state machine tests
//!
//! Drives the negotiator against scripted engines that count how often
//! they are constructed and how many instances are alive at once.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use xtalk::speech::enumerate::{BackendDescriptor, BackendEnumerator, BackendSource, StaticChannel};
use xtalk::speech::negotiator::{FailureReason, NegotiationConfig, Negotiator, Outcome, Phase};
use xtalk::speech::probe::ProbeSignal;
use xtalk::speech::synth::{
    BackendEvent, BackendFactory, InitNotifier, InitStatus, SpeechBackend,
};
use xtalk::speech::{LanguageAvailability, LanguageTag};
use xtalk::{Result, XtalkError};

/// How a scripted engine behaves
#[derive(Debug, Clone, Default)]
struct Script {
    /// First N constructions return Err
    construct_errors: u32,
    /// Next N constructions report a failed init
    init_failures: u32,
    /// Tags answered as available by the availability query
    available: Vec<&'static str>,
    /// Tags accepted by set_language
    settable: Vec<&'static str>,
    /// Language known but data missing
    missing_data: bool,
    /// Trial utterance succeeds
    speaks: bool,
}

impl Script {
    fn speaks_zh() -> Self {
        Self {
            available: vec!["zh-CN"],
            ..Default::default()
        }
    }

    fn mute() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct EngineLog {
    constructions: HashMap<String, u32>,
    order: Vec<String>,
    live: i32,
    max_live: i32,
    spoken: Vec<String>,
    /// Init notifiers held back in deferred mode
    pending: Vec<InitNotifier>,
}

impl EngineLog {
    fn constructed(&self, id: &str) -> u32 {
        self.constructions.get(id).copied().unwrap_or(0)
    }

    fn total(&self) -> u32 {
        self.constructions.values().sum()
    }
}

type SharedLog = Arc<Mutex<EngineLog>>;

struct ScriptedFactory {
    scripts: HashMap<String, Script>,
    log: SharedLog,
    /// Hold init notifiers instead of reporting right away
    deferred: bool,
}

impl BackendFactory for ScriptedFactory {
    fn create(
        &mut self,
        descriptor: &BackendDescriptor,
        notifier: InitNotifier,
    ) -> Result<Box<dyn SpeechBackend>> {
        let id = descriptor.identifier.clone();
        let script = self
            .scripts
            .get(&id)
            .cloned()
            .ok_or_else(|| XtalkError::UnknownBackend(id.clone()))?;

        let mut log = self.log.lock().unwrap();
        let n = {
            let count = log.constructions.entry(id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        log.order.push(id.clone());

        if n <= script.construct_errors {
            return Err(XtalkError::Speech(format!("{} cannot start", id)));
        }

        log.live += 1;
        log.max_live = log.max_live.max(log.live);

        let fails = n - script.construct_errors <= script.init_failures;
        if self.deferred {
            log.pending.push(notifier);
        } else if fails {
            notifier.failed("engine crashed");
        } else {
            notifier.ready();
        }

        Ok(Box::new(ScriptedBackend {
            id,
            script,
            log: Arc::clone(&self.log),
            released: false,
        }))
    }
}

struct ScriptedBackend {
    id: String,
    script: Script,
    log: SharedLog,
    released: bool,
}

impl SpeechBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_language_available(&self, language: &str) -> Result<LanguageAvailability> {
        if self.script.missing_data {
            return Ok(LanguageAvailability::MissingData);
        }
        if self.script.available.contains(&language) {
            return Ok(LanguageAvailability::CountryAvailable);
        }
        Ok(LanguageAvailability::NotSupported)
    }

    fn set_language(&mut self, language: &str) -> Result<LanguageAvailability> {
        if self.script.settable.contains(&language) || self.script.available.contains(&language) {
            return Ok(LanguageAvailability::Available);
        }
        if self.script.missing_data {
            return Ok(LanguageAvailability::MissingData);
        }
        Ok(LanguageAvailability::NotSupported)
    }

    fn speak(&mut self, text: &str, _interrupt: bool) -> Result<()> {
        self.log.lock().unwrap().spoken.push(text.to_string());
        if self.script.speaks {
            Ok(())
        } else {
            Err(XtalkError::Speech("no audio".into()))
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

    fn shutdown(&mut self) {
        assert!(!self.released, "{} shut down twice", self.id);
        self.released = true;
        self.log.lock().unwrap().live -= 1;
    }
}

fn fast_config() -> NegotiationConfig {
    NegotiationConfig {
        retry_delay: Duration::ZERO,
        construct_retry_delay: Duration::ZERO,
        ..NegotiationConfig::default()
    }
}

fn negotiator_with(
    engines: Vec<(&str, Script)>,
    config: NegotiationConfig,
    deferred: bool,
) -> (Negotiator<ScriptedFactory>, SharedLog) {
    let log: SharedLog = Arc::default();
    let ids: Vec<String> = engines.iter().map(|(id, _)| id.to_string()).collect();
    let scripts = engines
        .into_iter()
        .map(|(id, script)| (id.to_string(), script))
        .collect();
    let factory = ScriptedFactory {
        scripts,
        log: Arc::clone(&log),
        deferred,
    };
    let enumerator = BackendEnumerator::new(vec![Box::new(StaticChannel::new(
        BackendSource::KnownDefault,
        ids,
    ))]);
    (Negotiator::new(factory, enumerator, config), log)
}

fn zh() -> LanguageTag {
    LanguageTag::parse("zh").unwrap()
}

fn run(engines: Vec<(&str, Script)>) -> (Outcome, Negotiator<ScriptedFactory>, SharedLog) {
    let (mut negotiator, log) = negotiator_with(engines, fast_config(), false);
    negotiator.negotiate(zh()).unwrap();
    let outcome = negotiator
        .wait_for_outcome(Duration::from_secs(5))
        .expect("negotiation should settle");
    (outcome, negotiator, log)
}

fn failure(outcome: &Outcome) -> Option<FailureReason> {
    match outcome {
        Outcome::Failed(reason) => Some(*reason),
        Outcome::Ready(_) => None,
    }
}

#[test]
fn test_ready_through_availability_check() {
    let (outcome, negotiator, log) = run(vec![("alpha", Script::speaks_zh())]);

    match outcome {
        Outcome::Ready(ready) => {
            assert_eq!(ready.descriptor.identifier, "alpha");
            assert_eq!(ready.signal, ProbeSignal::AvailabilityCheck);
        }
        Outcome::Failed(reason) => panic!("expected ready, got {}", reason),
    }
    assert_eq!(negotiator.phase(), Phase::Ready);
    assert!(!negotiator.in_progress());
    assert_eq!(log.lock().unwrap().total(), 1);
}

#[test]
fn test_direct_set_rescues_refusing_engine() {
    let script = Script {
        settable: vec!["zh-CN"],
        ..Default::default()
    };
    let (outcome, _, _) = run(vec![("alpha", script)]);
    match outcome {
        Outcome::Ready(ready) => assert_eq!(ready.signal, ProbeSignal::DirectSetAttempt),
        Outcome::Failed(reason) => panic!("expected ready, got {}", reason),
    }
}

#[test]
fn test_trial_utterance_overrides_refusals() {
    let script = Script {
        speaks: true,
        ..Default::default()
    };
    let (outcome, _, log) = run(vec![("alpha", script)]);

    match outcome {
        Outcome::Ready(ready) => assert_eq!(ready.signal, ProbeSignal::TrialUtteranceSuccess),
        Outcome::Failed(reason) => panic!("expected ready, got {}", reason),
    }
    assert_eq!(log.lock().unwrap().spoken, vec!["测试语音播放"]);
}

#[test]
fn test_trial_utterance_can_be_disabled() {
    let script = Script {
        speaks: true,
        ..Default::default()
    };
    let config = NegotiationConfig {
        trial_utterance: false,
        ..fast_config()
    };
    let (mut negotiator, log) = negotiator_with(vec![("alpha", script)], config, false);
    negotiator.negotiate(zh()).unwrap();
    let outcome = negotiator.wait_for_outcome(Duration::from_secs(5)).unwrap();

    assert_eq!(failure(&outcome), Some(FailureReason::NotSupported));
    assert!(log.lock().unwrap().spoken.is_empty());
}

#[test]
fn test_trial_utterance_only_on_first_probe() {
    // alpha refuses and cannot speak; beta refuses but would "speak"
    let beta = Script {
        speaks: true,
        ..Default::default()
    };
    let (outcome, _, log) = run(vec![("alpha", Script::mute()), ("beta", beta)]);

    assert_eq!(failure(&outcome), Some(FailureReason::NotSupported));
    let log = log.lock().unwrap();
    assert_eq!(log.spoken.len(), 1);
    assert_eq!(log.constructed("beta"), 1);
}

#[test]
fn test_single_unsupported_backend_does_not_fall_back() {
    let (outcome, negotiator, log) = run(vec![("alpha", Script::mute())]);

    assert_eq!(failure(&outcome), Some(FailureReason::NotSupported));
    assert_eq!(negotiator.phase(), Phase::Failed(FailureReason::NotSupported));
    assert!(!negotiator.state().has_fallen_back());
    assert_eq!(log.lock().unwrap().total(), 1);
}

#[test]
fn test_missing_data_after_fallback() {
    let beta = Script {
        missing_data: true,
        ..Default::default()
    };
    let (outcome, _, log) = run(vec![
        ("alpha", Script::mute()),
        ("beta", beta),
        ("gamma", Script::speaks_zh()),
    ]);

    assert_eq!(failure(&outcome), Some(FailureReason::MissingLanguageData));
    let log = log.lock().unwrap();
    assert_eq!(log.total(), 2);
    assert_eq!(log.order, vec!["alpha", "beta"]);
    assert_eq!(log.constructed("gamma"), 0);
}

#[test]
fn test_second_unsupported_backend_is_terminal() {
    let (outcome, _, log) = run(vec![
        ("alpha", Script::mute()),
        ("beta", Script::mute()),
        ("gamma", Script::speaks_zh()),
    ]);

    assert_eq!(failure(&outcome), Some(FailureReason::NotSupported));
    assert_eq!(log.lock().unwrap().constructed("gamma"), 0);
}

#[test]
fn test_fallback_reaches_working_backend() {
    let (outcome, negotiator, log) = run(vec![("alpha", Script::mute()), ("beta", Script::speaks_zh())]);

    match outcome {
        Outcome::Ready(ready) => assert_eq!(ready.descriptor.identifier, "beta"),
        Outcome::Failed(reason) => panic!("expected ready, got {}", reason),
    }
    assert_eq!(negotiator.state().attempt_count(), 0);
    assert_eq!(log.lock().unwrap().total(), 2);
}

#[test]
fn test_init_retries_then_ready() {
    let script = Script {
        init_failures: 2,
        ..Script::speaks_zh()
    };
    let (outcome, negotiator, log) = run(vec![("alpha", script)]);

    assert!(matches!(outcome, Outcome::Ready(_)));
    assert_eq!(negotiator.state().attempt_count(), 0);
    assert_eq!(log.lock().unwrap().constructed("alpha"), 3);
}

#[test]
fn test_init_failures_past_bound() {
    let script = Script {
        init_failures: 10,
        ..Script::speaks_zh()
    };
    let (outcome, negotiator, log) = run(vec![("alpha", script)]);

    assert_eq!(failure(&outcome), Some(FailureReason::InitError));
    assert_eq!(negotiator.state().attempt_count(), 3);
    // First try plus one retry per attempt
    assert_eq!(log.lock().unwrap().constructed("alpha"), 4);
}

#[test]
fn test_constructor_error_is_retried() {
    let script = Script {
        construct_errors: 1,
        ..Script::speaks_zh()
    };
    let (outcome, _, log) = run(vec![("alpha", script)]);

    assert!(matches!(outcome, Outcome::Ready(_)));
    assert_eq!(log.lock().unwrap().constructed("alpha"), 2);
}

#[test]
fn test_fallback_with_no_attempts_left() {
    let alpha = Script {
        init_failures: 3,
        ..Script::mute()
    };
    let (outcome, negotiator, log) = run(vec![("alpha", alpha), ("beta", Script::speaks_zh())]);

    // Three retries use up every attempt before alpha finally answers "not supported"
    assert_eq!(failure(&outcome), Some(FailureReason::NotSupported));
    assert_eq!(negotiator.state().attempt_count(), 3);
    assert_eq!(log.lock().unwrap().constructed("beta"), 0);
}

#[test]
fn test_empty_enumeration_fails() {
    let (outcome, _, log) = run(Vec::new());
    assert_eq!(failure(&outcome), Some(FailureReason::InitError));
    assert_eq!(log.lock().unwrap().total(), 0);
}

#[test]
fn test_negotiate_while_busy_is_rejected() {
    let (mut negotiator, log) = negotiator_with(vec![("alpha", Script::speaks_zh())], fast_config(), true);
    negotiator.negotiate(zh()).unwrap();
    assert!(negotiator.in_progress());

    match negotiator.negotiate(zh()) {
        Err(XtalkError::NegotiationInProgress) => {}
        other => panic!("expected NegotiationInProgress, got {:?}", other.map(|_| ())),
    }
    assert_eq!(log.lock().unwrap().total(), 1);

    let notifier = log.lock().unwrap().pending.pop().unwrap();
    notifier.ready();
    assert!(matches!(
        negotiator.wait_for_outcome(Duration::from_secs(5)),
        Some(Outcome::Ready(_))
    ));
}

#[test]
fn test_stale_callback_is_ignored() {
    let (mut negotiator, log) = negotiator_with(
        vec![("alpha", Script::mute()), ("beta", Script::speaks_zh())],
        fast_config(),
        true,
    );
    negotiator.negotiate(zh()).unwrap();
    let alpha = negotiator.current_instance().unwrap();

    // alpha comes up, cannot speak zh, negotiator moves on to beta
    let notifier = log.lock().unwrap().pending.pop().unwrap();
    notifier.ready();
    assert!(negotiator.poll(Instant::now()).is_none());
    let beta = negotiator.current_instance().unwrap();
    assert_ne!(alpha, beta);
    assert_eq!(negotiator.phase(), Phase::Initializing { instance: beta });

    // A late failure report from alpha changes nothing
    let stale = BackendEvent {
        instance: alpha,
        status: InitStatus::Error("late".into()),
    };
    assert!(negotiator.handle_event(stale).is_none());
    assert_eq!(negotiator.phase(), Phase::Initializing { instance: beta });

    // So does a late success from alpha: no probe, no new construction
    let constructed = log.lock().unwrap().total();
    let stale = BackendEvent {
        instance: alpha,
        status: InitStatus::Success,
    };
    assert!(negotiator.handle_event(stale).is_none());
    assert_eq!(negotiator.phase(), Phase::Initializing { instance: beta });
    assert_eq!(negotiator.current_instance(), Some(beta));
    assert_eq!(negotiator.state().attempt_count(), 1);
    assert_eq!(log.lock().unwrap().total(), constructed);

    let notifier = log.lock().unwrap().pending.pop().unwrap();
    notifier.ready();
    match negotiator.wait_for_outcome(Duration::from_secs(5)) {
        Some(Outcome::Ready(ready)) => assert_eq!(ready.descriptor.identifier, "beta"),
        other => panic!("expected beta ready, got {:?}", other),
    }
    assert_eq!(log.lock().unwrap().max_live, 1);
}

#[test]
fn test_stale_timer_after_cancel_is_noop() {
    let script = Script {
        init_failures: 1,
        ..Script::speaks_zh()
    };
    let config = NegotiationConfig {
        retry_delay: Duration::from_secs(60),
        ..fast_config()
    };
    let (mut negotiator, log) = negotiator_with(vec![("alpha", script)], config, false);
    negotiator.negotiate(zh()).unwrap();
    assert!(negotiator.poll(Instant::now()).is_none());
    assert!(matches!(negotiator.phase(), Phase::Retrying { .. }));
    assert!(negotiator.time_until_next_scheduled().is_some());

    negotiator.cancel();
    assert_eq!(negotiator.phase(), Phase::Idle);
    assert!(negotiator
        .run_scheduled(Instant::now() + Duration::from_secs(120))
        .is_none());
    assert_eq!(negotiator.phase(), Phase::Idle);
    let log = log.lock().unwrap();
    assert_eq!(log.constructed("alpha"), 1);
    assert_eq!(log.live, 0);
}

#[test]
fn test_timers_after_terminal_state_are_noops() {
    let (outcome, mut negotiator, log) = run(vec![("alpha", Script::mute())]);
    assert!(failure(&outcome).is_some());

    assert!(negotiator
        .run_scheduled(Instant::now() + Duration::from_secs(3600))
        .is_none());
    assert!(negotiator.poll(Instant::now()).is_none());
    assert_eq!(negotiator.phase(), Phase::Failed(FailureReason::NotSupported));
    assert_eq!(log.lock().unwrap().total(), 1);
}

#[test]
fn test_renegotiate_after_failure_starts_fresh() {
    let (outcome, mut negotiator, log) = run(vec![("alpha", Script::mute())]);
    assert!(failure(&outcome).is_some());

    negotiator.negotiate(zh()).unwrap();
    let outcome = negotiator.wait_for_outcome(Duration::from_secs(5)).unwrap();
    assert_eq!(failure(&outcome), Some(FailureReason::NotSupported));
    assert_eq!(log.lock().unwrap().constructed("alpha"), 2);
}

#[test]
fn test_failed_backends_are_released() {
    let (_, _, log) = run(vec![
        ("alpha", Script::mute()),
        (
            "beta",
            Script {
                missing_data: true,
                ..Default::default()
            },
        ),
    ]);
    let log = log.lock().unwrap();
    assert_eq!(log.live, 0);
    assert_eq!(log.max_live, 1);
}

fn script_strategy() -> impl Strategy<Value = Script> {
    (0u32..3, 0u32..5, any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(construct_errors, init_failures, supported, missing_data, speaks)| Script {
            construct_errors,
            init_failures,
            available: if supported { vec!["zh-CN"] } else { Vec::new() },
            settable: Vec::new(),
            missing_data,
            speaks,
        },
    )
}

proptest! {
    #[test]
    fn prop_attempts_stay_within_bound(
        scripts in prop::collection::vec(script_strategy(), 0..4),
        max_attempts in 1u32..5,
    ) {
        let names = ["alpha", "beta", "gamma", "delta"];
        let engines: Vec<(&str, Script)> = names.iter().copied().zip(scripts).collect();
        let config = NegotiationConfig { max_attempts, ..fast_config() };
        let (mut negotiator, log) = negotiator_with(engines, config, false);

        negotiator.negotiate(zh()).unwrap();
        let mut outcome = None;
        for _ in 0..1000 {
            prop_assert!(negotiator.state().attempt_count() <= max_attempts);
            if let Some(o) = negotiator.poll(Instant::now()) {
                outcome = Some(o);
                break;
            }
        }

        prop_assert!(outcome.is_some(), "negotiation never settled");
        prop_assert!(negotiator.phase().is_terminal());
        let log = log.lock().unwrap();
        prop_assert!(log.max_live <= 1);
        prop_assert!(log.total() <= max_attempts + 1);
    }
}
