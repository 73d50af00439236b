//! Speech backend negotiation and sentence playback

pub mod backends;
pub mod composer;
pub mod enumerate;
pub mod language;
pub mod negotiator;
pub mod probe;
pub mod synth;

pub use composer::SentenceComposer;
pub use enumerate::{BackendDescriptor, BackendEnumerator, BackendSource, DiscoveryChannel, StaticChannel};
pub use language::{LanguageAvailability, LanguageTag};
pub use negotiator::{FailureReason, NegotiationConfig, Negotiator, Outcome, Phase, ReadyBackend};
pub use probe::{CapabilityProbe, ProbeResult, ProbeSignal};
pub use synth::{
    BackendEvent, BackendFactory, HostBackendFactory, InitNotifier, InitStatus, InstanceId, SpeechBackend,
};
