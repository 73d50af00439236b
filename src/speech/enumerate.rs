//! Backend discovery
//!
//! Speech engines register themselves in different places depending on
//! how they were installed, so discovery runs several independent channels
//! and merges their answers into one ordered, de-duplicated list.

use crate::platform::command_output;
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Where a backend identifier was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSource {
    /// Reported by a running speech service
    ServiceQuery,
    /// Found through installed voice data
    ActivityQuery,
    /// Reported by the speech runtime linked into this program
    RuntimeEnumeration,
    /// Well-known engine found on this host
    KnownDefault,
}

/// A candidate speech backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub identifier: String,
    pub source: BackendSource,
}

impl BackendDescriptor {
    pub fn new(identifier: impl Into<String>, source: BackendSource) -> Self {
        Self {
            identifier: identifier.into(),
            source,
        }
    }
}

/// One way of finding speech backends
///
/// Channels never fail: a channel that cannot answer returns nothing.
pub trait DiscoveryChannel: Send {
    fn source(&self) -> BackendSource;

    fn discover(&self) -> Vec<String>;
}

/// Merges discovery channels into a single backend list
pub struct BackendEnumerator {
    channels: Vec<Box<dyn DiscoveryChannel>>,
    disabled: HashSet<String>,
}

impl BackendEnumerator {
    pub fn new(channels: Vec<Box<dyn DiscoveryChannel>>) -> Self {
        Self {
            channels,
            disabled: HashSet::new(),
        }
    }

    /// Channels that look for engines on this host, in priority order
    pub fn host() -> Self {
        Self::new(vec![
            Box::new(SpeechDispatcherChannel::new()),
            Box::new(VoiceDataChannel::new()),
            Box::new(RuntimeChannel),
            Box::new(KnownEnginesChannel::new()),
        ])
    }

    /// Append a channel after the existing ones
    pub fn with_channel(mut self, channel: Box<dyn DiscoveryChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Exclude identifiers from every listing
    pub fn with_disabled<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Snapshot of the backends available right now
    ///
    /// First-seen order across channels; duplicates keep their first source.
    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        let mut seen = HashSet::new();
        let mut backends = Vec::new();

        for channel in &self.channels {
            let source = channel.source();
            let found = channel.discover();
            debug!("{:?} channel found {} backend(s)", source, found.len());

            for id in found {
                let id = id.trim().to_string();
                if id.is_empty() || self.disabled.contains(&id) {
                    continue;
                }
                if seen.insert(id.clone()) {
                    backends.push(BackendDescriptor::new(id, source));
                }
            }
        }

        debug!(
            "Enumerated backends: {:?}",
            backends.iter().map(|b| b.identifier.as_str()).collect::<Vec<_>>()
        );
        backends
    }
}

/// Fixed list of identifiers, for tests and config-supplied engines
pub struct StaticChannel {
    source: BackendSource,
    ids: Vec<String>,
}

impl StaticChannel {
    pub fn new<I, S>(source: BackendSource, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl DiscoveryChannel for StaticChannel {
    fn source(&self) -> BackendSource {
        self.source
    }

    fn discover(&self) -> Vec<String> {
        self.ids.clone()
    }
}

/// Output modules of the Speech Dispatcher service (`speechd:<module>`)
pub struct SpeechDispatcherChannel {
    program: String,
}

impl SpeechDispatcherChannel {
    pub fn new() -> Self {
        Self {
            program: "spd-say".to_string(),
        }
    }

    /// Parse `spd-say -O` output: a header line followed by one module per line
    fn parse_modules(output: &str) -> Vec<String> {
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !line.eq_ignore_ascii_case("OUTPUT MODULES"))
            .filter(|line| !line.contains(' '))
            .map(|module| format!("speechd:{}", module))
            .collect()
    }
}

impl Default for SpeechDispatcherChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryChannel for SpeechDispatcherChannel {
    fn source(&self) -> BackendSource {
        BackendSource::ServiceQuery
    }

    fn discover(&self) -> Vec<String> {
        if which::which(&self.program).is_err() {
            debug!("{} not installed, skipping service query", self.program);
            return Vec::new();
        }
        match command_output(&self.program, &["-O"]) {
            Some(output) => Self::parse_modules(&output),
            None => {
                warn!("Speech Dispatcher did not list its output modules");
                Vec::new()
            }
        }
    }
}

/// Engines whose voice data is installed
pub struct VoiceDataChannel {
    roots: Vec<PathBuf>,
}

/// Voice data directory names and the engine that reads them
const VOICE_DATA_DIRS: &[(&str, &str)] = &[("espeak-ng-data", "espeak-ng"), ("espeak-data", "espeak")];

impl VoiceDataChannel {
    /// Per-user data directory first, then the usual system locations
    pub fn new() -> Self {
        let mut roots: Vec<PathBuf> = dirs::data_dir().into_iter().collect();
        roots.extend([
            PathBuf::from("/usr/share"),
            PathBuf::from("/usr/local/share"),
            PathBuf::from("/usr/lib/x86_64-linux-gnu"),
            PathBuf::from("/usr/lib/aarch64-linux-gnu"),
            PathBuf::from("/usr/lib"),
            PathBuf::from("/opt/homebrew/share"),
        ]);
        Self::with_roots(roots)
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn has_data(root: &Path, dir: &str) -> bool {
        root.join(dir).join("voices").is_dir() || root.join(dir).join("phontab").is_file()
    }
}

impl Default for VoiceDataChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryChannel for VoiceDataChannel {
    fn source(&self) -> BackendSource {
        BackendSource::ActivityQuery
    }

    fn discover(&self) -> Vec<String> {
        let mut found = Vec::new();
        for (dir, engine) in VOICE_DATA_DIRS {
            if self.roots.iter().any(|root| Self::has_data(root, dir)) {
                found.push(engine.to_string());
            }
        }
        found
    }
}

/// The platform engine the tts crate drives
pub struct RuntimeChannel;

impl DiscoveryChannel for RuntimeChannel {
    fn source(&self) -> BackendSource {
        BackendSource::RuntimeEnumeration
    }

    fn discover(&self) -> Vec<String> {
        if cfg!(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "ios",
            target_os = "windows",
            target_os = "android",
            target_arch = "wasm32"
        )) {
            vec!["native".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Well-known engines, kept only if their program is installed
pub struct KnownEnginesChannel {
    engines: Vec<String>,
}

/// Engines worth looking for even when no service reports them
pub const KNOWN_ENGINES: &[&str] = &["espeak-ng", "espeak", "spd-say"];

impl KnownEnginesChannel {
    pub fn new() -> Self {
        Self::with_engines(KNOWN_ENGINES.iter().copied())
    }

    pub fn with_engines<I, S>(engines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            engines: engines.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for KnownEnginesChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryChannel for KnownEnginesChannel {
    fn source(&self) -> BackendSource {
        BackendSource::KnownDefault
    }

    fn discover(&self) -> Vec<String> {
        self.engines
            .iter()
            .filter(|engine| which::which(engine.as_str()).is_ok())
            .cloned()
            .collect()
    }
}
