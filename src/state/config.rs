//! Configuration management

use crate::speech::negotiator::NegotiationConfig;
use crate::speech::probe::CapabilityProbe;
use crate::speech::LanguageTag;
use crate::{Result, XtalkError};
use ini::Ini;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
///
/// Backed by an INI file (`~/.xtalk.cfg`) holding speech, negotiation,
/// engine and phrase store settings.
pub struct Config {
    /// INI configuration storage
    ini: Ini,

    /// Config file path
    path: PathBuf,
}

impl Config {
    /// Load configuration from disk or create default
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific file, creating it if missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Loading config from {:?}", path);

        let ini = if path.exists() {
            Ini::load_from_file(&path)
                .map_err(|e| XtalkError::IniParse(format!("Failed to load config: {}", e)))?
        } else {
            info!("Config file not found, creating default");
            let default = Self::default_config();
            default
                .write_to_file(&path)
                .map_err(|e| XtalkError::IniParse(format!("Failed to write config: {}", e)))?;
            default
        };

        Ok(Self { ini, path })
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        debug!("Saving config to {:?}", self.path);
        self.ini
            .write_to_file(&self.path)
            .map_err(|e| XtalkError::Config(format!("Failed to save config: {}", e)))
    }

    /// Get config file path (~/.xtalk.cfg)
    fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".xtalk.cfg")
    }

    /// Expose the config file path for display
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Create default configuration
    fn default_config() -> Ini {
        let mut ini = Ini::new();

        ini.with_section(Some("speech"))
            .set("language", "zh-CN")
            .set("rate", "1.1")
            .set("pitch", "1.0")
            .set("trial_utterance", "true");

        ini.with_section(Some("negotiation"))
            .set("max_attempts", "3")
            .set("retry_delay_ms", "2000")
            .set("construct_retry_delay_ms", "1000");

        ini.with_section(Some("engines"))
            .set("extra", "")
            .set("disabled", "");

        ini.with_section(Some("store"));

        ini
    }

    /// Get a boolean value from config
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Get a string value from config
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.ini
            .get_from(Some(section), key)
            .unwrap_or(default)
            .to_string()
    }

    /// Get an integer value from config
    pub fn get_int(&self, section: &str, key: &str, default: i32) -> i32 {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Set a value in config
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.ini.with_section(Some(section)).set(key, value);
    }

    /// Get a float value from config
    pub fn get_float(&self, section: &str, key: &str, default: f32) -> f32 {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Comma-separated list, blanks dropped
    fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get_string(section, key, "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn get_millis(&self, section: &str, key: &str, default: u64) -> Duration {
        let ms = self.get_int(section, key, default as i32);
        match u64::try_from(ms) {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!("Negative {}.{} in config, using {}ms", section, key, default);
                Duration::from_millis(default)
            }
        }
    }

    /// Target language; falls back to zh-CN when the tag does not parse
    pub fn language(&self) -> LanguageTag {
        let raw = self.get_string("speech", "language", "zh-CN");
        LanguageTag::parse(&raw).unwrap_or_else(|| {
            warn!("Invalid language {:?} in config, using zh-CN", raw);
            LanguageTag::new("zh", Some("CN"))
        })
    }

    /// Speaking rate for sentences (1.0 = normal)
    pub fn rate(&self) -> f32 {
        self.get_float("speech", "rate", 1.1).clamp(0.1, 4.0)
    }

    /// Speaking pitch for sentences (1.0 = normal)
    pub fn pitch(&self) -> f32 {
        self.get_float("speech", "pitch", 1.0).clamp(0.1, 4.0)
    }

    /// Whether the probe may speak a trial sentence
    pub fn trial_utterance(&self) -> bool {
        self.get_bool("speech", "trial_utterance", true)
    }

    /// Custom trial sentence, if configured
    pub fn trial_text(&self) -> Option<String> {
        self.ini
            .get_from(Some("speech"), "trial_text")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Attempt ceiling per negotiation session (at least 1)
    pub fn max_attempts(&self) -> u32 {
        self.get_int("negotiation", "max_attempts", 3).max(1) as u32
    }

    /// Delay before retrying after a failed init callback
    pub fn retry_delay(&self) -> Duration {
        self.get_millis("negotiation", "retry_delay_ms", 2000)
    }

    /// Delay before retrying after the engine could not be constructed
    pub fn construct_retry_delay(&self) -> Duration {
        self.get_millis("negotiation", "construct_retry_delay_ms", 1000)
    }

    /// Engine ids to try after the discovered ones
    pub fn extra_engines(&self) -> Vec<String> {
        self.get_list("engines", "extra")
    }

    /// Engine ids never to use
    pub fn disabled_engines(&self) -> Vec<String> {
        self.get_list("engines", "disabled")
    }

    /// Phrase store file (~/.xtalk/phrases.json by default)
    pub fn store_path(&self) -> PathBuf {
        match self.ini.get_from(Some("store"), "path").map(str::trim) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".xtalk")
                .join("phrases.json"),
        }
    }

    /// Negotiation settings derived from this config
    pub fn negotiation_config(&self) -> NegotiationConfig {
        let probe = match self.trial_text() {
            Some(text) => CapabilityProbe::with_trial_text(text),
            None => CapabilityProbe::new(),
        };
        NegotiationConfig {
            max_attempts: self.max_attempts(),
            retry_delay: self.retry_delay(),
            construct_retry_delay: self.construct_retry_delay(),
            trial_utterance: self.trial_utterance(),
            probe,
            ..NegotiationConfig::default()
        }
    }
}
