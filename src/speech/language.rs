//! Language tags and the availability levels backends report for them
//!
//! Backends disagree about how a language is spelled ("zh", "zh-CN",
//! "zh_CN", "zh-CHS"), so the probe asks for several spellings of the
//! same language in order of increasing specificity.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// How well a backend can render a requested language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageAvailability {
    /// The language is available (country may not be)
    Available,
    /// Language and country are available
    CountryAvailable,
    /// Language, country and variant are available
    CountryVariantAvailable,
    /// The language is known but its voice data is not installed
    MissingData,
    /// The language is not supported at all
    NotSupported,
}

impl LanguageAvailability {
    /// True for "available" or better
    pub fn is_available(self) -> bool {
        matches!(
            self,
            Self::Available | Self::CountryAvailable | Self::CountryVariantAvailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::CountryAvailable => "country available",
            Self::CountryVariantAvailable => "country/variant available",
            Self::MissingData => "missing data",
            Self::NotSupported => "not supported",
        }
    }
}

/// Region assumed when a bare language is requested
static DEFAULT_REGIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("zh", "CN");
    m.insert("yue", "HK");
    m.insert("ja", "JP");
    m.insert("ko", "KR");
    m.insert("en", "US");
    m.insert("es", "ES");
    m.insert("fr", "FR");
    m.insert("de", "DE");
    m.insert("it", "IT");
    m.insert("pt", "BR");
    m.insert("ru", "RU");
    m
});

/// Legacy or alternate spellings some engines still register under
static LEGACY_ALIASES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert("zh", &["zh-Hans", "zh-CHS"]);
    m.insert("yue", &["zh-HK"]);
    m.insert("he", &["iw"]);
    m.insert("id", &["in"]);
    m.insert("yi", &["ji"]);
    m.insert("nb", &["no"]);
    m
});

/// Aliases for Chinese written in Traditional characters
const TRADITIONAL_CHINESE_ALIASES: &[&str] = &["zh-Hant", "zh-CHT"];

/// Regions where Chinese defaults to Traditional characters
const TRADITIONAL_CHINESE_REGIONS: &[&str] = &["TW", "HK", "MO"];

/// Individual languages some engines list instead of their macrolanguage
static MACROLANGUAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("cmn", "zh");
    m.insert("arb", "ar");
    m.insert("nob", "nb");
    m
});

/// Short text spoken by the trial utterance check
static TRIAL_TEXTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("zh", "测试语音播放");
    m.insert("yue", "測試語音播放");
    m.insert("ja", "音声テスト");
    m.insert("ko", "음성 테스트");
    m.insert("en", "Speech test");
    m.insert("de", "Sprachtest");
    m.insert("fr", "Test vocal");
    m.insert("es", "Prueba de voz");
    m
});

/// Languages written without spaces between words
const UNSPACED_LANGUAGES: &[&str] = &["zh", "yue", "ja"];

/// A parsed language tag such as `zh`, `zh-CN` or `zh_Hans_CN`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTag {
    language: String,
    script: Option<String>,
    region: Option<String>,
}

impl LanguageTag {
    /// Build a tag from already-valid subtags
    pub fn new(language: &str, region: Option<&str>) -> Self {
        Self {
            language: language.to_ascii_lowercase(),
            script: None,
            region: region.map(str::to_ascii_uppercase),
        }
    }

    /// Parse a tag, accepting `-` or `_` separators
    ///
    /// Returns None for an empty or non-alphabetic primary subtag.
    pub fn parse(tag: &str) -> Option<Self> {
        let mut parts = tag.trim().split(['-', '_']).filter(|p| !p.is_empty());

        let language = parts.next()?;
        if !language.chars().all(|c| c.is_ascii_alphabetic()) || language.len() > 8 {
            return None;
        }

        let mut script = None;
        let mut region = None;
        for part in parts {
            if part.len() == 4 && part.chars().all(|c| c.is_ascii_alphabetic()) && script.is_none() {
                let mut s = part.to_ascii_lowercase();
                s[..1].make_ascii_uppercase();
                script = Some(s);
            } else if region.is_none()
                && ((part.len() == 2 && part.chars().all(|c| c.is_ascii_alphabetic()))
                    || (part.len() == 3 && part.chars().all(|c| c.is_ascii_digit())))
            {
                region = Some(part.to_ascii_uppercase());
            }
        }

        Some(Self {
            language: language.to_ascii_lowercase(),
            script,
            region,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Spellings to try, generic first, then region-qualified, then legacy
    pub fn variants(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |v: String| {
            if !out.iter().any(|existing| existing.eq_ignore_ascii_case(&v)) {
                out.push(v);
            }
        };

        push(self.language.clone());

        let region = self
            .region
            .clone()
            .or_else(|| DEFAULT_REGIONS.get(self.language.as_str()).map(|r| r.to_string()));
        if let Some(region) = &region {
            push(format!("{}-{}", self.language, region));
        }
        if self.script.is_some() {
            push(self.to_string());
        }

        for alias in self.legacy_aliases() {
            push(alias.to_string());
        }

        out
    }

    /// Legacy spellings for this tag; Chinese picks them by script or region
    fn legacy_aliases(&self) -> &'static [&'static str] {
        if self.language == "zh" {
            let traditional = match (&self.script, &self.region) {
                (Some(script), _) => script == "Hant",
                (None, Some(region)) => TRADITIONAL_CHINESE_REGIONS.contains(&region.as_str()),
                (None, None) => false,
            };
            if traditional {
                return TRADITIONAL_CHINESE_ALIASES;
            }
        }
        LEGACY_ALIASES.get(self.language.as_str()).copied().unwrap_or(&[])
    }

    /// Availability of this tag given the language tags of installed voices
    pub fn availability_among<'a, I>(&self, voices: I) -> LanguageAvailability
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best = LanguageAvailability::NotSupported;
        for voice in voices {
            let Some(mut voice_tag) = LanguageTag::parse(voice) else {
                continue;
            };
            if let Some(macro_lang) = MACROLANGUAGES.get(voice_tag.language.as_str()) {
                voice_tag.language = macro_lang.to_string();
            }
            if voice_tag.language != self.language && !self.is_alias_of(&voice_tag) {
                continue;
            }
            match (&self.region, &voice_tag.region) {
                (Some(want), Some(have)) if want == have => {
                    return LanguageAvailability::CountryAvailable;
                }
                _ => best = LanguageAvailability::Available,
            }
        }
        best
    }

    fn is_alias_of(&self, other: &LanguageTag) -> bool {
        let this = self.to_string();
        let other_str = other.to_string();
        other.legacy_aliases().iter().any(|a| a.eq_ignore_ascii_case(&this))
            || self.legacy_aliases().iter().any(|a| a.eq_ignore_ascii_case(&other_str))
    }

    /// True when phrases are joined without spaces in this language
    pub fn is_unspaced(&self) -> bool {
        UNSPACED_LANGUAGES.contains(&self.language.as_str())
    }

    /// Default text for the trial utterance check
    pub fn trial_text(&self) -> &'static str {
        TRIAL_TEXTS
            .get(self.language.as_str())
            .copied()
            .unwrap_or("Test")
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.language)?;
        if let Some(script) = &self.script {
            write!(f, "-{}", script)?;
        }
        if let Some(region) = &self.region {
            write!(f, "-{}", region)?;
        }
        Ok(())
    }
}
