//! eSpeak backend driving the `espeak-ng` (or classic `espeak`) command
//!
//! Each utterance runs in its own child process; a new utterance kills the
//! previous one. Language support comes from `--voices`, and a language is
//! reported as missing data when its voice is listed but the dictionary
//! file is absent from the data directory.
//!
//! Dependencies:
//! - espeak-ng (install with: sudo apt install espeak-ng)

use crate::platform::command_output;
use crate::speech::language::{LanguageAvailability, LanguageTag};
use crate::speech::synth::{InitNotifier, SpeechBackend};
use crate::{Result, XtalkError};
use log::{debug, error};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;

/// One row of `espeak-ng --voices`
#[derive(Debug, Clone, PartialEq, Eq)]
struct EspeakVoice {
    /// Language the voice is listed under
    language: String,
    /// Voice file, e.g. `sit/cmn`
    file: String,
    /// Extra languages from the last column, e.g. `zh` from `(zh 5)`
    other_languages: Vec<String>,
}

impl EspeakVoice {
    fn languages(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.language.as_str()).chain(self.other_languages.iter().map(String::as_str))
    }

    /// Dictionary the voice reads, named after its primary language subtag
    ///
    /// Regional voices share one dictionary: `en-us` reads `en_dict`.
    fn dictionary(&self) -> String {
        let primary = self.language.split(['-', '_']).next().unwrap_or(&self.language);
        format!("{}_dict", primary.to_ascii_lowercase())
    }
}

/// eSpeak command-line backend
pub struct EspeakBackend {
    /// Identifier this backend was built for (`espeak-ng` or `espeak`)
    id: String,

    /// Resolved path to the program
    program: String,

    /// Currently running utterance
    current_process: Option<Child>,

    /// Speed in words per minute
    speed: u16,

    /// Pitch (0-99)
    pitch: u8,

    /// Voice name passed with -v
    voice: String,

    /// Parsed `--voices` output, loaded on first use
    voices: OnceCell<Vec<EspeakVoice>>,

    /// Data directory reported by `--version`
    data_dir: OnceCell<Option<PathBuf>>,
}

impl EspeakBackend {
    /// Normal speaking speed in words per minute
    const NORMAL_SPEED: u16 = 175;

    /// Normal pitch
    const NORMAL_PITCH: u8 = 50;

    /// Create an eSpeak backend
    ///
    /// Returns immediately; a worker thread checks that the program runs and
    /// reports through `notifier`.
    pub fn new(id: &str, notifier: InitNotifier) -> Result<Self> {
        debug!("Creating {} backend", id);

        let program = which::which(id)
            .map_err(|e| {
                XtalkError::Speech(format!(
                    "{} not found ({}). Install with: sudo apt install espeak-ng",
                    id, e
                ))
            })?
            .to_string_lossy()
            .into_owned();

        let check = program.clone();
        thread::spawn(move || {
            let status = Command::new(&check)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(s) if s.success() => notifier.ready(),
                Ok(s) => notifier.failed(format!("{} --version exited with {}", check, s)),
                Err(e) => notifier.failed(format!("Failed to run {}: {}", check, e)),
            }
        });

        Ok(Self {
            id: id.to_string(),
            program,
            current_process: None,
            speed: Self::NORMAL_SPEED,
            pitch: Self::NORMAL_PITCH,
            voice: "en".to_string(),
            voices: OnceCell::new(),
            data_dir: OnceCell::new(),
        })
    }

    /// Parse the `--voices` table
    ///
    /// ```text
    /// Pty Language       Age/Gender VoiceName          File                 Other Languages
    ///  5  cmn             --/M      Chinese_(Mandarin) sit/cmn              (zh-cmn 5)(zh 5)
    /// ```
    fn parse_voices(output: &str) -> Vec<EspeakVoice> {
        output
            .lines()
            .skip(1)
            .filter_map(|line| {
                let mut cols = line.split_whitespace();
                let _priority = cols.next()?;
                let language = cols.next()?.to_string();
                let _gender = cols.next()?;
                let _name = cols.next()?;
                let file = cols.next()?.to_string();
                let rest: Vec<&str> = cols.collect();
                let other_languages = rest
                    .join(" ")
                    .split(')')
                    .filter_map(|group| {
                        let group = group.trim().trim_start_matches('(');
                        group.split_whitespace().next().map(str::to_string)
                    })
                    .collect();
                Some(EspeakVoice {
                    language,
                    file,
                    other_languages,
                })
            })
            .collect()
    }

    /// Parse "Data at: <path>" from `--version`
    fn parse_data_dir(output: &str) -> Option<PathBuf> {
        output
            .split("Data at:")
            .nth(1)
            .map(|rest| PathBuf::from(rest.trim()))
    }

    fn voices(&self) -> &[EspeakVoice] {
        self.voices.get_or_init(|| {
            command_output(&self.program, &["--voices"])
                .map(|out| Self::parse_voices(&out))
                .unwrap_or_default()
        })
    }

    fn data_dir(&self) -> Option<&PathBuf> {
        self.data_dir
            .get_or_init(|| {
                command_output(&self.program, &["--version"]).and_then(|out| Self::parse_data_dir(&out))
            })
            .as_ref()
    }

    /// Best voice for a tag and how well it matches
    fn find_voice(&self, tag: &LanguageTag) -> Option<(&EspeakVoice, LanguageAvailability)> {
        let mut best: Option<(&EspeakVoice, LanguageAvailability)> = None;
        for voice in self.voices() {
            let availability = tag.availability_among(voice.languages());
            if availability == LanguageAvailability::CountryAvailable {
                return Some((voice, availability));
            }
            if availability.is_available() && best.is_none() {
                best = Some((voice, availability));
            }
        }
        best
    }

    fn availability(&self, language: &str) -> Result<(Option<String>, LanguageAvailability)> {
        let tag = LanguageTag::parse(language)
            .ok_or_else(|| XtalkError::Speech(format!("Invalid language tag: {}", language)))?;

        let Some((voice, availability)) = self.find_voice(&tag) else {
            return Ok((None, LanguageAvailability::NotSupported));
        };

        if let Some(dir) = self.data_dir() {
            if dir.is_dir() && !dir.join(voice.dictionary()).is_file() {
                debug!("{} listed but {} missing in {:?}", voice.language, voice.dictionary(), dir);
                return Ok((None, LanguageAvailability::MissingData));
            }
        }
        Ok((Some(voice.language.clone()), availability))
    }

    /// Convert a 1.0-is-normal multiplier to espeak speed (80-450 wpm)
    fn rate_to_speed(rate: f32) -> u16 {
        (Self::NORMAL_SPEED as f32 * rate).round().clamp(80.0, 450.0) as u16
    }

    /// Convert a 1.0-is-normal multiplier to espeak pitch (0-99)
    fn pitch_to_espeak(pitch: f32) -> u8 {
        (Self::NORMAL_PITCH as f32 * pitch).round().clamp(0.0, 99.0) as u8
    }

    /// Kill any currently running speech process
    fn cancel_process(&mut self) {
        if let Some(mut child) = self.current_process.take() {
            debug!("Killing {} process", self.id);
            match child.kill() {
                Ok(_) => {
                    let _ = child.wait(); // Clean up zombie
                }
                Err(e) => {
                    debug!("Failed to kill {} process: {}", self.id, e);
                }
            }
        }
    }
}

impl SpeechBackend for EspeakBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_language_available(&self, language: &str) -> Result<LanguageAvailability> {
        Ok(self.availability(language)?.1)
    }

    fn set_language(&mut self, language: &str) -> Result<LanguageAvailability> {
        let (voice, availability) = self.availability(language)?;
        if let Some(voice) = voice {
            debug!("Setting voice to {}", voice);
            self.voice = voice;
        }
        Ok(availability)
    }

    fn speak(&mut self, text: &str, interrupt: bool) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        if interrupt {
            self.cancel_process();
        } else if let Some(child) = self.current_process.as_mut() {
            // Queue behind the running utterance
            let _ = child.wait();
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-v").arg(&self.voice);
        cmd.arg("-s").arg(self.speed.to_string());
        cmd.arg("-p").arg(self.pitch.to_string());
        cmd.arg(text);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        match cmd.spawn() {
            Ok(child) => {
                self.current_process = Some(child);
                debug!("{} process started", self.id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn {}: {}", self.id, e);
                Err(XtalkError::Speech(format!("Failed to start {}: {}", self.id, e)))
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        debug!("Canceling speech");
        self.cancel_process();
        Ok(())
    }

    fn is_speaking(&mut self) -> bool {
        let Some(child) = self.current_process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("{} process exited with {}", self.id, status);
                self.current_process = None;
                false
            }
            Err(e) => {
                debug!("Failed to poll {} process: {}", self.id, e);
                false
            }
        }
    }

    fn set_rate(&mut self, rate: f32) -> Result<()> {
        self.speed = Self::rate_to_speed(rate);
        debug!("Setting speed to {} wpm", self.speed);
        Ok(())
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        self.pitch = Self::pitch_to_espeak(pitch);
        debug!("Setting pitch to {}", self.pitch);
        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("Shutting down {} backend", self.id);
        self.cancel_process();
    }
}

impl Drop for EspeakBackend {
    fn drop(&mut self) {
        self.cancel_process();
    }
}
