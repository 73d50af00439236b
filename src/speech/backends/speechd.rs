//! Speech Dispatcher backend driving the `spd-say` client
//!
//! Used both for the service's default module (`spd-say`) and for a
//! specific output module (`speechd:<module>`). Voices and their
//! languages come from `spd-say -L`.
//!
//! Utterances run with `-w` so the client lives as long as the speech;
//! cancel (`-C`) runs to completion before anything new is queued.

use crate::platform::command_output;
use crate::speech::language::{LanguageAvailability, LanguageTag};
use crate::speech::synth::{InitNotifier, SpeechBackend};
use crate::{Result, XtalkError};
use log::{debug, error};
use once_cell::sync::OnceCell;
use std::process::{Child, Command, Stdio};
use std::thread;

/// Speech Dispatcher client backend
pub struct SpdSayBackend {
    /// Identifier this backend was built for
    id: String,

    /// Resolved path to spd-say
    program: String,

    /// Output module, `None` for the service default
    module: Option<String>,

    /// Language passed with -l
    language: Option<String>,

    /// Rate in spd-say units (-100 to 100)
    rate: i32,

    /// Pitch in spd-say units (-100 to 100)
    pitch: i32,

    /// Client process of the current utterance
    current_process: Option<Child>,

    /// Languages reported by `spd-say -L`, loaded on first use
    languages: OnceCell<Vec<String>>,
}

impl SpdSayBackend {
    pub fn new(module: Option<&str>, notifier: InitNotifier) -> Result<Self> {
        let id = match module {
            Some(m) => format!("speechd:{}", m),
            None => "spd-say".to_string(),
        };
        debug!("Creating {} backend", id);

        let program = which::which("spd-say")
            .map_err(|e| {
                XtalkError::Speech(format!(
                    "spd-say not found ({}). Install with: sudo apt install speech-dispatcher",
                    e
                ))
            })?
            .to_string_lossy()
            .into_owned();

        // Listing output modules needs a live service connection
        let check = program.clone();
        thread::spawn(move || match command_output(&check, &["-O"]) {
            Some(_) => notifier.ready(),
            None => notifier.failed("Speech Dispatcher is not responding"),
        });

        Ok(Self::with_program(id, program, module))
    }

    fn with_program(id: String, program: String, module: Option<&str>) -> Self {
        Self {
            id,
            program,
            module: module.map(str::to_string),
            language: None,
            rate: 0,
            pitch: 0,
            current_process: None,
            languages: OnceCell::new(),
        }
    }

    /// Parse `spd-say -L` output
    ///
    /// ```text
    ///      NAME                    LANGUAGE     VARIANT
    ///      Chinese (Mandarin)      cmn          none
    /// ```
    ///
    /// Names may contain spaces, so the language is the second-to-last column.
    fn parse_voice_languages(output: &str) -> Vec<String> {
        output
            .lines()
            .skip(1)
            .filter_map(|line| {
                let cols: Vec<&str> = line.split_whitespace().collect();
                if cols.len() < 3 {
                    return None;
                }
                Some(cols[cols.len() - 2].to_string())
            })
            .collect()
    }

    /// Convert a 1.0-is-normal multiplier to spd-say's -100..100 scale
    fn to_spd_scale(factor: f32) -> i32 {
        ((factor - 1.0) * 100.0).round().clamp(-100.0, 100.0) as i32
    }

    fn module_args(&self) -> Vec<String> {
        match &self.module {
            Some(m) => vec!["-o".to_string(), m.clone()],
            None => Vec::new(),
        }
    }

    fn languages(&self) -> &[String] {
        self.languages.get_or_init(|| {
            let mut args = self.module_args();
            args.push("-L".to_string());
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            command_output(&self.program, &args)
                .map(|out| Self::parse_voice_languages(&out))
                .unwrap_or_default()
        })
    }

    /// Cancel speech in the service and wait for the client to confirm
    fn cancel(&mut self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("-C")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                error!("Failed to run spd-say -C: {}", e);
                XtalkError::Speech(format!("Failed to start spd-say: {}", e))
            })?;
        self.reap_process();
        if !status.success() {
            return Err(XtalkError::Speech(format!("spd-say -C exited with {}", status)));
        }
        Ok(())
    }

    /// Collect the previous utterance's client
    fn reap_process(&mut self) {
        if let Some(mut child) = self.current_process.take() {
            if let Err(e) = child.kill() {
                debug!("spd-say client already gone: {}", e);
            }
            let _ = child.wait(); // Clean up zombie
        }
    }
}

impl SpeechBackend for SpdSayBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_language_available(&self, language: &str) -> Result<LanguageAvailability> {
        let tag = LanguageTag::parse(language)
            .ok_or_else(|| XtalkError::Speech(format!("Invalid language tag: {}", language)))?;
        Ok(tag.availability_among(self.languages().iter().map(String::as_str)))
    }

    fn set_language(&mut self, language: &str) -> Result<LanguageAvailability> {
        let availability = self.is_language_available(language)?;
        if availability.is_available() {
            debug!("{} language set to {}", self.id, language);
            self.language = Some(language.to_string());
        }
        Ok(availability)
    }

    fn speak(&mut self, text: &str, interrupt: bool) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if interrupt {
            self.stop()?;
        } else if let Some(child) = self.current_process.as_mut() {
            // Queue behind the running utterance
            let _ = child.wait();
            self.current_process = None;
        }

        let mut args = self.module_args();
        args.push("-w".to_string());
        if let Some(language) = &self.language {
            args.push("-l".to_string());
            args.push(language.clone());
        }
        args.push("-r".to_string());
        args.push(self.rate.to_string());
        args.push("-p".to_string());
        args.push(self.pitch.to_string());
        args.push("--".to_string());
        args.push(text.to_string());

        debug!("Speaking via {}: {}", self.id, text);
        let child = Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn spd-say: {}", e);
                XtalkError::Speech(format!("Failed to start spd-say: {}", e))
            })?;
        self.current_process = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("Canceling speech");
        self.cancel()
    }

    fn is_speaking(&mut self) -> bool {
        let Some(child) = self.current_process.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => {
                self.current_process = None;
                false
            }
            Err(e) => {
                debug!("Failed to poll spd-say client: {}", e);
                false
            }
        }
    }

    fn set_rate(&mut self, rate: f32) -> Result<()> {
        self.rate = Self::to_spd_scale(rate);
        Ok(())
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        self.pitch = Self::to_spd_scale(pitch);
        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("Shutting down {} backend", self.id);
        if let Err(e) = self.stop() {
            debug!("Stop during shutdown failed: {}", e);
        }
    }
}

impl Drop for SpdSayBackend {
    fn drop(&mut self) {
        self.reap_process();
    }
}
