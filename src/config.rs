use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::ConfigLoadError;
use crate::voice::cleanup::CleanupRuleSet;

pub const DEFAULT_SETTINGS_PATH: &str = "./setting.json";

/// Output rate every utterance is resampled to before it reaches the device.
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Languages offered in the window, as (label, code) pairs.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("한국어 (ko)", "ko"),
    ("English US (en-us)", "en-us"),
    ("English UK (en-gb)", "en-gb"),
    ("日本語 (ja)", "ja"),
    ("中文 (zh-CN)", "zh-CN"),
    ("Français (fr)", "fr"),
    ("Deutsch (de)", "de"),
    ("Español (es)", "es"),
    ("Italiano (it)", "it"),
    ("Русский (ru)", "ru"),
];

pub const DEFAULT_LANGUAGE: &str = "ko";

/// Contents of `setting.json`. Unknown keys are ignored and missing keys take
/// their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub my_voice: bool,
    pub is_trans: bool,
    pub is_say_trans_lang: bool,
    pub trans_lang: String,
    pub text_auto_cleanup: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_font: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            my_voice: false,
            is_trans: false,
            is_say_trans_lang: false,
            trans_lang: "en".to_string(),
            text_auto_cleanup: vec![
                ("@".to_string(), String::new()),
                ("ㅋ".to_string(), "크".to_string()),
                ("ㄷ".to_string(), "덜".to_string()),
            ],
            ui_font: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigLoadError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| ConfigLoadError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the settings file, falling back to defaults on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => {
                info!(path = %path.display(), "Settings loaded");
                settings
            }
            Err(e @ ConfigLoadError::Missing(_)) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
            Err(e) => {
                error!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Language the synthesizer should speak in, given the window's pick.
    pub fn speech_language(&self, selected: &str) -> String {
        if self.is_say_trans_lang {
            return self.trans_lang.clone();
        }
        if LANGUAGES.iter().any(|(_, code)| *code == selected) {
            selected.to_string()
        } else {
            warn!(selected, "Unknown language, using {}", DEFAULT_LANGUAGE);
            DEFAULT_LANGUAGE.to_string()
        }
    }

    /// Whether the translated text, not the typed one, should be spoken.
    pub fn speaks_translation(&self) -> bool {
        self.is_say_trans_lang && self.is_trans
    }
}

/// Immutable snapshot of everything the speech pipeline needs. Re-applying
/// settings builds a new value; fields are never edited in place.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfiguration {
    /// `None` plays on the system default output.
    pub device: Option<usize>,
    pub language: String,
    pub slow: bool,
    pub cleanup: CleanupRuleSet,
    pub voice_clone: bool,
    pub sample_rate: u32,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), None, DEFAULT_LANGUAGE, false)
    }
}

impl EngineConfiguration {
    pub fn from_settings(
        settings: &Settings,
        device: Option<usize>,
        selected_language: &str,
        slow: bool,
    ) -> Self {
        Self {
            device,
            language: settings.speech_language(selected_language),
            slow,
            cleanup: CleanupRuleSet::new(settings.text_auto_cleanup.clone()),
            voice_clone: settings.my_voice,
            sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}
