//! Speech control loop: takes commands from the window and runs one
//! detached worker per speak request.
//!
//! Workers are not serialized. Two overlapping requests share the fixed
//! temporary paths and the later write wins; see `voice::artifact` for why a
//! reader never sees a torn file. Queuing requests through a single slot
//! would be a behavior change and is not done here.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::chat::{ChatboxClient, Translator};
use crate::config::{EngineConfiguration, Settings, DEFAULT_LANGUAGE};
use crate::voice::playback::{PlaybackOutcome, PlaybackState, SharedEngine};
use crate::voice::tts::SynthesisProvider;

/// What the window picked; combined with `setting.json` on apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub device: Option<usize>,
    pub language: String,
    pub slow: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            device: None,
            language: DEFAULT_LANGUAGE.to_string(),
            slow: false,
        }
    }
}

#[derive(Debug)]
pub enum SpeechCommand {
    Speak(String),
    Stop,
    Apply(Selection),
    Shutdown,
}

/// Settings plus the engine configuration built from them. Replaced whole.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub settings: Settings,
    pub engine: EngineConfiguration,
}

/// How one speak request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    NothingToSay,
    SynthesisFailed,
    Played(PlaybackOutcome),
}

pub struct SpeechSession {
    settings_path: PathBuf,
    chatbox: Option<Arc<ChatboxClient>>,
    translator: Arc<Translator>,
    synthesis: SynthesisProvider,
    engine: SharedEngine,
    config: watch::Sender<Arc<SessionConfig>>,
}

impl SpeechSession {
    pub fn new(
        settings_path: PathBuf,
        settings: Settings,
        chatbox: Option<ChatboxClient>,
        translator: Translator,
        synthesis: SynthesisProvider,
        engine: SharedEngine,
    ) -> Self {
        let engine_config =
            EngineConfiguration::from_settings(&settings, None, DEFAULT_LANGUAGE, false);
        let (config, _) = watch::channel(Arc::new(SessionConfig {
            settings,
            engine: engine_config,
        }));
        Self {
            settings_path,
            chatbox: chatbox.map(Arc::new),
            translator: Arc::new(translator),
            synthesis,
            engine,
            config,
        }
    }

    pub fn config(&self) -> Arc<SessionConfig> {
        self.config.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionConfig>> {
        self.config.subscribe()
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Re-reads the settings file, clears temp files and swaps in a new
    /// configuration built from `selection`.
    pub fn apply(&self, selection: &Selection) {
        let settings = Settings::load_or_default(&self.settings_path);
        self.engine.cleanup();

        let engine = EngineConfiguration::from_settings(
            &settings,
            selection.device,
            &selection.language,
            selection.slow,
        );
        info!(
            device = ?engine.device,
            language = %engine.language,
            slow = engine.slow,
            voice_clone = engine.voice_clone,
            "Settings applied"
        );
        self.config
            .send_replace(Arc::new(SessionConfig { settings, engine }));
    }

    /// Starts a worker for `text`. Returns `None` for empty input.
    pub fn speak(&self, text: &str) -> Option<JoinHandle<SpeakOutcome>> {
        let text = text.trim().to_string();
        if text.is_empty() {
            info!("Input is empty, nothing to speak");
            return None;
        }
        info!(%text, "Speak request");

        let snapshot = self.config();
        let chatbox = self.chatbox.clone();
        let translator = Arc::clone(&self.translator);
        let synthesis = self.synthesis.clone();
        let engine = Arc::clone(&self.engine);

        Some(tokio::spawn(async move {
            run_speak(text, snapshot, chatbox, translator, synthesis, engine).await
        }))
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    pub fn shutdown(&self) {
        self.engine.stop();
        self.engine.cleanup();
    }
}

async fn run_speak(
    text: String,
    snapshot: Arc<SessionConfig>,
    chatbox: Option<Arc<ChatboxClient>>,
    translator: Arc<Translator>,
    synthesis: SynthesisProvider,
    engine: SharedEngine,
) -> SpeakOutcome {
    let settings = &snapshot.settings;

    let translated = if settings.is_trans {
        Some(translator.translate(&text, &settings.trans_lang).await)
    } else {
        None
    };

    if let Some(chatbox) = &chatbox {
        let message = match &translated {
            Some(t) => format!("{}\n{}", text, t),
            None => text.clone(),
        };
        match chatbox.send(&message) {
            Ok(()) => info!("Chatbox message sent"),
            Err(e) => warn!("Chatbox send failed: {}", e),
        }
    }

    let speech = match &translated {
        Some(t) if settings.speaks_translation() => t.clone(),
        _ => text,
    };

    engine.enter(PlaybackState::Synthesizing);
    let artifact = match synthesis.synthesize(&speech, &snapshot.engine).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            engine.enter(PlaybackState::Idle);
            return SpeakOutcome::NothingToSay;
        }
        Err(e) => {
            error!("Synthesis failed: {}", e);
            engine.enter(PlaybackState::Failed);
            engine.enter(PlaybackState::Idle);
            return SpeakOutcome::SynthesisFailed;
        }
    };

    let device = snapshot.engine.device;
    let sample_rate = snapshot.engine.sample_rate;
    let player = Arc::clone(&engine);
    match tokio::task::spawn_blocking(move || player.play(&artifact, device, sample_rate)).await {
        Ok(outcome) => SpeakOutcome::Played(outcome),
        Err(e) => {
            error!("Playback task panicked: {}", e);
            engine.enter(PlaybackState::Idle);
            SpeakOutcome::Played(PlaybackOutcome::Failed)
        }
    }
}

/// Drives a session from window commands until shutdown or until every
/// sender is gone.
pub async fn run_speech_loop(session: SpeechSession, mut rx: mpsc::UnboundedReceiver<SpeechCommand>) {
    session.apply(&Selection::default());
    info!("Speech loop ready");

    while let Some(command) = rx.recv().await {
        match command {
            SpeechCommand::Speak(text) => {
                // Detached; the worker logs its own outcome.
                if let Some(handle) = session.speak(&text) {
                    tokio::spawn(async move {
                        if let Ok(outcome) = handle.await {
                            info!(?outcome, "Speak request done");
                        }
                    });
                }
            }
            SpeechCommand::Stop => session.stop(),
            SpeechCommand::Apply(selection) => session.apply(&selection),
            SpeechCommand::Shutdown => break,
        }
    }
    session.shutdown();
    info!("Speech loop stopped");
}
