use anyhow::{Context, Result};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use clap::Parser;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chatbox_tts::chat::{ChatboxClient, Translator};
use chatbox_tts::cli::Cli;
use chatbox_tts::config::Settings;
use chatbox_tts::logging;
use chatbox_tts::speaker::{run_speech_loop, SpeechCommand, SpeechSession};
use chatbox_tts::ui::{SpeechChannel, UiFont, UiPlugin};
use chatbox_tts::voice::artifact::TempPaths;
use chatbox_tts::voice::playback::PlaybackEngine;
use chatbox_tts::voice::tts::{SynthesisProvider, VoiceClone, REFERENCE_VOICE};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_rx = logging::init(&cli.log_level).context("failed to initialize logging")?;

    let settings = Settings::load_or_default(&cli.config);
    if settings.my_voice {
        let clone = VoiceClone::default();
        info!(device = clone.device_label(), reference = REFERENCE_VOICE, "Voice clone enabled");
    }

    let chatbox = match ChatboxClient::connect(&cli.ip, cli.port) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("Chatbox output unavailable: {}", e);
            None
        }
    };

    let paths = TempPaths::default();
    let session = SpeechSession::new(
        cli.config.clone(),
        settings.clone(),
        chatbox,
        Translator::default(),
        SynthesisProvider::with_defaults(paths.clone()),
        Arc::new(PlaybackEngine::new(paths)),
    );

    let (ui_tx, speech_rx) = mpsc::unbounded_channel::<SpeechCommand>();

    // 1. Speech loop on a background runtime
    let speech = thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create runtime: {}", e);
                return;
            }
        };
        rt.block_on(run_speech_loop(session, speech_rx));
    });

    info!("Text-to-speech with chatbox output; needs an internet connection for the default voice");

    // 2. Window on the main thread
    App::new()
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: format!("Chatbox TTS v{}", env!("CARGO_PKG_VERSION")),
                        resolution: (800., 600.).into(),
                        ..default()
                    }),
                    ..default()
                })
                .disable::<LogPlugin>(),
        )
        .insert_resource(ClearColor(Color::rgb(0.06, 0.06, 0.07)))
        .insert_resource(UiFont(settings.ui_font.clone()))
        .insert_resource(SpeechChannel {
            tx: ui_tx.clone(),
            logs: Mutex::new(log_rx),
        })
        .add_plugins(UiPlugin)
        .run();

    // Closing the window without Quit still cleans up.
    let _ = ui_tx.send(SpeechCommand::Shutdown);
    drop(ui_tx);
    if speech.join().is_err() {
        error!("Speech loop panicked");
    }
    Ok(())
}
