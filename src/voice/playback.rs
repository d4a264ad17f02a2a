//! Playback engine with a primary and a secondary strategy.
//!
//! The primary strategy decodes the artifact, resamples it to the output rate
//! through an intermediate WAV and plays the buffer on the selected device
//! with rodio. If any of that fails the secondary strategy hands the
//! artifact, decoded at its native rate, to an external command-line player.
//!
//! `stop()` is cooperative. Both strategies poll for it every
//! [`POLL_INTERVAL`]; work between polls (decoding, resampling, a process
//! spawn) always runs to completion first.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::PlaybackError;
use crate::voice::artifact::{self, TempPaths};
use crate::voice::audio::{self, PcmBuffer};
use crate::voice::devices::resolve_output_device;
use crate::voice::find_on_path;

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// External players tried by the secondary strategy, in order.
const PLAYERS: &[&str] = &["ffplay", "paplay", "aplay", "afplay"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Synthesizing,
    Decoding,
    Resampling,
    Playing,
    FallbackAttempted,
    Failed,
}

/// How one `play` invocation ended. None of these are errors to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Stopped,
    /// The primary strategy failed and the secondary one played the audio.
    FallbackPlayed,
    Failed,
}

/// What a strategy reports when it returns without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finished {
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackRequest<'a> {
    pub artifact: &'a Path,
    pub device: Option<usize>,
    pub sample_rate: u32,
}

/// Handed to a strategy for one invocation: stop polling and state reporting.
pub struct PlaybackContext<'a> {
    stop_epoch: &'a AtomicU64,
    started_at: u64,
    state: &'a Mutex<PlaybackState>,
}

impl PlaybackContext<'_> {
    /// True once `stop()` was called after this invocation began.
    pub fn stopped(&self) -> bool {
        self.stop_epoch.load(Ordering::SeqCst) != self.started_at
    }

    pub fn enter(&self, state: PlaybackState) {
        set_state(self.state, state);
    }
}

pub trait PlaybackStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn play(
        &self,
        request: &PlaybackRequest<'_>,
        ctx: &PlaybackContext<'_>,
    ) -> Result<Finished, PlaybackError>;
}

pub struct PlaybackEngine {
    primary: Box<dyn PlaybackStrategy>,
    secondary: Box<dyn PlaybackStrategy>,
    paths: TempPaths,
    state: Mutex<PlaybackState>,
    stop_epoch: AtomicU64,
}

impl PlaybackEngine {
    pub fn new(paths: TempPaths) -> Self {
        Self::with_strategies(
            Box::new(ResamplingPlayer::new(paths.intermediate.clone())),
            Box::new(SystemPlayer::new(paths.converted.clone())),
            paths,
        )
    }

    pub fn with_strategies(
        primary: Box<dyn PlaybackStrategy>,
        secondary: Box<dyn PlaybackStrategy>,
        paths: TempPaths,
    ) -> Self {
        Self {
            primary,
            secondary,
            paths,
            state: Mutex::new(PlaybackState::Idle),
            stop_epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a pipeline stage that happens outside the engine, such as
    /// synthesis.
    pub fn enter(&self, state: PlaybackState) {
        set_state(&self.state, state);
    }

    /// Plays `artifact`, blocking until it finishes, is stopped, or both
    /// strategies give up. Never returns an error: failures are logged and
    /// reported through the outcome.
    pub fn play(&self, artifact: &Path, device: Option<usize>, sample_rate: u32) -> PlaybackOutcome {
        let request = PlaybackRequest {
            artifact,
            device,
            sample_rate,
        };
        let ctx = PlaybackContext {
            stop_epoch: &self.stop_epoch,
            started_at: self.stop_epoch.load(Ordering::SeqCst),
            state: &self.state,
        };

        let outcome = match self.primary.play(&request, &ctx) {
            Ok(Finished::Completed) => {
                info!("Playback finished");
                PlaybackOutcome::Completed
            }
            Ok(Finished::Stopped) => {
                info!("Playback stopped");
                PlaybackOutcome::Stopped
            }
            Err(e) if ctx.stopped() => {
                debug!("Primary playback failed after stop: {}", e);
                PlaybackOutcome::Stopped
            }
            Err(e) => {
                error!(strategy = self.primary.name(), "Playback failed: {}", e);
                self.run_fallback(&request, &ctx)
            }
        };

        if outcome == PlaybackOutcome::Failed {
            self.enter(PlaybackState::Failed);
        }
        self.enter(PlaybackState::Idle);
        outcome
    }

    fn run_fallback(&self, request: &PlaybackRequest<'_>, ctx: &PlaybackContext<'_>) -> PlaybackOutcome {
        self.enter(PlaybackState::FallbackAttempted);
        info!(strategy = self.secondary.name(), "Trying fallback playback");
        match self.secondary.play(request, ctx) {
            Ok(Finished::Completed) => {
                info!("Fallback playback finished");
                PlaybackOutcome::FallbackPlayed
            }
            Ok(Finished::Stopped) => PlaybackOutcome::Stopped,
            Err(e) => {
                error!(strategy = self.secondary.name(), "Fallback playback failed: {}", e);
                PlaybackOutcome::Failed
            }
        }
    }

    /// Asks every playback in progress to stop at its next poll.
    pub fn stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        info!("Stop requested");
    }

    /// Removes the artifact and both intermediates. Safe when none exist.
    pub fn cleanup(&self) {
        self.paths.remove_all();
    }

    pub fn paths(&self) -> &TempPaths {
        &self.paths
    }
}

fn set_state(cell: &Mutex<PlaybackState>, state: PlaybackState) {
    let mut current = cell.lock().unwrap_or_else(|e| e.into_inner());
    if *current != state {
        debug!(from = ?*current, to = ?state, "Playback state");
        *current = state;
    }
}

/// Deletes a file when dropped, however the enclosing scope exits.
struct RemoveOnDrop<'a>(&'a Path);

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        artifact::remove_quietly(self.0);
    }
}

/// Decode, resample to the output rate via an intermediate WAV, then play
/// on the selected device.
pub struct ResamplingPlayer {
    intermediate: PathBuf,
}

impl ResamplingPlayer {
    pub fn new(intermediate: PathBuf) -> Self {
        Self { intermediate }
    }

    /// Decodes the artifact and writes it, resampled, to the intermediate WAV.
    fn stage(&self, request: &PlaybackRequest<'_>, ctx: &PlaybackContext<'_>) -> Result<(), PlaybackError> {
        ctx.enter(PlaybackState::Decoding);
        let decoded = audio::decode_file(request.artifact)?;
        debug!(
            rate = decoded.sample_rate,
            channels = decoded.channels,
            secs = decoded.duration_secs(),
            "Decoded artifact"
        );

        ctx.enter(PlaybackState::Resampling);
        let resampled = audio::resample(decoded, request.sample_rate)?;
        audio::write_wav(&self.intermediate, &resampled)
    }

    /// Reads the intermediate WAV back and plays it. Another worker may have
    /// replaced or removed it since staging; either surfaces as an error.
    fn play_staged(
        &self,
        request: &PlaybackRequest<'_>,
        ctx: &PlaybackContext<'_>,
    ) -> Result<Finished, PlaybackError> {
        let buffer = audio::read_wav(&self.intermediate)?;
        if ctx.stopped() {
            return Ok(Finished::Stopped);
        }
        ctx.enter(PlaybackState::Playing);
        info!(
            device = ?request.device,
            "Playing on {}",
            request.device.map_or("default device".to_string(), |i| format!("device {}", i))
        );
        play_buffer(buffer, request.device, ctx)
    }
}

impl PlaybackStrategy for ResamplingPlayer {
    fn name(&self) -> &str {
        "rodio"
    }

    fn play(
        &self,
        request: &PlaybackRequest<'_>,
        ctx: &PlaybackContext<'_>,
    ) -> Result<Finished, PlaybackError> {
        let _cleanup = RemoveOnDrop(&self.intermediate);
        self.stage(request, ctx)?;
        self.play_staged(request, ctx)
    }
}

fn play_buffer(
    buffer: PcmBuffer,
    device: Option<usize>,
    ctx: &PlaybackContext<'_>,
) -> Result<Finished, PlaybackError> {
    // The stream must outlive the sink.
    let (_stream, handle) = match resolve_output_device(device) {
        Some(device) => OutputStream::try_from_device(&device)?,
        None => OutputStream::try_default()?,
    };
    let sink = Sink::try_new(&handle)?;
    sink.append(SamplesBuffer::new(
        buffer.channels,
        buffer.sample_rate,
        buffer.samples,
    ));

    while !sink.empty() {
        if ctx.stopped() {
            sink.stop();
            return Ok(Finished::Stopped);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(Finished::Completed)
}

/// Plays through an external player on the default device, without
/// resampling.
pub struct SystemPlayer {
    converted: PathBuf,
    players: Vec<String>,
}

impl SystemPlayer {
    pub fn new(converted: PathBuf) -> Self {
        Self {
            converted,
            players: PLAYERS.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_players(converted: PathBuf, players: Vec<String>) -> Self {
        Self { converted, players }
    }

    fn select_player(&self) -> Option<PathBuf> {
        self.players.iter().find_map(|p| find_on_path(p))
    }
}

impl PlaybackStrategy for SystemPlayer {
    fn name(&self) -> &str {
        "system-player"
    }

    fn play(
        &self,
        request: &PlaybackRequest<'_>,
        ctx: &PlaybackContext<'_>,
    ) -> Result<Finished, PlaybackError> {
        let player = self.select_player().ok_or(PlaybackError::NoPlayer)?;
        if request.device.is_some() {
            warn!("Fallback player ignores the device selection and uses the default output");
        }

        let decoded = audio::decode_file(request.artifact)?;
        let _cleanup = RemoveOnDrop(&self.converted);
        audio::write_wav(&self.converted, &decoded)?;

        let mut cmd = player_command(&player, &self.converted);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        debug!(command = ?cmd, "Spawning player");
        let mut child = cmd.spawn()?;

        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(Finished::Completed);
                }
                return Err(PlaybackError::Player {
                    player: player.display().to_string(),
                    status,
                });
            }
            if ctx.stopped() {
                if let Err(e) = child.kill() {
                    warn!("Failed to stop player: {}", e);
                }
                let _ = child.wait();
                return Ok(Finished::Stopped);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn player_command(player: &Path, wav: &Path) -> Command {
    let name = player
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut cmd = Command::new(player);
    match name {
        "ffplay" => {
            cmd.args(["-nodisp", "-autoexit", "-loglevel", "quiet"]);
        }
        "aplay" => {
            cmd.arg("-q");
        }
        _ => {}
    }
    cmd.arg(wav);
    cmd
}

/// Shared handle used by speech workers.
pub type SharedEngine = Arc<PlaybackEngine>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    struct Scripted {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PlaybackStrategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn play(
            &self,
            _request: &PlaybackRequest<'_>,
            ctx: &PlaybackContext<'_>,
        ) -> Result<Finished, PlaybackError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.enter(PlaybackState::Playing);
            if self.fail {
                Err(PlaybackError::Empty)
            } else {
                Ok(Finished::Completed)
            }
        }
    }

    fn scripted(fail: bool) -> (Box<Scripted>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Scripted {
                calls: calls.clone(),
                fail,
            }),
            calls,
        )
    }

    #[test]
    fn primary_success_skips_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, primary_calls) = scripted(false);
        let (secondary, secondary_calls) = scripted(false);
        let engine = PlaybackEngine::with_strategies(primary, secondary, TempPaths::in_dir(dir.path()));

        let outcome = engine.play(&dir.path().join("a"), None, 48_000);
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn corrupt_artifact_falls_back_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        std::fs::write(&paths.artifact, b"\x00\x01 not audio at all").unwrap();

        let (secondary, secondary_calls) = scripted(false);
        let engine = PlaybackEngine::with_strategies(
            Box::new(ResamplingPlayer::new(paths.intermediate.clone())),
            secondary,
            paths.clone(),
        );

        let outcome = engine.play(&paths.artifact, Some(0), 48_000);
        assert_eq!(outcome, PlaybackOutcome::FallbackPlayed);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert!(!paths.intermediate.exists());
    }

    fn write_tone(path: &Path) {
        let pcm = PcmBuffer {
            channels: 1,
            sample_rate: 24_000,
            samples: vec![0.1; 1_200],
        };
        audio::write_wav(path, &pcm).unwrap();
    }

    /// The resampling player with a hook between writing the intermediate
    /// WAV and reading it back.
    struct BetweenStages<F> {
        player: ResamplingPlayer,
        hook: F,
    }

    impl<F: Fn(&Path) + Send + Sync> PlaybackStrategy for BetweenStages<F> {
        fn name(&self) -> &str {
            "between-stages"
        }

        fn play(
            &self,
            request: &PlaybackRequest<'_>,
            ctx: &PlaybackContext<'_>,
        ) -> Result<Finished, PlaybackError> {
            let _cleanup = RemoveOnDrop(&self.player.intermediate);
            self.player.stage(request, ctx)?;
            (self.hook)(&self.player.intermediate);
            self.player.play_staged(request, ctx)
        }
    }

    #[test]
    fn corrupt_intermediate_falls_back_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        write_tone(&paths.artifact);

        let (secondary, secondary_calls) = scripted(false);
        let engine = PlaybackEngine::with_strategies(
            Box::new(BetweenStages {
                player: ResamplingPlayer::new(paths.intermediate.clone()),
                hook: |intermediate: &Path| std::fs::write(intermediate, b"RIFF garbage").unwrap(),
            }),
            secondary,
            paths.clone(),
        );

        let outcome = engine.play(&paths.artifact, None, 48_000);
        assert_eq!(outcome, PlaybackOutcome::FallbackPlayed);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert!(!paths.intermediate.exists());
    }

    #[test]
    fn intermediate_removed_by_another_worker_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        write_tone(&paths.artifact);

        let (staged_tx, staged_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let staged_tx = Mutex::new(staged_tx);
        let resume_rx = Mutex::new(resume_rx);

        // First worker pauses after staging its intermediate.
        let (secondary_a, fallbacks_a) = scripted(false);
        let engine_a = Arc::new(PlaybackEngine::with_strategies(
            Box::new(BetweenStages {
                player: ResamplingPlayer::new(paths.intermediate.clone()),
                hook: move |_: &Path| {
                    let _ = staged_tx.lock().unwrap().send(());
                    let _ = resume_rx.lock().unwrap().recv();
                },
            }),
            secondary_a,
            paths.clone(),
        ));
        // Second worker shares the paths and runs to completion in between.
        let (secondary_b, fallbacks_b) = scripted(false);
        let engine_b = PlaybackEngine::with_strategies(
            Box::new(ResamplingPlayer::new(paths.intermediate.clone())),
            secondary_b,
            paths.clone(),
        );

        let worker = {
            let engine = engine_a.clone();
            let artifact = paths.artifact.clone();
            std::thread::spawn(move || engine.play(&artifact, None, 48_000))
        };
        staged_rx.recv().unwrap();
        assert!(paths.intermediate.exists());

        let outcome_b = engine_b.play(&paths.artifact, None, 48_000);
        assert!(!paths.intermediate.exists());
        resume_tx.send(()).unwrap();
        let outcome_a = worker.join().unwrap();

        assert_eq!(outcome_a, PlaybackOutcome::FallbackPlayed);
        assert!(
            matches!(
                outcome_b,
                PlaybackOutcome::Completed | PlaybackOutcome::FallbackPlayed | PlaybackOutcome::Failed
            ),
            "{:?}",
            outcome_b
        );
        assert_eq!(fallbacks_a.load(Ordering::SeqCst), 1);
        assert!(fallbacks_b.load(Ordering::SeqCst) <= 1);
        assert_eq!(engine_a.state(), PlaybackState::Idle);
        assert_eq!(engine_b.state(), PlaybackState::Idle);
    }

    #[test]
    fn both_strategies_failing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, _) = scripted(true);
        let (secondary, secondary_calls) = scripted(true);
        let engine = PlaybackEngine::with_strategies(primary, secondary, TempPaths::in_dir(dir.path()));

        assert_eq!(engine.play(&dir.path().join("a"), None, 48_000), PlaybackOutcome::Failed);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn system_player_without_players_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        let (primary, _) = scripted(true);
        let engine = PlaybackEngine::with_strategies(
            primary,
            Box::new(SystemPlayer::with_players(
                paths.converted.clone(),
                vec!["no-such-player-binary".into()],
            )),
            paths,
        );
        assert_eq!(engine.play(&dir.path().join("a"), None, 48_000), PlaybackOutcome::Failed);
    }

    struct UntilStopped {
        started: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl PlaybackStrategy for UntilStopped {
        fn name(&self) -> &str {
            "until-stopped"
        }

        fn play(
            &self,
            _request: &PlaybackRequest<'_>,
            ctx: &PlaybackContext<'_>,
        ) -> Result<Finished, PlaybackError> {
            if let Some(tx) = self.started.lock().unwrap().take() {
                let _ = tx.send(());
            }
            for _ in 0..200 {
                if ctx.stopped() {
                    return Ok(Finished::Stopped);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(Finished::Completed)
        }
    }

    #[test]
    fn stop_reaches_running_playback() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let (secondary, secondary_calls) = scripted(false);
        let engine = Arc::new(PlaybackEngine::with_strategies(
            Box::new(UntilStopped {
                started: Mutex::new(Some(tx)),
            }),
            secondary,
            TempPaths::in_dir(dir.path()),
        ));

        let worker = {
            let engine = engine.clone();
            let artifact = dir.path().join("a");
            std::thread::spawn(move || engine.play(&artifact, None, 48_000))
        };
        rx.recv().unwrap();
        engine.stop();

        assert_eq!(worker.join().unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_before_play_does_not_cancel_next_play() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, _) = scripted(false);
        let (secondary, _) = scripted(false);
        let engine = PlaybackEngine::with_strategies(primary, secondary, TempPaths::in_dir(dir.path()));
        engine.stop();
        assert_eq!(engine.play(&dir.path().join("a"), None, 48_000), PlaybackOutcome::Completed);
    }

    #[test]
    fn cleanup_is_safe_and_thorough() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        let engine = PlaybackEngine::new(paths.clone());
        engine.cleanup();

        for p in [&paths.artifact, &paths.intermediate, &paths.converted] {
            std::fs::write(p, b"x").unwrap();
        }
        engine.cleanup();
        assert!(!paths.artifact.exists());
        assert!(!paths.intermediate.exists());
        assert!(!paths.converted.exists());
    }

    #[test]
    fn player_arguments() {
        let cmd = player_command(Path::new("/usr/bin/ffplay"), Path::new("/tmp/a.wav"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-nodisp", "-autoexit", "-loglevel", "quiet", "/tmp/a.wav"]);
    }
}
