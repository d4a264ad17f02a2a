use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const ARTIFACT_NAME: &str = "chatbox_tts_output.audio";
const INTERMEDIATE_NAME: &str = "chatbox_tts_output_48k.wav";
const CONVERTED_NAME: &str = "chatbox_tts_output_converted.wav";

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// The fixed temporary files shared by synthesis and playback.
///
/// These paths are process-wide with no locking. Every write goes through
/// [`write_atomic`], so concurrent writers replace whole files and a reader
/// sees either the old or the new content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempPaths {
    /// Synthesized audio, in whatever encoding the synthesizer produced.
    pub artifact: PathBuf,
    /// Artifact resampled to the output rate.
    pub intermediate: PathBuf,
    /// Artifact decoded to WAV at its native rate, for the external player.
    pub converted: PathBuf,
}

impl Default for TempPaths {
    fn default() -> Self {
        Self::in_dir(std::env::temp_dir())
    }
}

impl TempPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            artifact: dir.join(ARTIFACT_NAME),
            intermediate: dir.join(INTERMEDIATE_NAME),
            converted: dir.join(CONVERTED_NAME),
        }
    }

    /// Removes every temporary file. Missing files are not an error.
    pub fn remove_all(&self) {
        for path in [&self.artifact, &self.intermediate, &self.converted] {
            remove_quietly(path);
        }
    }
}

/// A sibling path unique to this process and call, for staging a write.
pub fn staging_path(target: &Path) -> PathBuf {
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    target.with_file_name(format!(".{}.{}.{}.part", name, std::process::id(), seq))
}

/// Moves a fully written staging file over `target`.
pub fn commit(staged: &Path, target: &Path) -> io::Result<()> {
    match std::fs::rename(staged, target) {
        Ok(()) => Ok(()),
        Err(e) => {
            remove_quietly(staged);
            Err(e)
        }
    }
}

/// Writes `bytes` to `target` by staging beside it and renaming into place.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let staged = staging_path(target);
    if let Err(e) = std::fs::write(&staged, bytes) {
        remove_quietly(&staged);
        return Err(e);
    }
    commit(&staged, target)
}

pub fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed temp file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove temp file: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_all_without_files_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        paths.remove_all();
        paths.remove_all();
    }

    #[test]
    fn write_atomic_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths::in_dir(dir.path());
        write_atomic(&paths.artifact, b"first version, long").unwrap();
        write_atomic(&paths.artifact, b"second").unwrap();
        assert_eq!(std::fs::read(&paths.artifact).unwrap(), b"second");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn staging_paths_are_unique() {
        let target = Path::new("/tmp/x.wav");
        assert_ne!(staging_path(target), staging_path(target));
    }
}
