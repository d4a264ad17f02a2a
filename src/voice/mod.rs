pub mod artifact;
pub mod audio;
pub mod cleanup;
pub mod devices;
pub mod playback;
pub mod tts;

use std::path::{Path, PathBuf};

/// Finds an executable by name in `PATH`. Names containing a separator are
/// checked as given.
pub fn find_on_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return p.exists().then_some(p);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = Path::new(&dir).join(bin);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = candidate.with_extension(std::env::consts::EXE_EXTENSION);
        (!std::env::consts::EXE_EXTENSION.is_empty() && exe.is_file()).then_some(exe)
    })
}
