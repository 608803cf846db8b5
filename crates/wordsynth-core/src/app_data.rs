//! Where wordsynth stores its own data (config).
//!
//! Embedding files stay wherever the user keeps them; we only store settings here.

use std::path::PathBuf;

/// Returns the directory where wordsynth stores its config.
/// On Linux: `~/.local/share/wordsynth/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "wordsynth", "wordsynth")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
