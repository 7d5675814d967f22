//! Data and template directory resolution.
//!
//! Priority for the data directory:
//! 1. `SIGHTLINE_HOME` (explicit override)
//! 2. `XDG_DATA_HOME/sightline` (Linux standard)
//! 3. `~/.sightline` (home directory fallback)
//! 4. System temp dir (last resort)
//!
//! Persisted variables live at `{data_dir}/vars.json`.

use std::env;
use std::path::{Path, PathBuf};

/// Get data directory with priority fallback. Empty values are ignored.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = env::var("SIGHTLINE_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        if !data_home.is_empty() {
            return PathBuf::from(data_home).join("sightline");
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".sightline");
    }

    env::temp_dir().join("sightline")
}

pub fn vars_path() -> PathBuf {
    data_dir().join("vars.json")
}

/// Template directory: `--templates`, then `SIGHTLINE_TEMPLATES`, then `./templates`.
pub fn templates_dir(flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    match env::var("SIGHTLINE_TEMPLATES") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("templates"),
    }
}

/// Ensure `dir` exists, private to the current user on Unix.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
