use std::path::{Path, PathBuf};

/// XDG app name used for user-level paths.
pub const APP_NAME: &str = "qad";

/// Project-local config directory name.
pub const PROJECT_DIR: &str = ".qad";

/// Resolve the user config directory (`~/.config/qad` on Linux).
///
/// Returns None when no home directory can be determined (e.g. in containers).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path to the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Path to the project-level config file under `project_root`.
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR).join("config.toml")
}
