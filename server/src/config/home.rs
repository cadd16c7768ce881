//! Portico home directory resolution.
//!
//! Search order:
//! 1. `PORTICO_HOME` environment variable, if set and non-empty
//! 2. `~/.portico`, if it is a directory
//! 3. `/etc/portico`

use std::path::PathBuf;

/// Environment variable overriding the home directory.
pub const HOME_VARIABLE: &str = "PORTICO_HOME";

/// Home used when neither the variable nor `~/.portico` exist.
pub const SYSTEM_HOME: &str = "/etc/portico";

/// Name of the per-user home directory under the user's home.
const USER_HOME_NAME: &str = ".portico";

/// Resolve the Portico home directory for this process.
///
/// The directory is not required to exist; a missing home simply means every
/// optional file inside it is absent.
#[must_use]
pub fn resolve_home() -> PathBuf {
    let user_home = directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(USER_HOME_NAME));
    let home = resolve_home_from(std::env::var_os(HOME_VARIABLE), user_home);
    tracing::info!("Portico home directory: {}", home.display());
    home
}

fn resolve_home_from(variable: Option<std::ffi::OsString>, user_home: Option<PathBuf>) -> PathBuf {
    if let Some(value) = variable.filter(|v| !v.is_empty()) {
        return PathBuf::from(value);
    }

    if let Some(dir) = user_home.filter(|dir| dir.is_dir()) {
        return dir;
    }

    PathBuf::from(SYSTEM_HOME)
}
