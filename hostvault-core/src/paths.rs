//! Platform-specific default locations for vaults and client state.

use std::path::PathBuf;

const APP_DIR: &str = "hostvault";

/// Data directory holding vault files and the device identity.
///
/// - Windows: `%LOCALAPPDATA%\hostvault`
/// - macOS: `~/Library/Application Support/hostvault`
/// - Linux: `~/.local/share/hostvault`
pub fn data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Config directory holding the server address and cached session token.
pub fn config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Default vault location.
pub fn default_vault_path() -> PathBuf {
    data_dir().join("vault.hv")
}

/// Ensure the data directory exists, creating it if necessary.
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Ensure the config directory exists, creating it if necessary.
pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_ends_with_app_dir() {
        assert!(data_dir().to_string_lossy().ends_with(APP_DIR));
    }

    #[test]
    fn config_dir_ends_with_app_dir() {
        assert!(config_dir().to_string_lossy().ends_with(APP_DIR));
    }

    #[test]
    fn default_vault_path_ends_with_vault_file() {
        assert!(default_vault_path()
            .to_string_lossy()
            .ends_with("vault.hv"));
    }
}
