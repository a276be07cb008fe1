/// Cross-platform directory management for aspect-hooks
///
/// Uses the `dirs` crate to handle platform-specific directories
/// following OS conventions:
/// - Linux/Unix: XDG Base Directory Specification
/// - macOS: Apple directory guidelines
/// - Windows: Windows directory standards
use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "aspect-hooks";

/// Name of the engine configuration file inside [`config_dir`]
pub const CONFIG_FILE: &str = "aspects.toml";

/// Get the data directory
///
/// - Linux: `$XDG_DATA_HOME/aspect-hooks` or `~/.local/share/aspect-hooks`
/// - macOS: `~/Library/Application Support/aspect-hooks`
/// - Windows: `%LOCALAPPDATA%\aspect-hooks`
pub fn data_dir() -> Result<PathBuf> {
    let base_dir =
        dirs::data_local_dir().ok_or_else(|| anyhow!("Unable to determine data directory"))?;
    Ok(base_dir.join(APP_DIR))
}

/// Get the config directory
///
/// - Linux: `$XDG_CONFIG_HOME/aspect-hooks` or `~/.config/aspect-hooks`
/// - macOS: `~/Library/Application Support/aspect-hooks`
/// - Windows: `%APPDATA%\aspect-hooks`
pub fn config_dir() -> Result<PathBuf> {
    let base_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("Unable to determine config directory"))?;
    Ok(base_dir.join(APP_DIR))
}

/// Default location of the engine configuration file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Directory for rolling log files
pub fn logs_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

/// Directory searched for scenario files given by bare name
pub fn scenarios_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("scenarios"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Initialize all required directories
pub fn init_directories() -> Result<()> {
    ensure_dir(&config_dir()?)?;
    ensure_dir(&logs_dir()?)?;
    ensure_dir(&scenarios_dir()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir() {
        let dir = data_dir().unwrap();
        assert!(dir.to_string_lossy().contains("aspect-hooks"));
    }

    #[test]
    fn test_platform_specific_paths() {
        let data = data_dir().unwrap();
        let config = config_dir().unwrap();

        if cfg!(target_os = "linux") {
            let data_str = data.to_string_lossy();
            let config_str = config.to_string_lossy();

            if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
                assert!(data_str.starts_with(&xdg_data),
                    "Data directory should start with XDG_DATA_HOME: {} but got: {}", xdg_data, data_str);
            } else if let Ok(home) = std::env::var("HOME") {
                let expected = format!("{}/.local/share", home);
                assert!(data_str.starts_with(&expected),
                    "Data directory should start with $HOME/.local/share: {} but got: {}", expected, data_str);
            }

            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                assert!(config_str.starts_with(&xdg_config),
                    "Config directory should start with XDG_CONFIG_HOME: {} but got: {}", xdg_config, config_str);
            } else if let Ok(home) = std::env::var("HOME") {
                let expected = format!("{}/.config", home);
                assert!(config_str.starts_with(&expected),
                    "Config directory should start with $HOME/.config: {} but got: {}", expected, config_str);
            }
        } else if cfg!(target_os = "windows") {
            assert!(data.to_string_lossy().contains("AppData"));
        }
    }

    #[test]
    fn test_subdirectories() {
        let logs = logs_dir().unwrap();
        let scenarios = scenarios_dir().unwrap();
        let config = config_file().unwrap();

        assert!(logs.ends_with("logs"));
        assert!(scenarios.ends_with("scenarios"));
        assert!(config.file_name().unwrap() == CONFIG_FILE);
    }

    #[test]
    fn test_ensure_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
