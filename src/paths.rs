/// Platform-specific locations for the graph database, vector index and config file
///
/// Follows the XDG Base Directory layout on Unix-like systems.
use std::path::PathBuf;

const APP_DIR: &str = "repo-graph";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

/// Resolve a base directory.
///
/// Windows reads `windows_var`; macOS uses `$HOME/<mac_suffix>`; everything else
/// reads `xdg_var` and falls back to `$HOME/<unix_suffix>`.
fn base_dir(windows_var: &str, mac_suffix: &str, xdg_var: &str, unix_suffix: &str) -> PathBuf {
    let home_join = |suffix: &str| std::env::var("HOME").map(|home| PathBuf::from(home).join(suffix));

    let resolved = if cfg!(target_os = "windows") {
        std::env::var(windows_var).map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        home_join(mac_suffix)
    } else {
        std::env::var(xdg_var)
            .map(PathBuf::from)
            .or_else(|_| home_join(unix_suffix))
    };
    resolved.unwrap_or_else(|_| PathBuf::from("."))
}

impl PlatformPaths {
    /// `%LOCALAPPDATA%`, `~/Library/Application Support`, or `$XDG_DATA_HOME` / `~/.local/share`
    pub fn data_dir() -> PathBuf {
        base_dir(
            "LOCALAPPDATA",
            "Library/Application Support",
            "XDG_DATA_HOME",
            ".local/share",
        )
    }

    /// `%APPDATA%`, `~/Library/Application Support`, or `$XDG_CONFIG_HOME` / `~/.config`
    pub fn config_dir() -> PathBuf {
        base_dir(
            "APPDATA",
            "Library/Application Support",
            "XDG_CONFIG_HOME",
            ".config",
        )
    }

    pub fn app_data_dir() -> PathBuf {
        Self::data_dir().join(APP_DIR)
    }

    pub fn app_config_dir() -> PathBuf {
        Self::config_dir().join(APP_DIR)
    }

    /// Embedded graph database file: `{data_dir}/repo-graph/graph.sqlite`
    pub fn default_sqlite_path() -> PathBuf {
        Self::app_data_dir().join("graph.sqlite")
    }

    /// Embedded vector index directory: `{data_dir}/repo-graph/lancedb`
    pub fn default_lancedb_path() -> PathBuf {
        Self::app_data_dir().join("lancedb")
    }

    /// `{config_dir}/repo-graph/config.toml`
    pub fn default_config_path() -> PathBuf {
        Self::app_config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_dirs_not_empty() {
        assert!(!PlatformPaths::data_dir().as_os_str().is_empty());
        assert!(!PlatformPaths::config_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_app_dirs_are_namespaced() {
        assert!(PlatformPaths::app_data_dir().ends_with(APP_DIR));
        assert!(PlatformPaths::app_config_dir().ends_with(APP_DIR));
    }

    #[test]
    fn test_store_paths_live_under_data_dir() {
        let data = PlatformPaths::app_data_dir();
        assert!(PlatformPaths::default_sqlite_path().starts_with(&data));
        assert!(PlatformPaths::default_lancedb_path().starts_with(&data));
        assert_eq!(
            PlatformPaths::default_sqlite_path().file_name().unwrap(),
            "graph.sqlite"
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = PlatformPaths::default_config_path();
        assert!(path.starts_with(PlatformPaths::app_config_dir()));
        assert_eq!(path.extension().unwrap(), "toml");
    }

    #[test]
    #[cfg(all(unix, not(target_os = "macos")))]
    fn test_unix_fallback_uses_home_suffix() {
        let resolved = base_dir("UNUSED", "unused", "REPO_GRAPH_TEST_UNSET_XDG", ".local/share");
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(resolved, PathBuf::from(home).join(".local/share"));
        }
    }
}
