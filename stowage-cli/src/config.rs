use std::path::{Path, PathBuf};

use stowage_engine::StowageConfig;
use tracing::debug;

use crate::error::{AppError, Result};

const CONFIG_FILE: &str = "config.toml";

/// `<config dir>/stowage/config.toml`, e.g. `~/.config/stowage/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stowage").join(CONFIG_FILE))
}

/// Loads the configuration from `path`, or from the default location when it
/// exists, or falls back to built-in defaults.
pub fn load(path: Option<&Path>) -> Result<StowageConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => path,
            None => {
                debug!("No config file, using defaults");
                return Ok(StowageConfig::default());
            }
        },
    };

    let text = std::fs::read_to_string(&path).map_err(|source| AppError::ReadFile {
        path: path.clone(),
        source,
    })?;
    let config = parse(&text, &path)?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

fn parse(text: &str, path: &Path) -> Result<StowageConfig> {
    toml::from_str(text).map_err(|source| AppError::Config {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stowage_engine::TransferConfig;

    #[test]
    fn test_parse_full_file() {
        let text = r#"
exclude_vp9 = false
retry_limit = 5
retry_backoff_ms = 500
concurrency = 2
disk_space_floor = 10737418240
output_dir = "/srv/titles"

[api]
base_url = "https://api.example.com/"
metadata_path = "v1/titles/{id}"
timeout_secs = 10

[api.headers]
Authorization = "Bearer abc"

[transfer]
kind = "command"
program = "aria2c"
args = ["--quiet", "-o", "{output}", "{url}"]
"#;
        let config = parse(text, Path::new("config.toml")).unwrap();
        assert!(!config.exclude_vp9);
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.disk_space_floor, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.output_dir, PathBuf::from("/srv/titles"));
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(config.api.headers["Authorization"], "Bearer abc");
        assert!(matches!(
            config.transfer,
            TransferConfig::Command { ref program, .. } if program == "aria2c"
        ));
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = parse("", Path::new("config.toml")).unwrap();
        assert_eq!(config, StowageConfig::default());
    }

    #[test]
    fn test_bad_file_names_the_path() {
        let err =
            parse("retry_limit = \"three\"", Path::new("/etc/stowage.toml")).unwrap_err();
        assert!(err.to_string().contains("/etc/stowage.toml"));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.toml");
        std::fs::write(&path, "concurrency = 9\n").unwrap();
        assert_eq!(load(Some(&path)).unwrap().concurrency, 9);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            load(Some(&missing)),
            Err(AppError::ReadFile { .. })
        ));
    }
}
