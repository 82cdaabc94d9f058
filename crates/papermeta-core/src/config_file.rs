use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub extraction: Option<ExtractionConfig>,
    pub retry: Option<RetryConfig>,
    pub state: Option<StateConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub gemini_api_key: Option<String>,
    pub model: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    pub dir: Option<String>,
}

/// Platform config directory path: `<config_dir>/papermeta/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("papermeta").join("config.toml"))
}

/// Load config by cascading CWD `.papermeta.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".papermeta.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn pick<T>(overlay: Option<T>, base: Option<T>) -> Option<T> {
    overlay.or(base)
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (base_api, over_api) = (base.api.unwrap_or_default(), overlay.api.unwrap_or_default());
    let (base_ext, over_ext) = (
        base.extraction.unwrap_or_default(),
        overlay.extraction.unwrap_or_default(),
    );
    let (base_retry, over_retry) = (
        base.retry.unwrap_or_default(),
        overlay.retry.unwrap_or_default(),
    );
    let (base_state, over_state) = (
        base.state.unwrap_or_default(),
        overlay.state.unwrap_or_default(),
    );

    ConfigFile {
        api: Some(ApiConfig {
            gemini_api_key: pick(over_api.gemini_api_key, base_api.gemini_api_key),
            model: pick(over_api.model, base_api.model),
            request_timeout_secs: pick(
                over_api.request_timeout_secs,
                base_api.request_timeout_secs,
            ),
        }),
        extraction: Some(ExtractionConfig {
            max_pages: pick(over_ext.max_pages, base_ext.max_pages),
        }),
        retry: Some(RetryConfig {
            max_attempts: pick(over_retry.max_attempts, base_retry.max_attempts),
            base_delay_secs: pick(over_retry.base_delay_secs, base_retry.base_delay_secs),
            max_delay_secs: pick(over_retry.max_delay_secs, base_retry.max_delay_secs),
        }),
        state: Some(StateConfig {
            dir: pick(over_state.dir, base_state.dir),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_parses() {
        let toml_str = "[api]\nmodel = \"gemini-2.5-pro\"\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.api.unwrap().model.unwrap(), "gemini-2.5-pro");
        assert!(parsed.retry.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            api: Some(ApiConfig {
                model: Some("base-model".into()),
                request_timeout_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            api: Some(ApiConfig {
                model: Some("overlay-model".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let api = merged.api.unwrap();
        assert_eq!(api.model.unwrap(), "overlay-model");
        // Base value survives when the overlay leaves it unset
        assert_eq!(api.request_timeout_secs, Some(30));
    }

    #[test]
    fn merge_base_preserved_when_overlay_absent() {
        let base = ConfigFile {
            retry: Some(RetryConfig {
                max_attempts: Some(5),
                ..Default::default()
            }),
            state: Some(StateConfig {
                dir: Some("/var/lib/papermeta".into()),
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.retry.unwrap().max_attempts, Some(5));
        assert_eq!(merged.state.unwrap().dir.unwrap(), "/var/lib/papermeta");
    }

    #[test]
    fn load_from_path_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_path(&dir.path().join("absent.toml")).is_none());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "this is = = not toml").unwrap();
        assert!(load_from_path(&bad).is_none());

        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[extraction]\nmax_pages = 2\n").unwrap();
        let parsed = load_from_path(&good).unwrap();
        assert_eq!(parsed.extraction.unwrap().max_pages, Some(2));
    }
}
