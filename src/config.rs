use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PaperError;
use crate::summary::client::{DEFAULT_API_BASE, DEFAULT_MODEL};

pub const CONFIG_FILE_NAME: &str = "chatre.toml";
/// Extra key appended to the configured ones when set.
pub const API_KEY_ENV: &str = "OPENAI_KEY";
/// Keys written into a fresh config file; replaced by the first real key.
pub const PLACEHOLDER_KEYS: [&str; 2] = ["sk-key1", "sk-key2"];

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "OpenAI", default)]
    pub openai: OpenAiSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiSettings {
    #[serde(rename = "OPENAI_API_KEYS", default)]
    pub api_keys: Vec<String>,
    #[serde(rename = "OPENAI_API_BASE", default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(rename = "MODEL", default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "TIMEOUT_SECS", default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Settings {
    /// Contents of a freshly generated config file.
    pub fn template() -> Self {
        Self {
            openai: OpenAiSettings {
                api_keys: PLACEHOLDER_KEYS.iter().map(|k| k.to_string()).collect(),
                ..OpenAiSettings::default()
            },
        }
    }

    pub fn api_base(&self) -> &str {
        self.openai.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn model(&self) -> &str {
        self.openai.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Configured keys followed by the environment key, if any.
    pub fn api_keys(&self, env_key: Option<&str>) -> Vec<String> {
        let mut keys = self.openai.api_keys.clone();
        if let Some(key) = env_key.map(str::trim).filter(|k| !k.is_empty()) {
            keys.push(key.to_string());
        }
        keys
    }

    fn has_placeholder_keys(&self) -> bool {
        self.openai.api_keys.iter().map(String::as_str).eq(PLACEHOLDER_KEYS.iter().copied())
    }
}

/// Where config files are looked up, in order.
#[derive(Debug, Clone)]
pub struct ConfigLocations {
    pub local: PathBuf,
    pub global: Option<PathBuf>,
}

impl ConfigLocations {
    /// `./chatre.toml`, then `~/.config/chatre.toml`.
    pub fn discover() -> Self {
        Self {
            local: PathBuf::from(CONFIG_FILE_NAME),
            global: dirs::home_dir().map(|home| home.join(".config").join(CONFIG_FILE_NAME)),
        }
    }

    pub fn in_dirs(cwd: &Path, home: Option<&Path>) -> Self {
        Self {
            local: cwd.join(CONFIG_FILE_NAME),
            global: home.map(|h| h.join(".config").join(CONFIG_FILE_NAME)),
        }
    }

    /// First config file that exists.
    pub fn existing(&self) -> Option<&Path> {
        std::iter::once(self.local.as_path())
            .chain(self.global.as_deref())
            .find(|p| p.is_file())
    }
}

pub fn read_settings(path: &Path) -> Result<Settings, PaperError> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| PaperError::Config(format!("{}: {}", path.display(), e)))
}

pub fn write_settings(path: &Path, settings: &Settings) -> Result<(), PaperError> {
    let raw = toml::to_string_pretty(settings).map_err(|e| PaperError::Config(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, raw)?;
    Ok(())
}

/// Load settings from an explicit file, or the first one found. Missing
/// files give empty settings; the key check happens when the pool is built.
pub fn load_settings(explicit: Option<&Path>, locations: &ConfigLocations) -> Result<Settings, PaperError> {
    let path = match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(PaperError::Config(format!("config file {} not found", path.display())));
            }
            Some(path)
        }
        None => locations.existing(),
    };
    match path {
        Some(path) => {
            debug!("Reading config from {}", path.display());
            read_settings(path)
        }
        None => {
            warn!("No {} found; run `papersum config` to create one", CONFIG_FILE_NAME);
            Ok(Settings::default())
        }
    }
}

/// Write the template config into the local location.
pub fn create_default(locations: &ConfigLocations) -> Result<PathBuf, PaperError> {
    write_settings(&locations.local, &Settings::template())?;
    info!("{} created", locations.local.display());
    Ok(locations.local.clone())
}

/// Apply `KEY=value` pairs to the first existing config file (or a new local
/// one). `OPENAI_API_KEY` appends a key, replacing the placeholder keys.
pub fn set_values(pairs: &[String], locations: &ConfigLocations) -> Result<PathBuf, PaperError> {
    let (mut settings, path) = match locations.existing() {
        Some(path) => (read_settings(path)?, path.to_path_buf()),
        None => (Settings::template(), locations.local.clone()),
    };

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| PaperError::Config(format!("expected KEY=value, got '{}'", pair)))?;
        let value = value.trim().to_string();
        match key.trim() {
            "OPENAI_API_KEY" => {
                if settings.has_placeholder_keys() {
                    settings.openai.api_keys.clear();
                }
                settings.openai.api_keys.push(value);
            }
            "OPENAI_API_BASE" => settings.openai.api_base = Some(value),
            "MODEL" => settings.openai.model = Some(value),
            other => {
                return Err(PaperError::Config(format!(
                    "unknown key '{}', expected one of OPENAI_API_KEY, OPENAI_API_BASE, MODEL",
                    other
                )))
            }
        }
    }

    write_settings(&path, &settings)?;
    info!("Updated {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings_ignores_other_sections() {
        let raw = r#"
[OpenAI]
OPENAI_API_KEYS = ["sk-aaaaaaaaaaaaaaaaaaaaaaaa"]
MODEL = "gpt-4o-mini"

[Gitee]
api = "x"
"#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.openai.api_keys.len(), 1);
        assert_eq!(settings.model(), "gpt-4o-mini");
        assert_eq!(settings.api_base(), DEFAULT_API_BASE);
    }

    #[test]
    fn test_env_key_appended() {
        let settings = Settings::template();
        let keys = settings.api_keys(Some(" sk-from-env-0000000000000 "));
        assert_eq!(keys.last().map(String::as_str), Some("sk-from-env-0000000000000"));
        assert_eq!(settings.api_keys(Some("")).len(), 2);
    }

    #[test]
    fn test_set_replaces_placeholder_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let locations = ConfigLocations::in_dirs(dir.path(), None);
        create_default(&locations).unwrap();
        assert!(read_settings(&locations.local).unwrap().has_placeholder_keys());

        set_values(&["OPENAI_API_KEY=sk-first-00000000000000000".into()], &locations).unwrap();
        set_values(&["OPENAI_API_KEY=sk-second-0000000000000000".into()], &locations).unwrap();
        let settings = read_settings(&locations.local).unwrap();
        assert_eq!(
            settings.openai.api_keys,
            vec!["sk-first-00000000000000000", "sk-second-0000000000000000"]
        );
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let locations = ConfigLocations::in_dirs(dir.path(), None);
        let err = set_values(&["GITEE=abc".into()], &locations).unwrap_err();
        assert!(matches!(err, PaperError::Config(_)));
    }

    #[test]
    fn test_global_config_used_when_no_local() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let locations = ConfigLocations::in_dirs(cwd.path(), Some(home.path()));
        let global = locations.global.clone().unwrap();
        write_settings(&global, &Settings::template()).unwrap();
        assert_eq!(locations.existing(), Some(global.as_path()));
        assert_eq!(load_settings(None, &locations).unwrap(), Settings::template());
    }
}
