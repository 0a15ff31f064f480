use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::datetime::{DEFAULT_PROJECT_TIMEZONE, TIMEZONE_ENV_VAR, parse_timezone};

pub const CONFIG_ENV_VAR: &str = "CESTA_CONFIG";
pub const CONFIG_FILE_NAME: &str = ".cesta.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timezone: String,
    pub locale: String,
    pub data_dir: Option<PathBuf>,
    pub color: bool,
    pub week_start: String,

    #[serde(skip)]
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_PROJECT_TIMEZONE.to_string(),
            locale: "en".to_string(),
            data_dir: None,
            color: true,
            week_start: "monday".to_string(),
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(config_override))]
    pub fn load(config_override: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = resolve_config_path(config_override)? else {
            warn!("no config file found; using defaults");
            return Ok(Self::default());
        };

        let path = expand_tilde(&path);
        info!(config = %path.display(), "loading config");
        let mut cfg = Self::from_file(&path)?;
        cfg.loaded_files.push(path);
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `key=value` overrides; keys may carry an `rc.` prefix.
    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.set(&key, &v)?;
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        match key {
            "timezone" => self.timezone = value.to_string(),
            "locale" => self.locale = value.to_string(),
            "data_dir" | "data.location" => self.data_dir = Some(PathBuf::from(value)),
            "color" => self.color = parse_bool(value),
            "week_start" => self.week_start = value.to_string(),
            other => return Err(anyhow!("unknown config key: {other}")),
        }
        Ok(())
    }

    /// `CESTA_TIMEZONE` wins over the file; an unparseable id falls back to
    /// the built-in default.
    pub fn timezone(&self) -> Tz {
        if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
            && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
        {
            return tz;
        }
        parse_timezone(&self.timezone, "config")
            .or_else(|| parse_timezone(DEFAULT_PROJECT_TIMEZONE, "DEFAULT_PROJECT_TIMEZONE"))
            .unwrap_or(chrono_tz::UTC)
    }

    pub fn week_start(&self) -> Weekday {
        if self.week_start.trim().eq_ignore_ascii_case("sunday") {
            Weekday::Sun
        } else {
            Weekday::Mon
        }
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = &cfg.data_dir {
        expand_tilde(cfg_value)
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_config_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        if env_path == "/dev/null" || env_path.trim().is_empty() {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(env_path)));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let candidate = home.join(CONFIG_FILE_NAME);
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".cesta"))
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "y" | "yes" | "on" | "true")
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::Config;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = Config::from_toml("locale = \"cs\"\nweek_start = \"Sunday\"\n").expect("parse config");
        assert_eq!(cfg.locale, "cs");
        assert_eq!(cfg.week_start(), Weekday::Sun);
        assert!(cfg.color);
        assert_eq!(cfg.timezone, "Europe/Prague");
    }

    #[test]
    fn overrides_strip_rc_prefix() {
        let mut cfg = Config::default();
        cfg.apply_overrides(vec![
            ("rc.color".to_string(), "off".to_string()),
            ("timezone".to_string(), "America/New_York".to_string()),
        ])
        .expect("apply overrides");
        assert!(!cfg.color);
        assert_eq!(cfg.timezone, "America/New_York");

        assert!(cfg.apply_overrides(vec![("rc.nope".to_string(), "1".to_string())]).is_err());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(Config::from_toml("locale = [").is_err());
    }
}
