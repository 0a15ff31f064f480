use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, error, instrument};

pub const PAGE_KEY: &str = "cesta.page";
pub const PANEL_SECTION_KEY: &str = "cesta.panel_section";
pub const SIDEBAR_WIDTH_KEY: &str = "cesta.sidebar_width";

pub const DEFAULT_PAGE: &str = "main";
pub const DEFAULT_PANEL_SECTION: &str = "overview";
pub const DEFAULT_SIDEBAR_WIDTH: u32 = 320;
pub const MIN_SIDEBAR_WIDTH: u32 = 200;
pub const MAX_SIDEBAR_WIDTH: u32 = 640;

/// String key/value persistence for process-wide UI state.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object on disk, rewritten atomically on every `set`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    #[instrument(skip_all)]
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path).with_context(|| format!("failed reading {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&raw) {
                    Ok(entries) => entries,
                    Err(err) => {
                        error!(file = %path.display(), error = %err, "ui state file is corrupt; starting empty");
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };
        debug!(count = entries.len(), "opened ui state store");
        Ok(Self { path, entries })
    }

    fn persist(&self) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, &self.entries)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }
}

/// Where the user is in the app: page, side-panel section, sidebar width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavState {
    pub page: String,
    pub panel_section: String,
    pub sidebar_width: u32,
}

impl Default for NavState {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE.to_string(),
            panel_section: DEFAULT_PANEL_SECTION.to_string(),
            sidebar_width: DEFAULT_SIDEBAR_WIDTH,
        }
    }
}

pub fn clamp_sidebar_width(width: u32) -> u32 {
    width.clamp(MIN_SIDEBAR_WIDTH, MAX_SIDEBAR_WIDTH)
}

impl NavState {
    /// Reads saved state; missing or malformed entries fall back to defaults.
    #[instrument(skip(store))]
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let mut state = Self::default();

        if let Some(page) = read_key(store, PAGE_KEY).filter(|v| !v.trim().is_empty()) {
            state.page = page;
        }
        if let Some(section) = read_key(store, PANEL_SECTION_KEY).filter(|v| !v.trim().is_empty()) {
            state.panel_section = section;
        }
        if let Some(raw) = read_key(store, SIDEBAR_WIDTH_KEY) {
            match raw.trim().parse::<u32>() {
                Ok(width) => state.sidebar_width = clamp_sidebar_width(width),
                Err(err) => error!(value = %raw, error = %err, "stored sidebar width is not a number"),
            }
        }

        debug!(?state, "loaded navigation state");
        state
    }

    #[instrument(skip(self, store))]
    pub fn save(&self, store: &mut dyn KeyValueStore) -> anyhow::Result<()> {
        store.set(PAGE_KEY, &self.page)?;
        store.set(PANEL_SECTION_KEY, &self.panel_section)?;
        store.set(SIDEBAR_WIDTH_KEY, &clamp_sidebar_width(self.sidebar_width).to_string())?;
        Ok(())
    }

    /// Applies `key=value` edits (`page`, `section`, `width`). Returns
    /// whether anything changed.
    pub fn apply_edit(&mut self, edit: &str) -> anyhow::Result<bool> {
        let (key, value) = edit
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {edit}"))?;
        let value = value.trim();
        let before = self.clone();
        match key.trim() {
            "page" => self.page = value.to_string(),
            "section" | "panel_section" => self.panel_section = value.to_string(),
            "width" | "sidebar_width" => {
                let width: u32 = value
                    .parse()
                    .with_context(|| format!("invalid sidebar width: {value}"))?;
                self.sidebar_width = clamp_sidebar_width(width);
            }
            other => return Err(anyhow!("unknown navigation key: {other}")),
        }
        Ok(*self != before)
    }
}

fn read_key(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(err) => {
            error!(key, error = %err, "failed reading ui state");
            None
        }
    }
}
