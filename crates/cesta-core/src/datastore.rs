use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::goals::{Area, Goal};
use crate::habit::Habit;
use crate::steps::DailyStep;
use crate::sync::InFlight;
use crate::ui_state::FileStore;

/// Local snapshot of backend collections, one JSON array per file.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub habits_path: PathBuf,
    pub steps_path: PathBuf,
    pub goals_path: PathBuf,
    pub areas_path: PathBuf,
    pub ui_state_path: PathBuf,
    pub in_flight_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).with_context(|| format!("failed to create {}", data_dir.display()))?;

        let store = Self {
            habits_path: data_dir.join("habits.json"),
            steps_path: data_dir.join("steps.json"),
            goals_path: data_dir.join("goals.json"),
            areas_path: data_dir.join("areas.json"),
            ui_state_path: data_dir.join("ui-state.json"),
            in_flight_dir: data_dir.join("in-flight"),
            data_dir,
        };

        info!(
            data_dir = %store.data_dir.display(),
            habits = %store.habits_path.display(),
            steps = %store.steps_path.display(),
            "opened datastore"
        );
        Ok(store)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_habits(&self) -> anyhow::Result<Vec<Habit>> {
        load_json_array(&self.habits_path).context("failed to load habits.json")
    }

    #[tracing::instrument(skip(self, habits))]
    pub fn save_habits(&self, habits: &[Habit]) -> anyhow::Result<()> {
        save_json_atomic(&self.habits_path, habits).context("failed to save habits.json")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_steps(&self) -> anyhow::Result<Vec<DailyStep>> {
        load_json_array(&self.steps_path).context("failed to load steps.json")
    }

    #[tracing::instrument(skip(self, steps))]
    pub fn save_steps(&self, steps: &[DailyStep]) -> anyhow::Result<()> {
        save_json_atomic(&self.steps_path, steps).context("failed to save steps.json")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_goals(&self) -> anyhow::Result<Vec<Goal>> {
        load_json_array(&self.goals_path).context("failed to load goals.json")
    }

    #[tracing::instrument(skip(self, goals))]
    pub fn save_goals(&self, goals: &[Goal]) -> anyhow::Result<()> {
        save_json_atomic(&self.goals_path, goals).context("failed to save goals.json")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_areas(&self) -> anyhow::Result<Vec<Area>> {
        load_json_array(&self.areas_path).context("failed to load areas.json")
    }

    pub fn ui_store(&self) -> anyhow::Result<FileStore> {
        FileStore::open(&self.ui_state_path)
    }

    /// Toggle guard shared by every process using this data directory.
    pub fn in_flight(&self) -> anyhow::Result<InFlight> {
        fs::create_dir_all(&self.in_flight_dir)
            .with_context(|| format!("failed to create {}", self.in_flight_dir.display()))?;
        Ok(InFlight::with_marker_dir(&self.in_flight_dir))
    }
}

#[tracing::instrument(skip(path))]
fn load_json_array<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        debug!(file = %path.display(), "collection file missing; treating as empty");
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let out: Vec<T> = serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))?;
    debug!(file = %path.display(), count = out.len(), "loaded collection");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_json_atomic<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving collection atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, rows)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
