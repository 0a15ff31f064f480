//! Optimistic mutation bookkeeping.
//!
//! A [`Tracked`] value moves `Clean -> Pending -> Committed | RolledBack`.
//! Each pending write carries a fresh id so a late answer to an older
//! request cannot commit or revert a newer one.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use anyhow::Context;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState<T> {
    Clean,
    Pending { id: Uuid, previous: T },
    Committed,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct Tracked<T> {
    value: T,
    state: MutationState<T>,
}

impl<T: Clone> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            state: MutationState::Clean,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn state(&self) -> &MutationState<T> {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, MutationState::Pending { .. })
    }

    /// Shows `optimistic` right away and remembers what to restore. A
    /// second `begin` while pending keeps the oldest snapshot.
    pub fn begin(&mut self, optimistic: T) -> Uuid {
        let id = Uuid::new_v4();
        let previous = match std::mem::replace(&mut self.state, MutationState::Clean) {
            MutationState::Pending { previous, .. } => previous,
            _ => self.value.clone(),
        };
        self.value = optimistic;
        self.state = MutationState::Pending { id, previous };
        debug!(%id, "mutation pending");
        id
    }

    /// Adopts the server's value. Returns false for a stale or unknown id.
    pub fn commit(&mut self, id: Uuid, server_value: T) -> bool {
        if !self.owns(id) {
            warn!(%id, "ignoring commit for stale mutation");
            return false;
        }
        self.value = server_value;
        self.state = MutationState::Committed;
        debug!(%id, "mutation committed");
        true
    }

    /// Restores the value from before `begin`. Returns false for a stale
    /// or unknown id.
    pub fn rollback(&mut self, id: Uuid) -> bool {
        if !self.owns(id) {
            warn!(%id, "ignoring rollback for stale mutation");
            return false;
        }
        if let MutationState::Pending { previous, .. } = std::mem::replace(&mut self.state, MutationState::RolledBack)
        {
            self.value = previous;
        }
        debug!(%id, "mutation rolled back");
        true
    }

    fn owns(&self, id: Uuid) -> bool {
        matches!(&self.state, MutationState::Pending { id: pending, .. } if *pending == id)
    }
}

/// Guard against firing a second toggle for the same habit and day while
/// the first is still out.
///
/// In-memory by default. With a marker directory every claim also creates
/// an exclusive marker file there, so a second process sharing the data
/// directory is refused too. Markers are removed on `finish` or drop.
#[derive(Debug, Default)]
pub struct InFlight {
    marker_dir: Option<PathBuf>,
    keys: BTreeMap<(String, String), Option<NamedTempFile>>,
}

impl InFlight {
    pub fn with_marker_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            marker_dir: Some(dir.into()),
            keys: BTreeMap::new(),
        }
    }

    /// Claims `(habit_id, date)`. `Ok(false)` when it is already claimed
    /// here or by another process.
    pub fn try_begin(&mut self, habit_id: &str, date: &str) -> anyhow::Result<bool> {
        let key = (habit_id.to_string(), date.to_string());
        if self.keys.contains_key(&key) {
            debug!(habit = %habit_id, %date, "toggle already in flight");
            return Ok(false);
        }

        let marker = match &self.marker_dir {
            Some(dir) => {
                let name = marker_name(habit_id, date);
                let created = Builder::new()
                    .prefix(&name)
                    .suffix(".inflight")
                    .rand_bytes(0)
                    .tempfile_in(dir);
                match created {
                    Ok(file) => Some(file),
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                        debug!(habit = %habit_id, %date, "toggle in flight in another process");
                        return Ok(false);
                    }
                    Err(err) => {
                        return Err(err).with_context(|| format!("failed to create marker in {}", dir.display()));
                    }
                }
            }
            None => None,
        };

        self.keys.insert(key, marker);
        Ok(true)
    }

    pub fn finish(&mut self, habit_id: &str, date: &str) {
        if let Some(Some(marker)) = self.keys.remove(&(habit_id.to_string(), date.to_string()))
            && let Err(err) = marker.close()
        {
            warn!(habit = %habit_id, %date, error = %err, "failed to remove in-flight marker");
        }
    }

    pub fn is_in_flight(&self, habit_id: &str, date: &str) -> bool {
        self.keys.contains_key(&(habit_id.to_string(), date.to_string()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn marker_name(habit_id: &str, date: &str) -> String {
    let safe: String = habit_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("toggle-{safe}-{date}")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{InFlight, MutationState, Tracked};

    #[test]
    fn commit_adopts_server_value() {
        let mut tracked = Tracked::new(1);
        let id = tracked.begin(2);
        assert_eq!(*tracked.value(), 2);
        assert!(tracked.is_pending());

        assert!(tracked.commit(id, 3));
        assert_eq!(*tracked.value(), 3);
        assert_eq!(tracked.state(), &MutationState::Committed);
    }

    #[test]
    fn rollback_restores_previous() {
        let mut tracked = Tracked::new("old".to_string());
        let id = tracked.begin("new".to_string());
        assert!(tracked.rollback(id));
        assert_eq!(tracked.value(), "old");
        assert_eq!(tracked.state(), &MutationState::RolledBack);
        assert!(!tracked.rollback(id));
    }

    #[test]
    fn stale_ids_are_ignored() {
        let mut tracked = Tracked::new(0);
        let first = tracked.begin(1);
        let second = tracked.begin(2);

        assert!(!tracked.commit(first, 99));
        assert_eq!(*tracked.value(), 2);

        assert!(tracked.rollback(second));
        assert_eq!(*tracked.value(), 0);
    }

    #[test]
    fn in_flight_blocks_duplicates() {
        let mut guard = InFlight::default();
        assert!(guard.try_begin("h1", "2024-03-01").expect("claim"));
        assert!(!guard.try_begin("h1", "2024-03-01").expect("claim"));
        assert!(guard.try_begin("h1", "2024-03-02").expect("claim"));
        assert_eq!(guard.len(), 2);

        guard.finish("h1", "2024-03-01");
        assert!(!guard.is_in_flight("h1", "2024-03-01"));
        assert!(guard.try_begin("h1", "2024-03-01").expect("claim"));
    }

    #[test]
    fn marker_dir_blocks_a_second_guard() {
        let temp = tempdir().expect("tempdir");
        let mut first = InFlight::with_marker_dir(temp.path());
        let mut second = InFlight::with_marker_dir(temp.path());

        assert!(first.try_begin("h/1", "2024-03-01").expect("first claim"));
        assert!(!second.try_begin("h/1", "2024-03-01").expect("second claim"));
        assert!(second.try_begin("h/1", "2024-03-02").expect("other day"));

        first.finish("h/1", "2024-03-01");
        assert!(second.try_begin("h/1", "2024-03-01").expect("after finish"));

        drop(second);
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }
}
