//! Battle storage
//!
//! The runner reads battles from, and writes traces to, a [`BattleStore`].
//! [`FileStore`] keeps both as plain files under one root directory.

use anyhow::{Context, Result};
use battle_engine::BattleConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A battle as persisted by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBattle {
    /// Battle id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Architectures bots are allowed to use
    pub archs: Vec<String>,
    /// Bit widths bots are allowed to use
    pub bits: Vec<u32>,
    /// What the engine runs
    pub config: BattleConfig,
}

/// Source of battles and sink of their traces
pub trait BattleStore: Sync {
    /// Load a battle with all of its bots
    fn load_battle(&self, id: u64) -> Result<StoredBattle>;

    /// Replace the stored trace of a battle
    fn save_trace(&self, id: u64, trace: &str) -> Result<()>;

    /// Currently stored trace of a battle, if any
    fn load_trace(&self, id: u64) -> Result<Option<String>>;
}

/// Directory-backed store
///
/// ```text
/// <root>/battles/<id>.json
/// <root>/traces/<id>.log
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn battle_path(&self, id: u64) -> PathBuf {
        self.root.join("battles").join(format!("{}.json", id))
    }

    fn trace_path(&self, id: u64) -> PathBuf {
        self.root.join("traces").join(format!("{}.log", id))
    }

    /// Write a battle definition
    pub fn save_battle(&self, battle: &StoredBattle) -> Result<()> {
        let path = self.battle_path(battle.id);
        let json = serde_json::to_string_pretty(battle).context("Failed to serialize battle")?;
        write_atomically(&path, json.as_bytes())
    }
}

impl BattleStore for FileStore {
    fn load_battle(&self, id: u64) -> Result<StoredBattle> {
        let path = self.battle_path(id);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read battle file: {:?}", path))?;
        let battle: StoredBattle = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse battle from {:?}", path))?;
        if battle.id != id {
            anyhow::bail!("Battle file {:?} holds battle {}", path, battle.id);
        }
        Ok(battle)
    }

    fn save_trace(&self, id: u64, trace: &str) -> Result<()> {
        write_atomically(&self.trace_path(id), trace.as_bytes())
    }

    fn load_trace(&self, id: u64) -> Result<Option<String>> {
        let path = self.trace_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let trace = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read trace file: {:?}", path))?;
        Ok(Some(trace))
    }
}

/// Write to a uniquely named temp file in the same directory, then rename
/// it over the target
///
/// Concurrent writers of the same path each get their own temp file; the
/// last rename wins and readers only ever see a complete file.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("No parent directory for {:?}", path))?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temp file in {:?}", dir))?;
    tmp.write_all(contents)
        .with_context(|| format!("Failed to write {:?}", tmp.path()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to move temp file into place at {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use battle_engine::BotSpec;

    fn sample(id: u64) -> StoredBattle {
        StoredBattle {
            id,
            name: "first blood".to_string(),
            archs: vec!["x86".to_string()],
            bits: vec![32],
            config: BattleConfig {
                arena_size: 4096,
                max_rounds: 10,
                bots: vec![BotSpec::new(1, "spinner", "jmp $", "x86", 32)],
            },
        }
    }

    #[test]
    fn test_battle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_battle(&sample(3)).unwrap();

        assert_eq!(store.load_battle(3).unwrap(), sample(3));
        assert!(store.load_battle(4).is_err());
    }

    #[test]
    fn test_trace_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.load_trace(1).unwrap(), None);

        store.save_trace(1, "first").unwrap();
        store.save_trace(1, "second").unwrap();
        assert_eq!(store.load_trace(1).unwrap().as_deref(), Some("second"));

        let left: Vec<_> = fs::read_dir(dir.path().join("traces"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from("1.log")]);
    }

    #[test]
    fn test_concurrent_saves_of_one_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let traces: Vec<String> = (0..8).map(|i| format!("trace from writer {}\n", i).repeat(64)).collect();

        for _ in 0..20 {
            let store = &store;
            std::thread::scope(|scope| {
                let handles: Vec<_> = traces
                    .iter()
                    .map(|trace| scope.spawn(move || store.save_trace(1, trace)))
                    .collect();
                for handle in handles {
                    handle.join().unwrap().unwrap();
                }
            });

            let stored = store.load_trace(1).unwrap().unwrap();
            assert!(traces.contains(&stored), "torn trace: {:?}", &stored[..40]);
        }
    }

    #[test]
    fn test_mismatched_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_battle(&sample(5)).unwrap();
        fs::rename(store.battle_path(5), store.battle_path(6)).unwrap();

        assert!(store.load_battle(6).is_err());
    }
}
