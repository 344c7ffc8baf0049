//! Q-table: best known action premise per observation
//!
//! Persisted as a versioned JSON document. Saving never destroys the
//! previous file before the new one is fully written: the old file is moved
//! to `<file>.tmp`, the new one written, and only then is the backup deleted.

use ahash::AHashMap;
use ordered_float::OrderedFloat;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt::Debug;
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::actions::premise::ActionPremise;
use crate::core::error::{Result, SubstrateError};

pub const TABLE_FORMAT_VERSION: u32 = 1;

/// Anything a perception can return and a table can key on
pub trait Observation:
    Hash + Eq + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Observation for T where
    T: Hash + Eq + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableEntry {
    pub premise: ActionPremise,
    /// Cumulative (discounted) loss; lower is better
    pub loss: f64,
}

#[derive(Serialize, Deserialize)]
struct QTableFile<E> {
    version: u32,
    entries: Vec<E>,
}

#[derive(Debug, Clone)]
pub struct QTable<O: Observation> {
    entries: AHashMap<O, QTableEntry>,
}

impl<O: Observation> Default for QTable<O> {
    fn default() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }
}

impl<O: Observation> PartialEq for QTable<O> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<O: Observation> QTable<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, observation: &O) -> Option<&QTableEntry> {
        self.entries.get(observation)
    }

    pub fn insert(&mut self, observation: O, entry: QTableEntry) -> Option<QTableEntry> {
        self.entries.insert(observation, entry)
    }

    /// Keep `premise` if the observation is new or its loss beats the stored one
    ///
    /// Ties keep the stored entry. Returns whether the table changed.
    pub fn offer(&mut self, observation: O, premise: ActionPremise, loss: f64) -> bool {
        match self.entries.get(&observation) {
            Some(existing) if existing.loss <= loss => false,
            _ => {
                self.entries.insert(observation, QTableEntry { premise, loss });
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&O, &QTableEntry)> {
        self.entries.iter()
    }

    /// Entries from lowest to highest loss
    pub fn ranked_entries(&self) -> Vec<(&O, &QTableEntry)> {
        let mut ranked: Vec<_> = self.entries.iter().collect();
        ranked.sort_by_key(|(_, entry)| OrderedFloat(entry.loss));
        ranked
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.save_with(path, |target, body| fs::write(target, body))
    }

    /// `save` with the final write step supplied by the caller
    fn save_with<W>(&self, path: &Path, write: W) -> Result<()>
    where
        W: FnOnce(&Path, &[u8]) -> std::io::Result<()>,
    {
        let file = QTableFile {
            version: TABLE_FORMAT_VERSION,
            entries: self.ranked_entries(),
        };
        // Serialize before touching the disk; a bad table must not cost the old file
        let body = serde_json::to_vec_pretty(&file)?;

        let backup = backup_path(path);
        let had_previous = path.exists();
        if had_previous {
            fs::rename(path, &backup)?;
        }

        match write(path, &body) {
            Ok(()) => {
                if had_previous {
                    fs::remove_file(&backup)?;
                }
                tracing::info!("Saved Q-table with {} entries to {}", self.len(), path.display());
                Ok(())
            }
            Err(write_err) => {
                let _ = fs::remove_file(path);
                if had_previous {
                    fs::rename(&backup, path).map_err(|restore_err| {
                        SubstrateError::Persistence(format!(
                            "writing {} failed ({}); restoring backup failed ({})",
                            path.display(),
                            write_err,
                            restore_err
                        ))
                    })?;
                }
                Err(SubstrateError::Persistence(format!(
                    "writing {} failed: {}",
                    path.display(),
                    write_err
                )))
            }
        }
    }

    /// Load a table; `Ok(None)` when neither the file nor its backup exists
    ///
    /// A lone `<file>.tmp` (crash between rename and write) is moved back
    /// into place. An unreadable file with a backup beside it (crash during
    /// the write) falls back to the backup.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let backup = backup_path(path);

        if !path.exists() {
            if !backup.exists() {
                tracing::info!("No Q-table at {}, starting cold", path.display());
                return Ok(None);
            }
            tracing::warn!("Recovering Q-table from backup {}", backup.display());
            fs::rename(&backup, path)?;
        }

        let table = match Self::read(path) {
            Ok(table) => table,
            Err(err) if backup.exists() => {
                tracing::warn!(
                    "Q-table {} unreadable ({}), recovering from backup",
                    path.display(),
                    err
                );
                fs::rename(&backup, path)?;
                Self::read(path)?
            }
            Err(err) => return Err(err),
        };

        tracing::info!("Loaded Q-table with {} entries from {}", table.len(), path.display());
        Ok(Some(table))
    }

    fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: QTableFile<(O, QTableEntry)> = serde_json::from_str(&text)?;
        if file.version != TABLE_FORMAT_VERSION {
            return Err(SubstrateError::Persistence(format!(
                "{} has format version {}, expected {}",
                path.display(),
                file.version,
                TABLE_FORMAT_VERSION
            )));
        }
        Ok(Self {
            entries: file.entries.into_iter().collect(),
        })
    }
}

/// `<file>.tmp` next to `path`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::mutable::MutableValue;
    use tempfile::tempdir;

    fn premise(action: &str) -> ActionPremise {
        let mut premise = ActionPremise::new();
        premise.push(action, vec![("speed".to_string(), MutableValue::Float(0.5))]);
        premise
    }

    fn sample_table() -> QTable<(i32, i32)> {
        let mut table = QTable::new();
        table.offer((0, 0), premise("north"), 3.0);
        table.offer((1, 0), premise("east"), 1.5);
        table.offer((0, 1), premise("rest"), -2.0);
        table
    }

    #[test]
    fn test_offer_keeps_lower_loss() {
        let mut table: QTable<u8> = QTable::new();
        assert!(table.offer(1, premise("a"), 5.0));
        assert!(table.offer(1, premise("b"), 2.0));
        assert!(!table.offer(1, premise("c"), 4.0));
        assert!(!table.offer(1, premise("d"), 2.0), "ties keep the stored entry");

        let entry = table.get(&1).unwrap();
        assert_eq!(entry.premise, premise("b"));
        assert_eq!(entry.loss, 2.0);
    }

    #[test]
    fn test_ranked_entries_sorted_by_loss() {
        let table = sample_table();
        let losses: Vec<f64> = table.ranked_entries().iter().map(|(_, e)| e.loss).collect();
        assert_eq!(losses, vec![-2.0, 1.5, 3.0]);
    }

    #[test]
    fn test_save_then_load_is_value_equal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let table = sample_table();

        table.save(&path).unwrap();
        let loaded = QTable::<(i32, i32)>::load(&path).unwrap().unwrap();

        assert_eq!(loaded, table);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_failed_write_restores_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        sample_table().save(&path).unwrap();
        let before = fs::read(&path).unwrap();

        let mut updated = sample_table();
        updated.offer((5, 5), premise("dig"), -9.0);
        let err = updated
            .save_with(&path, |target, _| {
                fs::write(target, b"{\"version\": 1, \"entr")?;
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            })
            .unwrap_err();

        assert!(matches!(err, SubstrateError::Persistence(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!backup_path(&path).exists());
        assert_eq!(QTable::<(i32, i32)>::load(&path).unwrap().unwrap(), sample_table());
    }

    #[test]
    fn test_failed_first_write_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        let err = sample_table()
            .save_with(&path, |_, _| Err(std::io::Error::new(std::io::ErrorKind::Other, "read-only")))
            .unwrap_err();

        assert!(matches!(err, SubstrateError::Persistence(_)));
        assert!(!path.exists());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_overwrite_removes_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");

        sample_table().save(&path).unwrap();
        let mut smaller: QTable<(i32, i32)> = QTable::new();
        smaller.offer((9, 9), premise("wait"), 0.0);
        smaller.save(&path).unwrap();

        assert!(!backup_path(&path).exists());
        assert_eq!(QTable::<(i32, i32)>::load(&path).unwrap().unwrap(), smaller);
    }

    #[test]
    fn test_missing_file_is_cold_start() {
        let dir = tempdir().unwrap();
        let loaded = QTable::<u8>::load(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_lone_backup_is_recovered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let table = sample_table();
        table.save(&path).unwrap();
        fs::rename(&path, backup_path(&path)).unwrap();

        let loaded = QTable::<(i32, i32)>::load(&path).unwrap().unwrap();

        assert_eq!(loaded, table);
        assert!(path.exists());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_truncated_file_falls_back_to_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let table = sample_table();
        table.save(&path).unwrap();
        fs::rename(&path, backup_path(&path)).unwrap();
        fs::write(&path, b"{\"version\": 1, \"entr").unwrap();

        let loaded = QTable::<(i32, i32)>::load(&path).unwrap().unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, br#"{"version": 99, "entries": []}"#).unwrap();

        assert!(matches!(
            QTable::<u8>::load(&path),
            Err(SubstrateError::Persistence(_))
        ));
    }

    #[test]
    fn test_file_layout() {
        let mut table: QTable<String> = QTable::new();
        table.offer("hungry".to_string(), ActionPremise::new(), 1.0);

        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        table.save(&path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["entries"][0][0], "hungry");
        assert_eq!(json["entries"][0][1]["loss"], 1.0);
    }
}
