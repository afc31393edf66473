//! Persisted region results.
//!
//! Layout: `<root>/<region>/task_<task id>.json`, each file a JSON array of
//! records. A file is written once per (region, task) and never rewritten.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use citycast_geo::is_safe_region;
use citycast_weather::ResultRecord;
use thiserror::Error;

use crate::task::{RegionBuckets, TaskId};

/// Errors writing result objects
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Region label {0:?} is not a valid storage key")]
    InvalidRegion(String),

    #[error("Results for task {task} in region {region} already exist")]
    AlreadyPersisted { region: String, task: TaskId },

    #[error("Failed to encode results for {region}: {source}")]
    Encode {
        region: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors reading region results
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("No results for region {0}")]
    RegionNotFound(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystem-backed result objects
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_name(task: &TaskId) -> String {
        format!("task_{}.json", task)
    }

    /// Path of the object for one (region, task) pair
    pub fn object_path(&self, region: &str, task: &TaskId) -> Option<PathBuf> {
        is_safe_region(region).then(|| self.root.join(region).join(Self::object_name(task)))
    }

    /// Write one object per non-empty bucket.
    ///
    /// Either every object lands or none does: on any error the objects
    /// already written for this task are removed before returning.
    pub fn persist_task(
        &self,
        task: &TaskId,
        buckets: &RegionBuckets,
    ) -> Result<Vec<PathBuf>, PersistError> {
        let mut written = Vec::new();

        for (region, records) in buckets.iter() {
            if records.is_empty() {
                continue;
            }
            match self.write_object(task, region, records) {
                Ok(path) => written.push(path),
                Err(e) => {
                    tracing::error!("Persisting task {} failed at region {}: {}", task, region, e);
                    remove_all(&written);
                    return Err(e);
                }
            }
        }

        tracing::debug!("Persisted {} result objects for task {}", written.len(), task);
        Ok(written)
    }

    fn write_object(
        &self,
        task: &TaskId,
        region: &str,
        records: &[ResultRecord],
    ) -> Result<PathBuf, PersistError> {
        let path = self
            .object_path(region, task)
            .ok_or_else(|| PersistError::InvalidRegion(region.to_string()))?;
        let dir = self.root.join(region);

        fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
            path: dir.clone(),
            source,
        })?;

        let contents = serde_json::to_vec_pretty(records).map_err(|source| PersistError::Encode {
            region: region.to_string(),
            source,
        })?;

        // Stage, then publish with a hard link: linking never replaces an
        // existing object, so a second write for the same pair fails.
        let staging = dir.join(format!(".{}.tmp", Self::object_name(task)));
        if let Err(source) = fs::write(&staging, contents) {
            discard_staging(&staging);
            return Err(PersistError::Io {
                path: staging,
                source,
            });
        }

        let published = fs::hard_link(&staging, &path);
        discard_staging(&staging);

        match published {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(PersistError::AlreadyPersisted {
                    region: region.to_string(),
                    task: *task,
                });
            }
            Err(source) => return Err(PersistError::Io { path, source }),
        }

        Ok(path)
    }

    /// Remove every object a task wrote. Returns how many were removed.
    pub fn remove_task(&self, task: &TaskId) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };

        let paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path().join(Self::object_name(task)))
            .filter(|path| path.is_file())
            .collect();

        remove_all(&paths);
        paths.len()
    }

    /// Every record ever persisted for `region`, across all tasks.
    ///
    /// Objects that cannot be read or decoded are skipped with a warning.
    ///
    /// # Errors
    /// `RegionNotFound` when the region has no directory, no objects or no
    /// decodable records; `Io` when the directory itself cannot be listed.
    pub fn list_region_results(&self, region: &str) -> Result<Vec<ResultRecord>, ReadError> {
        if !is_safe_region(region) {
            return Err(ReadError::RegionNotFound(region.to_string()));
        }

        let dir = self.root.join(region);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReadError::RegionNotFound(region.to_string()));
            }
            Err(source) => return Err(ReadError::Io { path: dir, source }),
        };

        let mut records = Vec::new();
        let mut objects = 0usize;

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !is_result_object(&path) {
                continue;
            }

            match read_object(&path) {
                Ok(mut decoded) => {
                    objects += 1;
                    records.append(&mut decoded);
                }
                Err(reason) => {
                    tracing::warn!("Skipping result object {}: {}", path.display(), reason);
                }
            }
        }

        if records.is_empty() {
            return Err(ReadError::RegionNotFound(region.to_string()));
        }

        tracing::debug!(
            "Read {} records from {} objects for region {}",
            records.len(),
            objects,
            region
        );
        Ok(records)
    }
}

fn read_object(path: &Path) -> Result<Vec<ResultRecord>, String> {
    let contents = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&contents).map_err(|e| e.to_string())
}

fn is_result_object(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("task_") && n.ends_with(".json"))
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn discard_staging(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove staging file {}: {}", path.display(), e);
        }
    }
}
