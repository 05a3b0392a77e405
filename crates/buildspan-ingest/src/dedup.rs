//! Persisted set of build ids that have already been exported.
//!
//! One entry per line, `<id>\t<finished_at>`, finished time in RFC 3339.
//! Bare `<id>` lines from older files are accepted and stamped with the time
//! they were loaded. The file is always replaced as a whole, never appended.

use buildspan_core::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupSet {
    entries: HashMap<String, DateTime<Utc>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Record `id` as processed. Returns `false` if it was already present.
    pub fn claim(&mut self, id: impl Into<String>, finished_at: DateTime<Utc>) -> bool {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, finished_at);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries that finished before `cutoff`. Returns how many were removed.
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, finished_at| *finished_at >= cutoff);
        before - self.entries.len()
    }

    /// Parse the on-disk format. `loaded_at` stamps entries without a time.
    pub fn parse(content: &str, loaded_at: DateTime<Utc>) -> Self {
        let mut entries = HashMap::new();

        for line in content.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let (id, finished_at) = match line.split_once('\t') {
                Some((id, raw)) => match DateTime::parse_from_rfc3339(raw) {
                    Ok(ts) => (id, ts.with_timezone(&Utc)),
                    Err(e) => {
                        warn!(id, error = %e, "Unreadable finish time in dedup store");
                        (id, loaded_at)
                    }
                },
                None => (line, loaded_at),
            };

            if id.is_empty() {
                continue;
            }
            entries.entry(id.to_string()).or_insert(finished_at);
        }

        Self { entries }
    }

    /// Render the on-disk format, sorted by id so rewrites are stable.
    pub fn render(&self) -> String {
        let mut ids: Vec<_> = self.entries.iter().collect();
        ids.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::with_capacity(ids.len() * 64);
        for (id, finished_at) in ids {
            out.push_str(id);
            out.push('\t');
            out.push_str(&finished_at.to_rfc3339_opts(SecondsFormat::Secs, true));
            out.push('\n');
        }
        out
    }
}

/// File-backed dedup store.
#[derive(Debug, Clone)]
pub struct DedupStore {
    path: PathBuf,
}

impl DedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the set, creating an empty file if none exists yet.
    ///
    /// The file is opened read-write so an unwritable location is reported
    /// here rather than after a cycle's worth of exports.
    pub async fn load(&self) -> Result<DedupSet> {
        let open_err = |source: std::io::Error| Error::DedupOpen {
            path: self.path.display().to_string(),
            source,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await
            .map_err(open_err)?;

        let mut content = String::new();
        file.read_to_string(&mut content).await.map_err(open_err)?;

        let set = DedupSet::parse(&content, Utc::now());
        info!(path = %self.path.display(), entries = set.len(), "Loaded dedup store");
        Ok(set)
    }

    /// Replace the file with `set`.
    ///
    /// Written to a sibling temp file, synced, then renamed over the old
    /// file, so a crash leaves either the old or the new set on disk.
    pub async fn persist(&self, set: &DedupSet) -> Result<()> {
        let path = self.path.clone();
        let content = set.render();
        let entries = set.len();

        tokio::task::spawn_blocking(move || write_atomic(&path, content.as_bytes()))
            .await
            .map_err(|e| Error::Internal(format!("Dedup writer task failed: {}", e)))?
            .map_err(|source| Error::DedupWrite {
                path: self.path.display().to_string(),
                source,
            })?;

        debug!(path = %self.path.display(), entries, "Persisted dedup store");
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
