//! Content-addressed code memory with an append-only JSON Lines log.
//!
//! Records are keyed by [`code_id`] of their normalized source. The store can
//! be shared between concurrently running sessions through an `Arc`, and
//! several processes may open the same log. Lookup-then-insert for an id runs
//! under the in-process lock plus an exclusive lock on the log file, after
//! replaying whatever other handles appended since the last read.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::fingerprint::{code_id, derive_description, derive_name};

/// A stored code fragment. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: String,
    pub source: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Insertion order, starting at 0.
    pub seq: u64,
    pub created_at: String,
}

/// Listing entry returned by [`CodeStore::list_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl From<&FunctionRecord> for FunctionSummary {
    fn from(record: &FunctionRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
        }
    }
}

/// Optional caller-supplied metadata for [`CodeStore::store`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Result of [`CodeStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub record: FunctionRecord,
    /// True when an identical fragment was already present.
    pub reused: bool,
}

#[derive(Debug)]
struct Inner {
    records: Vec<FunctionRecord>,
    by_id: HashMap<String, usize>,
    log: Option<File>,
    /// Bytes of the log already replayed into `records`.
    replayed: u64,
}

impl Inner {
    /// Replay complete records appended to the log past `replayed`.
    ///
    /// With `repair` (only under the exclusive file lock) a torn final line is
    /// truncated away; otherwise it is left for the next writer.
    fn catch_up(&mut self, repair: bool) -> Result<()> {
        let Some(log) = self.log.as_mut() else {
            return Ok(());
        };
        let end = log.metadata().context("stat code memory")?.len();
        if end == self.replayed {
            return Ok(());
        }
        if end < self.replayed {
            bail!(
                "code memory shrank from {} to {end} bytes",
                self.replayed
            );
        }

        log.seek(SeekFrom::Start(self.replayed))
            .context("seek code memory")?;
        let mut bytes = Vec::new();
        log.read_to_end(&mut bytes).context("read code memory")?;
        let tail = String::from_utf8(bytes).context("code memory is not UTF-8")?;
        let consumed = replay(&tail, &mut self.records, &mut self.by_id)
            .with_context(|| format!("replay from byte {}", self.replayed))?;

        if consumed < tail.len() && repair {
            warn!(
                discarded_bytes = tail.len() - consumed,
                "discarding torn record at end of code memory"
            );
            log.set_len(self.replayed + consumed as u64)
                .context("truncate torn record")?;
        }
        self.replayed += consumed as u64;
        Ok(())
    }
}

/// Holds an advisory lock on the log file until dropped.
struct LogLock<'a>(&'a File);

impl<'a> LogLock<'a> {
    fn exclusive(file: &'a File) -> Result<Self> {
        FileExt::lock_exclusive(file).context("lock code memory")?;
        Ok(Self(file))
    }

    fn shared(file: &'a File) -> Result<Self> {
        FileExt::lock_shared(file).context("lock code memory")?;
        Ok(Self(file))
    }
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(self.0) {
            warn!(err = %err, "failed to unlock code memory");
        }
    }
}

#[derive(Debug)]
pub struct CodeStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
    /// Second handle on the log, used only for file locking.
    lock_file: Option<File>,
}

impl CodeStore {
    /// A store that is not persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                records: Vec::new(),
                by_id: HashMap::new(),
                log: None,
                replayed: 0,
            }),
            lock_file: None,
        }
    }

    /// Open the log at `path`, replaying existing records.
    ///
    /// A torn final line (a record cut off by a crash) is discarded and the
    /// file truncated to the last complete record. Any other unreadable line is
    /// an error.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("open code memory {}", path.display()))?;
        let lock_file = File::open(path)
            .with_context(|| format!("open code memory {}", path.display()))?;

        let store = Self {
            path: Some(path.to_path_buf()),
            inner: Mutex::new(Inner {
                records: Vec::new(),
                by_id: HashMap::new(),
                log: Some(log),
                replayed: 0,
            }),
            lock_file: Some(lock_file),
        };
        let records = {
            let mut inner = store.lock()?;
            let _log_lock = store.lock_log(true)?;
            inner
                .catch_up(true)
                .with_context(|| format!("replay code memory {}", path.display()))?;
            inner.records.len()
        };
        info!(path = %path.display(), records, "code memory opened");
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert `source` or return the existing record with the same id.
    ///
    /// Metadata from the first store wins. Missing name/description are
    /// derived from the source.
    pub fn store(&self, source: &str, metadata: CodeMetadata) -> Result<Stored> {
        let id = code_id(source);
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let _log_lock = self.lock_log(true)?;
        inner.catch_up(true)?;
        if let Some(&idx) = inner.by_id.get(&id) {
            debug!(id = %id, "code memory hit");
            return Ok(Stored {
                record: inner.records[idx].clone(),
                reused: true,
            });
        }

        let record = FunctionRecord {
            id: id.clone(),
            source: source.to_string(),
            name: non_blank(metadata.name).or_else(|| derive_name(source)),
            description: non_blank(metadata.description).or_else(|| derive_description(source)),
            seq: inner.records.len() as u64,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        // Durable before visible: a record only enters the index once its line
        // has been written.
        let mut line = serde_json::to_string(&record).context("serialize function record")?;
        line.push('\n');
        if let Some(log) = inner.log.as_mut() {
            log.write_all(line.as_bytes())
                .context("append function record")?;
            inner.replayed += line.len() as u64;
        }

        let idx = inner.records.len();
        inner.records.push(record.clone());
        inner.by_id.insert(id.clone(), idx);
        debug!(id = %id, seq = record.seq, "code memory insert");
        Ok(Stored {
            record,
            reused: false,
        })
    }

    /// Look up a record by id.
    pub fn retrieve(&self, id: &str) -> Result<Option<FunctionRecord>> {
        let inner = self.synced()?;
        Ok(inner.by_id.get(id).map(|&idx| inner.records[idx].clone()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.synced()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Summaries in insertion order.
    ///
    /// The iterator is lazy (one short lock per item) and finite: it covers
    /// the records present when it was created. Call again to restart.
    pub fn list_all(&self) -> FunctionSummaries<'_> {
        let end = self.synced().map(|inner| inner.records.len()).unwrap_or(0);
        FunctionSummaries {
            store: self,
            next: 0,
            end,
        }
    }

    /// Sync the log to disk.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(log) = inner.log.as_mut() {
            log.flush().context("flush code memory")?;
            log.sync_data().context("sync code memory")?;
        }
        Ok(())
    }

    /// Flush and release the log.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        let inner = self
            .inner
            .into_inner()
            .map_err(|_| anyhow!("code memory lock poisoned"))?;
        drop(inner);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("code memory lock poisoned"))
    }

    fn lock_log(&self, exclusive: bool) -> Result<Option<LogLock<'_>>> {
        self.lock_file
            .as_ref()
            .map(|file| {
                if exclusive {
                    LogLock::exclusive(file)
                } else {
                    LogLock::shared(file)
                }
            })
            .transpose()
    }

    /// The in-process state, caught up with records other handles appended.
    fn synced(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock()?;
        let _log_lock = self.lock_log(false)?;
        inner.catch_up(false)?;
        Ok(inner)
    }
}

/// Lazy iterator returned by [`CodeStore::list_all`].
pub struct FunctionSummaries<'a> {
    store: &'a CodeStore,
    next: usize,
    end: usize,
}

impl Iterator for FunctionSummaries<'_> {
    type Item = FunctionSummary;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let inner = self.store.lock().ok()?;
        let summary = inner.records.get(self.next).map(FunctionSummary::from);
        self.next += 1;
        summary
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (0, Some(remaining))
    }
}

/// Append the complete records in `contents` and return the bytes consumed.
///
/// A final line without its newline was never acknowledged and is left
/// unconsumed. Records whose id is already known are skipped.
fn replay(
    contents: &str,
    records: &mut Vec<FunctionRecord>,
    by_id: &mut HashMap<String, usize>,
) -> Result<usize> {
    let mut offset = 0usize;
    let mut line_no = 0usize;

    for line in contents.split_inclusive('\n') {
        line_no += 1;
        if !line.ends_with('\n') {
            break;
        }
        let body = line.trim_end();
        if !body.is_empty() {
            let record: FunctionRecord =
                serde_json::from_str(body).with_context(|| format!("line {line_no}"))?;
            if code_id(&record.source) != record.id {
                bail!("line {line_no}: id does not match source content");
            }
            if !by_id.contains_key(&record.id) {
                by_id.insert(record.id.clone(), records.len());
                records.push(record);
            }
        }
        offset += line.len();
    }
    Ok(offset)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
