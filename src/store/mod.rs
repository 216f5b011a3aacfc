//! Durable sample storage
//!
//! Samples are appended to a JSON Lines log (`samples.jsonl`) and mirrored
//! into an in-memory index that serves latest-value and time-series reads.
//! The tag registry lives next to it in `tags.json`.
//!
//! # Concurrency
//!
//! [`SampleStore`] is a cheap `Clone` handle. Writes are serialised through
//! the log writer lock and published to the index under its write lock only
//! after the record has been appended, so readers never see a sample that
//! is not on disk and never see a half-applied update.
//!
//! # Layout
//!
//! ```text
//! <workspace>/
//!   samples.jsonl   one record per line: {"tag","ts","kind","value"}
//!   tags.json       tag registry, replaced atomically
//! ```

mod export;
mod record;

use crate::error::StoreError;
use crate::types::{Sample, TagSpec, Value};
use record::Record;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Sample log file name inside the workspace
pub const SAMPLES_FILE: &str = "samples.jsonl";
/// Tag registry file name inside the workspace
pub const TAGS_FILE: &str = "tags.json";

/// Samples fetched per lock acquisition by [`SeriesIter`]
const SERIES_CHUNK: usize = 256;

#[derive(Debug, Default)]
struct Index {
    /// Per-tag samples in non-decreasing timestamp order
    series: HashMap<String, Vec<(f64, Value)>>,
    /// Registered tags in registration order
    tags: Vec<TagSpec>,
}

#[derive(Debug)]
struct StoreInner {
    dir: Option<PathBuf>,
    log: Mutex<Option<BufWriter<File>>>,
    index: RwLock<Index>,
}

impl StoreInner {
    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_log(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a sample store
///
/// Cloning is cheap and every clone sees the same data.
#[derive(Debug, Clone)]
pub struct SampleStore {
    inner: Arc<StoreInner>,
}

impl SampleStore {
    /// Open (or create) a store in `dir`, replaying any existing log
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let log_path = dir.join(SAMPLES_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)?;

        let mut index = Index::default();
        let replayed = replay(&mut file, &mut index)?;

        let tags_path = dir.join(TAGS_FILE);
        if tags_path.exists() {
            let content = fs::read_to_string(&tags_path)?;
            index.tags = serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                line: e.line(),
                message: format!("{}: {}", TAGS_FILE, e),
            })?;
        }

        tracing::info!(
            "Opened sample store at {:?}: {} samples, {} tags",
            dir,
            replayed,
            index.tags.len()
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                dir: Some(dir.to_path_buf()),
                log: Mutex::new(Some(BufWriter::new(file))),
                index: RwLock::new(index),
            }),
        })
    }

    /// A store that keeps everything in memory
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                dir: None,
                log: Mutex::new(None),
                index: RwLock::new(Index::default()),
            }),
        }
    }

    /// Workspace directory, or `None` for an in-memory store
    pub fn dir(&self) -> Option<&Path> {
        self.inner.dir.as_deref()
    }

    /// Append one sample
    ///
    /// Rejects a sample older than the last stored sample of the same tag.
    /// The record is flushed to the log before it becomes visible to readers.
    pub fn write(&self, sample: &Sample) -> Result<(), StoreError> {
        if !sample.timestamp.is_finite() {
            return Err(StoreError::Encode(format!(
                "non-finite timestamp for '{}'",
                sample.tag_name
            )));
        }

        // Holding the log lock serialises writers, so the order check below
        // cannot race another write of the same tag.
        let mut log = self.inner.lock_log();

        let last = self
            .inner
            .read_index()
            .series
            .get(&sample.tag_name)
            .and_then(|s| s.last())
            .map(|(ts, _)| *ts);
        if let Some(last) = last {
            if sample.timestamp < last {
                return Err(StoreError::OutOfOrder {
                    tag: sample.tag_name.clone(),
                    last,
                    attempted: sample.timestamp,
                });
            }
        }

        if let Some(writer) = log.as_mut() {
            let mut line = serde_json::to_string(&Record::from_sample(sample))
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            line.push('\n');
            writer.write_all(line.as_bytes())?;
            writer.flush()?;
        }

        self.inner
            .write_index()
            .series
            .entry(sample.tag_name.clone())
            .or_default()
            .push((sample.timestamp, sample.value));
        Ok(())
    }

    /// Force the log to stable storage
    pub fn sync(&self) -> Result<(), StoreError> {
        if let Some(writer) = self.inner.lock_log().as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Most recent sample of every tag that has one
    pub fn get_latest_values(&self) -> HashMap<String, Sample> {
        let index = self.inner.read_index();
        index
            .series
            .iter()
            .filter_map(|(name, series)| {
                series
                    .last()
                    .map(|(ts, value)| (name.clone(), Sample::new(name.clone(), *ts, *value)))
            })
            .collect()
    }

    /// Most recent sample of one tag
    pub fn get_latest(&self, tag_name: &str) -> Option<Sample> {
        let index = self.inner.read_index();
        index
            .series
            .get(tag_name)
            .and_then(|s| s.last())
            .map(|(ts, value)| Sample::new(tag_name, *ts, *value))
    }

    /// Samples of `tag_name` with `timestamp >= since`, ascending
    ///
    /// The iterator covers what was stored when it was created; samples
    /// written afterwards are not included.
    pub fn get_series(&self, tag_name: &str, since: f64) -> SeriesIter {
        self.get_series_range(tag_name, since, f64::INFINITY)
    }

    /// Samples of `tag_name` with `since <= timestamp <= until`, ascending
    pub fn get_series_range(&self, tag_name: &str, since: f64, until: f64) -> SeriesIter {
        let (cursor, end) = {
            let index = self.inner.read_index();
            match index.series.get(tag_name) {
                Some(series) => (
                    series.partition_point(|(ts, _)| *ts < since),
                    series.partition_point(|(ts, _)| *ts <= until),
                ),
                None => (0, 0),
            }
        };
        SeriesIter {
            inner: Arc::clone(&self.inner),
            tag_name: tag_name.to_string(),
            cursor,
            end: end.max(cursor),
            buffer: VecDeque::new(),
        }
    }

    /// The last `limit` samples of `tag_name` with `timestamp >= since`
    pub fn get_series_tail(&self, tag_name: &str, since: f64, limit: usize) -> Vec<Sample> {
        let index = self.inner.read_index();
        let Some(series) = index.series.get(tag_name) else {
            return Vec::new();
        };
        let start = series
            .partition_point(|(ts, _)| *ts < since)
            .max(series.len().saturating_sub(limit));
        series[start..]
            .iter()
            .map(|(ts, value)| Sample::new(tag_name, *ts, *value))
            .collect()
    }

    /// Number of stored samples for a tag
    pub fn sample_count(&self, tag_name: &str) -> usize {
        self.inner
            .read_index()
            .series
            .get(tag_name)
            .map_or(0, Vec::len)
    }

    /// Insert or replace tags in the registry (matched by name)
    pub fn upsert_tags(&self, tags: &[TagSpec]) -> Result<(), StoreError> {
        let snapshot = {
            let mut index = self.inner.write_index();
            for tag in tags {
                match index.tags.iter_mut().find(|t| t.name() == tag.name()) {
                    Some(existing) => *existing = tag.clone(),
                    None => index.tags.push(tag.clone()),
                }
            }
            index.tags.clone()
        };

        if let Some(dir) = &self.inner.dir {
            let json = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| StoreError::Encode(e.to_string()))?;
            let tmp = dir.join(format!("{}.tmp", TAGS_FILE));
            fs::write(&tmp, json)?;
            fs::rename(&tmp, dir.join(TAGS_FILE))?;
        }
        Ok(())
    }

    /// Names of all registered tags
    pub fn list_tags(&self) -> Vec<String> {
        self.inner
            .read_index()
            .tags
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// All registered tag specifications
    pub fn tag_specs(&self) -> Vec<TagSpec> {
        self.inner.read_index().tags.clone()
    }
}

/// Lazy, chunked iterator over one tag's samples
///
/// Created by [`SampleStore::get_series`]. Takes the index read lock once
/// per chunk rather than once per sample, and never holds it between calls.
/// Finite, and not restartable: call `get_series` again for a fresh pass.
pub struct SeriesIter {
    inner: Arc<StoreInner>,
    tag_name: String,
    cursor: usize,
    end: usize,
    buffer: VecDeque<Sample>,
}

impl SeriesIter {
    fn refill(&mut self) {
        if self.cursor >= self.end {
            return;
        }
        let index = self.inner.read_index();
        let Some(series) = index.series.get(&self.tag_name) else {
            self.cursor = self.end;
            return;
        };
        let stop = self.end.min(self.cursor + SERIES_CHUNK).min(series.len());
        self.buffer.extend(
            series[self.cursor..stop]
                .iter()
                .map(|(ts, value)| Sample::new(self.tag_name.clone(), *ts, *value)),
        );
        self.cursor = if stop > self.cursor { stop } else { self.end };
    }
}

impl Iterator for SeriesIter {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.buffer.is_empty() {
            self.refill();
        }
        self.buffer.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.cursor) + self.buffer.len();
        (remaining, Some(remaining))
    }
}

/// Replay the log into `index`, returning the number of samples loaded
///
/// A final line without a newline is a torn write: it is dropped and the
/// file truncated back to the last complete record. Any other bad line is
/// reported as corruption.
fn replay(file: &mut File, index: &mut Index) -> Result<usize, StoreError> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&*file);
    let mut buf = Vec::new();
    let mut offset: u64 = 0;
    let mut line_no = 0;
    let mut loaded = 0;
    let mut torn_at = None;
    let mut missing_newline = false;

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        let complete = buf.last() == Some(&b'\n');
        let text = std::str::from_utf8(&buf).map(str::trim);

        let parsed = match text {
            Ok("") => {
                offset += n as u64;
                continue;
            }
            Ok(text) => serde_json::from_str::<Record>(text)
                .map_err(|e| e.to_string())
                .and_then(Record::into_sample),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(sample) => {
                let series = index.series.entry(sample.tag_name.clone()).or_default();
                if series.last().is_some_and(|(ts, _)| sample.timestamp < *ts) {
                    return Err(StoreError::Corrupt {
                        line: line_no,
                        message: format!("out-of-order sample for '{}'", sample.tag_name),
                    });
                }
                series.push((sample.timestamp, sample.value));
                loaded += 1;
                // valid record missing only its newline
                missing_newline = !complete;
            }
            Err(message) if !complete => {
                tracing::warn!(
                    "Dropping torn record at end of sample log (line {}): {}",
                    line_no,
                    message
                );
                torn_at = Some(offset);
            }
            Err(message) => return Err(StoreError::Corrupt { line: line_no, message }),
        }
        offset += n as u64;
    }
    drop(reader);

    if let Some(len) = torn_at {
        file.set_len(len)?;
    } else if missing_newline {
        file.write_all(b"\n")?;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Area, DataType, SampleErrorKind};
    use tempfile::TempDir;

    fn float(tag: &str, ts: f64, v: f64) -> Sample {
        Sample::new(tag, ts, Value::Float(v))
    }

    #[test]
    fn test_write_and_latest() {
        let store = SampleStore::in_memory();
        store.write(&float("TankLevel", 1.0, 10.0)).unwrap();
        store.write(&float("TankLevel", 2.0, 20.0)).unwrap();
        store
            .write(&Sample::new("PumpOn", 2.0, Value::Bool(true)))
            .unwrap();

        let latest = store.get_latest_values();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["TankLevel"].value, Value::Float(20.0));
        assert_eq!(latest["PumpOn"].value, Value::Bool(true));
        assert_eq!(store.get_latest("Missing"), None);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let store = SampleStore::in_memory();
        store.write(&float("t", 5.0, 1.0)).unwrap();
        // equal timestamps are allowed
        store.write(&float("t", 5.0, 2.0)).unwrap();
        let err = store.write(&float("t", 4.0, 3.0)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { last, attempted, .. } if last == 5.0 && attempted == 4.0));
        // other tags are independent
        store.write(&float("u", 1.0, 1.0)).unwrap();
        assert_eq!(store.sample_count("t"), 2);
    }

    #[test]
    fn test_series_since_and_range() {
        let store = SampleStore::in_memory();
        for i in 0..10 {
            store.write(&float("t", i as f64, i as f64)).unwrap();
        }
        let since: Vec<f64> = store.get_series("t", 7.0).map(|s| s.timestamp).collect();
        assert_eq!(since, vec![7.0, 8.0, 9.0]);

        let range: Vec<f64> = store
            .get_series_range("t", 2.5, 5.0)
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(range, vec![3.0, 4.0, 5.0]);

        assert_eq!(store.get_series("missing", 0.0).count(), 0);
        assert_eq!(store.get_series_range("t", 5.0, 1.0).count(), 0);
    }

    #[test]
    fn test_series_spans_chunks_and_is_finite() {
        let store = SampleStore::in_memory();
        let n = SERIES_CHUNK * 2 + 17;
        for i in 0..n {
            store.write(&float("t", i as f64, 0.0)).unwrap();
        }
        let mut iter = store.get_series("t", 0.0);
        assert_eq!(iter.size_hint(), (n, Some(n)));

        // writes after creation are not picked up
        store.write(&float("t", n as f64, 0.0)).unwrap();
        let first = iter.next().unwrap();
        assert_eq!(first.tag_name, "t");
        assert_eq!(iter.count(), n - 1);
    }

    #[test]
    fn test_series_tail() {
        let store = SampleStore::in_memory();
        for i in 0..10 {
            store.write(&float("t", i as f64, 0.0)).unwrap();
        }
        let tail: Vec<f64> = store
            .get_series_tail("t", 0.0, 3)
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(tail, vec![7.0, 8.0, 9.0]);
        assert_eq!(store.get_series_tail("t", 8.5, 5).len(), 1);
        assert!(store.get_series_tail("t", 0.0, 0).is_empty());
    }

    #[test]
    fn test_persist_and_replay() {
        let dir = TempDir::new().unwrap();
        {
            let store = SampleStore::open(dir.path()).unwrap();
            store.write(&float("TankLevel", 1.0, 50.0)).unwrap();
            store
                .write(&Sample::error("TankLevel", 2.0, SampleErrorKind::Timeout))
                .unwrap();
            store.write(&Sample::new("Count", 2.0, Value::Int(-4))).unwrap();
        }

        let store = SampleStore::open(dir.path()).unwrap();
        let series: Vec<Sample> = store.get_series("TankLevel", 0.0).collect();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, Value::Float(50.0));
        assert_eq!(series[1].value, Value::Error(SampleErrorKind::Timeout));
        assert_eq!(store.get_latest("Count").unwrap().value, Value::Int(-4));

        // ordering survives the restart
        assert!(store.write(&float("TankLevel", 1.5, 0.0)).is_err());
    }

    #[test]
    fn test_torn_final_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let store = SampleStore::open(dir.path()).unwrap();
            store.write(&float("t", 1.0, 1.0)).unwrap();
        }
        let path = dir.path().join(SAMPLES_FILE);
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(br#"{"tag":"t","ts":2.0,"ki"#).unwrap();
        drop(f);

        let store = SampleStore::open(dir.path()).unwrap();
        assert_eq!(store.sample_count("t"), 1);
        store.write(&float("t", 3.0, 3.0)).unwrap();
        drop(store);

        let store = SampleStore::open(dir.path()).unwrap();
        let ts: Vec<f64> = store.get_series("t", 0.0).map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![1.0, 3.0]);
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SAMPLES_FILE);
        fs::write(
            &path,
            "{\"tag\":\"t\",\"ts\":1.0,\"kind\":\"int\",\"value\":1}\ngarbage\n{\"tag\":\"t\",\"ts\":2.0,\"kind\":\"int\",\"value\":2}\n",
        )
        .unwrap();
        let err = SampleStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[test]
    fn test_tag_registry_upsert_and_reload() {
        let dir = TempDir::new().unwrap();
        let level = TagSpec::new("TankLevel", Area::DataBlock, 1, 0, DataType::Real32).unwrap();
        let pump = TagSpec::new_bool("PumpOn", Area::DataBlock, 1, 4, 0).unwrap();
        {
            let store = SampleStore::open(dir.path()).unwrap();
            store.upsert_tags(&[level.clone(), pump.clone()]).unwrap();
            let moved = TagSpec::new("TankLevel", Area::DataBlock, 2, 8, DataType::Real64).unwrap();
            store.upsert_tags(&[moved]).unwrap();
            assert_eq!(store.list_tags(), vec!["TankLevel", "PumpOn"]);
        }
        assert!(!dir.path().join("tags.json.tmp").exists());

        let store = SampleStore::open(dir.path()).unwrap();
        let specs = store.tag_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].block_index(), 2);
        assert_eq!(specs[0].data_type(), DataType::Real64);
        assert_eq!(specs[1], pump);
    }

    #[test]
    fn test_clones_share_data() {
        let store = SampleStore::in_memory();
        let other = store.clone();
        store.write(&float("t", 1.0, 1.0)).unwrap();
        assert_eq!(other.sample_count("t"), 1);
        assert!(other.dir().is_none());
    }
}
