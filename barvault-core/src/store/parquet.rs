//! Parquet range store with Hive-style partitioning.
//!
//! Layout: `{root}/symbol={SYMBOL}/interval={INTERVAL}/rows.parquet`
//! plus a `ranges.json` sidecar next to it.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Rows renamed into place before the sidecar commits the new range
//! - Integrity validation on load (schema, row count, content hash)
//! - Quarantine for corrupt files ({filename}.quarantined); a corrupt key
//!   reads as empty with no cached ranges, so the next request refetches it
//!
//! Readers share an `RwLock` and never touch files. Only `upsert`, holding the
//! lock exclusively, renames a corrupt file aside, so a reader can never
//! observe the rows of one commit next to the sidecar of another.

use super::{check_keys, KeyStatus, RangeStore, StoreError};
use crate::domain::{insert_range, CachedRange, Interval, Row, TimeWindow};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

const TIMESTAMP_COLUMN: &str = "timestamp";
const ROWS_FILE: &str = "rows.parquet";
const META_FILE: &str = "ranges.json";

/// Sidecar describing one `(symbol, interval)` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeMeta {
    pub symbol: String,
    pub interval: Interval,
    pub ranges: Vec<CachedRange>,
    pub row_count: usize,
    pub data_hash: String,
    pub updated_at: DateTime<Utc>,
}

type SeriesRows = BTreeMap<DateTime<Utc>, Row>;

/// What `load_series` does with an inconsistent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnCorrupt {
    /// Report no rows or no coverage, leave the files alone.
    Ignore,
    /// Rename the offending files to `*.quarantined`.
    Quarantine,
}

/// File-backed range store.
pub struct ParquetRangeStore {
    root: PathBuf,
    io_lock: RwLock<()>,
}

impl ParquetRangeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            io_lock: RwLock::new(()),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/symbol={SYMBOL}/interval={INTERVAL}/`
    pub fn key_dir(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.root
            .join(format!("symbol={}", encode_component(symbol)))
            .join(format!("interval={interval}"))
    }

    fn rows_path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.key_dir(symbol, interval).join(ROWS_FILE)
    }

    fn meta_path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.key_dir(symbol, interval).join(META_FILE)
    }

    /// Sidecar for a key, if present and readable.
    pub fn get_meta(&self, symbol: &str, interval: Interval) -> Option<RangeMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, interval)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Load a key's rows and sidecar. Inconsistent keys report no coverage.
    fn load_series(
        &self,
        symbol: &str,
        interval: Interval,
        on_corrupt: OnCorrupt,
    ) -> Result<(SeriesRows, Vec<CachedRange>), StoreError> {
        let meta_path = self.meta_path(symbol, interval);
        let rows_path = self.rows_path(symbol, interval);
        let set_aside = |path: &Path, reason: &str| match on_corrupt {
            OnCorrupt::Quarantine => quarantine(path, reason),
            OnCorrupt::Ignore => debug!(path = %path.display(), reason, "ignoring inconsistent store file"),
        };

        let meta = match fs::read_to_string(&meta_path) {
            Ok(content) => match serde_json::from_str::<RangeMeta>(&content) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    set_aside(&meta_path, &format!("unreadable sidecar: {e}"));
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StoreError::Io(e)),
        };

        let rows = if rows_path.exists() {
            match load_and_validate_parquet(&rows_path, symbol, interval) {
                Ok(rows) => rows,
                Err(e) => {
                    set_aside(&rows_path, &e.to_string());
                    if meta.is_some() {
                        set_aside(&meta_path, "rows file is corrupt");
                    }
                    return Ok((SeriesRows::new(), Vec::new()));
                }
            }
        } else {
            SeriesRows::new()
        };

        let Some(meta) = meta else {
            // Rows without a sidecar carry no coverage guarantee.
            return Ok((rows, Vec::new()));
        };

        if meta.row_count != rows.len() || meta.data_hash != content_hash(rows.values()) {
            warn!(
                symbol,
                interval = %interval,
                expected_rows = meta.row_count,
                found_rows = rows.len(),
                "sidecar does not match rows; dropping cached ranges"
            );
            set_aside(&meta_path, "sidecar does not match rows");
            return Ok((rows, Vec::new()));
        }

        Ok((rows, meta.ranges))
    }
}

impl RangeStore for ParquetRangeStore {
    fn name(&self) -> &str {
        "parquet"
    }

    fn cached_ranges(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Vec<CachedRange>, StoreError> {
        // Validates rows against the sidecar so a corrupt key never reports coverage.
        let _guard = self.io_lock.read().unwrap_or_else(PoisonError::into_inner);
        self.load_series(symbol, interval, OnCorrupt::Ignore)
            .map(|(_, ranges)| ranges)
    }

    fn upsert(
        &self,
        symbol: &str,
        interval: Interval,
        rows: Vec<Row>,
        covered: TimeWindow,
    ) -> Result<(), StoreError> {
        check_keys(symbol, interval, &rows)?;
        let _guard = self.io_lock.write().unwrap_or_else(PoisonError::into_inner);

        let (mut series, mut ranges) = self.load_series(symbol, interval, OnCorrupt::Quarantine)?;
        let incoming = rows.len();
        for row in rows {
            series.insert(row.timestamp, row);
        }

        let key_dir = self.key_dir(symbol, interval);
        fs::create_dir_all(&key_dir)?;

        if incoming > 0 {
            let df = rows_to_dataframe(series.values())?;
            let path = self.rows_path(symbol, interval);
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&df, &tmp_path)?;
            rename_into_place(&tmp_path, &path)?;
        }

        insert_range(&mut ranges, symbol, interval, covered);
        let meta = RangeMeta {
            symbol: symbol.to_string(),
            interval,
            ranges,
            row_count: series.len(),
            data_hash: content_hash(series.values()),
            updated_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Serialization(format!("sidecar: {e}")))?;
        let meta_path = self.meta_path(symbol, interval);
        let tmp_path = meta_path.with_extension("json.tmp");
        fs::write(&tmp_path, meta_json)?;
        rename_into_place(&tmp_path, &meta_path)?;

        debug!(
            symbol,
            interval = %interval,
            rows = incoming,
            covered = %covered,
            "parquet upsert committed"
        );
        Ok(())
    }

    fn read(
        &self,
        symbol: &str,
        interval: Interval,
        window: TimeWindow,
    ) -> Result<Vec<Row>, StoreError> {
        if window.start > window.end {
            return Ok(Vec::new());
        }
        let _guard = self.io_lock.read().unwrap_or_else(PoisonError::into_inner);
        let (series, _) = self.load_series(symbol, interval, OnCorrupt::Ignore)?;
        Ok(series
            .range(window.start..=window.end)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn status(&self) -> Result<Vec<KeyStatus>, StoreError> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }

        for sym_entry in fs::read_dir(&self.root)? {
            let sym_entry = sym_entry?;
            let name = sym_entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("symbol=") || !sym_entry.path().is_dir() {
                continue;
            }
            for int_entry in fs::read_dir(sym_entry.path())? {
                let meta_path = int_entry?.path().join(META_FILE);
                let Ok(content) = fs::read_to_string(&meta_path) else {
                    continue;
                };
                match serde_json::from_str::<RangeMeta>(&content) {
                    Ok(meta) => out.push(KeyStatus {
                        symbol: meta.symbol,
                        interval: meta.interval,
                        ranges: meta.ranges,
                        row_count: meta.row_count,
                        updated_at: Some(meta.updated_at),
                    }),
                    Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping unreadable sidecar"),
                }
            }
        }

        out.sort_by(|a, b| (&a.symbol, a.interval).cmp(&(&b.symbol, b.interval)));
        Ok(out)
    }
}

/// Percent-encode anything that is not safe inside a single path component.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'^') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn quarantine(path: &Path, reason: &str) {
    let mut target = path.as_os_str().to_owned();
    target.push(".quarantined");
    warn!(path = %path.display(), reason, "quarantining corrupt store file");
    let _ = fs::rename(path, PathBuf::from(target));
}

fn rename_into_place(tmp_path: &Path, path: &Path) -> Result<(), StoreError> {
    fs::rename(tmp_path, path).map_err(|e| {
        // Clean up temp file on rename failure
        let _ = fs::remove_file(tmp_path);
        StoreError::Io(e)
    })
}

/// Hash over exactly what survives a Parquet round trip.
fn content_hash<'a>(rows: impl Iterator<Item = &'a Row>) -> String {
    let mut hasher = blake3::Hasher::new();
    for row in rows {
        hasher.update(&row.timestamp.timestamp_millis().to_le_bytes());
        for (name, value) in &row.fields {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&value.to_bits().to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// One i64 millisecond timestamp column plus one nullable f64 column per field.
fn rows_to_dataframe<'a>(rows: impl Iterator<Item = &'a Row> + Clone) -> Result<DataFrame, StoreError> {
    let field_names: BTreeSet<&str> = rows
        .clone()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let timestamps: Vec<i64> = rows.clone().map(|r| r.timestamp.timestamp_millis()).collect();
    let mut columns = Vec::with_capacity(field_names.len() + 1);
    columns.push(Column::new(TIMESTAMP_COLUMN.into(), timestamps));
    for name in field_names {
        let values: Vec<Option<f64>> = rows.clone().map(|r| r.get(name)).collect();
        columns.push(Column::new(name.into(), values));
    }

    DataFrame::new(columns).map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file =
        fs::File::create(path).map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(
    path: &Path,
    symbol: &str,
    interval: Interval,
) -> Result<SeriesRows, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.display().to_string(),
        reason,
    };

    let ts_ca = df
        .column(TIMESTAMP_COLUMN)
        .map_err(|_| corrupt(format!("missing column '{TIMESTAMP_COLUMN}'")))?
        .i64()
        .map_err(|e| corrupt(format!("timestamp column type: {e}")))?;

    let mut field_columns = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == TIMESTAMP_COLUMN {
            continue;
        }
        let values = column
            .f64()
            .map_err(|e| corrupt(format!("{name} column type: {e}")))?;
        field_columns.push((name.to_string(), values));
    }

    let mut rows = SeriesRows::new();
    for i in 0..df.height() {
        let millis = ts_ca
            .get(i)
            .ok_or_else(|| corrupt(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| corrupt(format!("timestamp out of range at row {i}")))?;

        let mut row = Row::new(symbol, interval, timestamp);
        for (name, values) in &field_columns {
            if let Some(v) = values.get(i) {
                row.fields.insert(name.clone(), v);
            }
        }
        rows.insert(timestamp, row);
    }

    Ok(rows)
}
