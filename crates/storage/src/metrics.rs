// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only metric tables
//!
//! A store is a CSV file `metrics/<store>.csv` whose first two columns are
//! always `timestamp` and `run_id`. Field columns only ever grow: when a row
//! brings new fields the header is widened and earlier rows gain empty
//! cells.

use crate::atomic::write_atomic;
use crate::run_dir::RunDirectory;
use crate::{StorageError, ENV_RUN_DIR, ENV_RUN_ID};
use chrono::Local;
use em_core::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const RUN_ID_COLUMN: &str = "run_id";

/// Rows included in a [`MetricPreview`] sample
pub const PREVIEW_SAMPLE_ROWS: usize = 5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(v) => write!(f, "{}", v),
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(v.into())
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Int(v.into())
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(v.into())
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// One CSV-backed metric store
#[derive(Debug)]
pub struct MetricStore {
    path: PathBuf,
    columns: Vec<String>,
}

impl MetricStore {
    /// Open a store, reading its header when the file already exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let columns = match fs::read_to_string(&path) {
            Ok(text) => {
                let mut records = parse_csv(&text).into_iter();
                match records.next() {
                    Some(header) => field_columns(&path, header)?,
                    None => Vec::new(),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, columns })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Field columns, excluding the implicit `timestamp` and `run_id`
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Full header as written to disk
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![TIMESTAMP_COLUMN.to_string(), RUN_ID_COLUMN.to_string()];
        header.extend(self.columns.iter().cloned());
        header
    }

    /// Data rows, each padded to the header width
    pub fn rows(&self) -> Result<Vec<Vec<String>>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let width = self.columns.len() + 2;
        Ok(parse_csv(&text)
            .into_iter()
            .skip(1)
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect())
    }

    /// Append a row, widening the header first if it names new fields
    pub fn append(&mut self, run_id: &str, fields: &[(String, MetricValue)]) -> Result<(), StorageError> {
        let added: Vec<String> = fields
            .iter()
            .map(|(name, _)| name)
            .filter(|name| !self.columns.contains(name) && !is_implicit(name))
            .fold(Vec::new(), |mut acc, name| {
                if !acc.contains(name) {
                    acc.push(name.clone());
                }
                acc
            });

        if !self.path.exists() {
            self.columns.extend(added);
            write_atomic(&self.path, encode_record(&self.header()).as_bytes())?;
        } else if !added.is_empty() {
            let existing = self.rows()?;
            self.columns.extend(added);
            let width = self.columns.len() + 2;
            let mut body = encode_record(&self.header());
            for mut row in existing {
                row.resize(width, String::new());
                body.push_str(&encode_record(&row));
            }
            write_atomic(&self.path, body.as_bytes())?;
            tracing::debug!(path = %self.path.display(), columns = self.columns.len(), "widened metric header");
        }

        let mut row = vec![Local::now().format(TIMESTAMP_FORMAT).to_string(), run_id.to_string()];
        for column in &self.columns {
            let cell = fields
                .iter()
                .rev()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value.to_string())
                .unwrap_or_default();
            row.push(cell);
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(encode_record(&row).as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn is_implicit(name: &str) -> bool {
    name == TIMESTAMP_COLUMN || name == RUN_ID_COLUMN
}

fn field_columns(path: &Path, header: Vec<String>) -> Result<Vec<String>, StorageError> {
    if header.len() < 2 || header[0] != TIMESTAMP_COLUMN || header[1] != RUN_ID_COLUMN {
        return Err(StorageError::MalformedMetrics {
            path: path.to_path_buf(),
            reason: format!("header must start with {},{}", TIMESTAMP_COLUMN, RUN_ID_COLUMN),
        });
    }
    Ok(header.into_iter().skip(2).collect())
}

struct RecorderState {
    store: MetricStore,
    pending: Vec<(String, MetricValue)>,
}

/// Row builder bound to one run's metric store.
///
/// `upd_row` merges fields into a pending row; `save_row` appends it and
/// clears it. Calls are serialized.
#[derive(Debug)]
pub struct MetricRecorder {
    run_id: String,
    state: Mutex<RecorderState>,
}

impl fmt::Debug for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderState")
            .field("store", &self.store.path)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl MetricRecorder {
    /// Recorder writing `metrics/<run_id>.csv`
    pub fn open(dir: &RunDirectory, run_id: RunId) -> Result<Self, StorageError> {
        Self::open_named(dir, run_id, &run_id.to_string())
    }

    /// Recorder writing `metrics/<store>.csv`, tagging rows with `run_id`
    pub fn open_named(dir: &RunDirectory, run_id: RunId, store: &str) -> Result<Self, StorageError> {
        fs::create_dir_all(dir.metrics_dir())?;
        let store = MetricStore::open(dir.metric_path(store))?;
        Ok(Self {
            run_id: run_id.to_string(),
            state: Mutex::new(RecorderState {
                store,
                pending: Vec::new(),
            }),
        })
    }

    /// Recorder for the run this process was launched as, located through
    /// `EM_RUN_DIR` and `EM_RUN_ID`
    pub fn from_env() -> Result<Self, StorageError> {
        let dir = std::env::var_os(ENV_RUN_DIR).ok_or(StorageError::MissingEnv(ENV_RUN_DIR))?;
        let run_id = std::env::var(ENV_RUN_ID)
            .map_err(|_| StorageError::MissingEnv(ENV_RUN_ID))?
            .parse::<RunId>()?;
        Self::open(&RunDirectory::open(dir), run_id)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Merge fields into the pending row; later values win
    pub fn upd_row<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<MetricValue>,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in fields {
            let key = key.into();
            let value = value.into();
            match state.pending.iter_mut().find(|(name, _)| *name == key) {
                Some(slot) => slot.1 = value,
                None => state.pending.push((key, value)),
            }
        }
    }

    /// Append the pending row. An empty pending row writes nothing.
    pub fn save_row(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut state.pending);
        if let Err(e) = state.store.append(&self.run_id, &pending) {
            state.pending = pending;
            return Err(e);
        }
        Ok(())
    }

    pub fn columns(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.store.columns().to_vec()
    }

    pub fn path(&self) -> PathBuf {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.store.path().to_path_buf()
    }
}

/// Summary of one metric file for run details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricPreview {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: usize,
    pub sample: Vec<Vec<String>>,
}

/// Header plus up to `limit` rows of a metric file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read the first `limit` rows of a CSV file, padding short rows
pub fn read_table(path: &Path, limit: usize) -> Result<MetricTable, StorageError> {
    let text = fs::read_to_string(path)?;
    let mut records = parse_csv(&text).into_iter();
    let columns = records.next().unwrap_or_default();
    let rows = records
        .take(limit)
        .map(|mut row| {
            row.resize(columns.len(), String::new());
            row
        })
        .collect();
    Ok(MetricTable { columns, rows })
}

/// Previews for every `*.csv` in `metrics_dir`, sorted by name
pub fn list_metrics(metrics_dir: &Path) -> Result<Vec<MetricPreview>, StorageError> {
    let entries = match fs::read_dir(metrics_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut previews = Vec::with_capacity(paths.len());
    for path in paths {
        let text = fs::read_to_string(&path)?;
        let mut records = parse_csv(&text).into_iter();
        let columns = records.next().unwrap_or_default();
        let body: Vec<Vec<String>> = records.collect();
        let sample = body
            .iter()
            .take(PREVIEW_SAMPLE_ROWS)
            .map(|row| {
                let mut row = row.clone();
                row.resize(columns.len(), String::new());
                row
            })
            .collect();
        previews.push(MetricPreview {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            columns,
            rows: body.len(),
            sample,
        });
    }
    Ok(previews)
}

fn encode_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn encode_record<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| encode_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Parse CSV text into records. Quoted fields may span lines.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut touched = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                quoted = true;
                touched = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                touched = true;
            }
            '\r' => {}
            '\n' => {
                if touched || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                touched = false;
            }
            _ => {
                field.push(c);
                touched = true;
            }
        }
    }
    if touched || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
