//! # Telemetry Logger
//!
//! Appends battery updates to JSONL files.
//!
//! A new file is started every `max_records_per_file` records and only the
//! newest `max_files_to_keep` files are retained. File names sort in
//! creation order:
//!
//! ```text
//! telemetry_20261016_142501_0001.jsonl
//! telemetry_20261016_143112_0002.jsonl
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::battery::BatteryState;
use crate::config::TelemetryConfig;
use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

/// One line of a telemetry log
#[derive(Debug, Serialize)]
struct TelemetryRecord {
    timestamp: String,
    kind: &'static str,
    voltage_mv: Option<i32>,
    voltage_v: Option<f64>,
    percent: Option<u8>,
}

impl TelemetryRecord {
    fn battery(state: &BatteryState) -> Self {
        let when = state
            .timestamp_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        Self {
            timestamp: when.to_rfc3339_opts(SecondsFormat::Millis, true),
            kind: "battery",
            voltage_mv: state.voltage_mv,
            voltage_v: state.voltage_v(),
            percent: state.percent,
        }
    }
}

/// Rotating JSONL writer
#[derive(Debug)]
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    file_index: u32,
    total_records: u64,
}

impl TelemetryLogger {
    /// Create a logger writing into `dir`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        // Continue numbering after earlier runs
        let file_index = log_files(&dir)?
            .iter()
            .filter_map(|path| file_index_of(path))
            .max()
            .unwrap_or(0);
        info!("Telemetry log directory: {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            file_index,
            total_records: 0,
        })
    }

    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(
            &config.log_dir,
            config.max_records_per_file,
            config.max_files_to_keep,
        )
    }

    /// Append one battery update
    ///
    /// # Errors
    ///
    /// Returns `Io` on write or rotation failure and `TelemetryEncoding` if
    /// the record cannot be serialized.
    pub fn record_battery(&mut self, state: &BatteryState) -> Result<()> {
        let line = serde_json::to_string(&TelemetryRecord::battery(state))?;

        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
            self.records_in_file += 1;
            self.total_records += 1;
        }
        Ok(())
    }

    /// File currently being written
    #[must_use]
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        let (path, file) = loop {
            self.file_index = self.file_index.wrapping_add(1);
            let name = format!(
                "{}{}_{:04}.{}",
                FILE_PREFIX,
                Local::now().format("%Y%m%d_%H%M%S"),
                self.file_index,
                FILE_EXTENSION
            );
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };
        debug!("Opened telemetry log {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;

        self.prune()
    }

    /// Deletes the oldest log files beyond the retention limit
    fn prune(&self) -> Result<()> {
        let files = log_files(&self.dir)?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for old in files.iter().take(excess) {
            fs::remove_file(old)?;
            debug!("Removed old telemetry log {}", old.display());
        }
        Ok(())
    }
}

/// Log files in `dir`, oldest first
fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_log_file(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Trailing counter of a log file name
fn file_index_of(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.rsplit_once('_')?;
    index.parse().ok()
}

fn is_log_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX));
    let extension_matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == FILE_EXTENSION);
    name_matches && extension_matches
}
