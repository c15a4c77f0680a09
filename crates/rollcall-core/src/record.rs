//! Attendance report: present/absent split written once at session end.

use crate::types::Identity;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const RULE: &str = "==============================";
/// Attempts at `attendance_<ts>_<n>.txt` before giving up on a free name.
const MAX_NAME_SUFFIX: u32 = 100;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to persist report to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no free report name in {0}")]
    NameExhausted(String),
}

/// Present and absent identities at the moment the session stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub present: Vec<Identity>,
    pub absent: Vec<Identity>,
    pub recorded_at: DateTime<Local>,
}

impl SessionReport {
    /// `absent` is `known − present`; both lists come out sorted.
    pub fn new(present: &BTreeSet<Identity>, known: &BTreeSet<Identity>, recorded_at: DateTime<Local>) -> Self {
        Self {
            present: present.iter().cloned().collect(),
            absent: known.difference(present).cloned().collect(),
            recorded_at,
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Attendance record\nRecorded: {}\n{RULE}\n",
            self.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
        for identity in &self.present {
            out.push_str(identity.as_str());
            out.push('\n');
        }
        if !self.absent.is_empty() {
            out.push_str(&format!("\nAbsent:\n{RULE}\n"));
            for identity in &self.absent {
                out.push_str(identity.as_str());
                out.push('\n');
            }
        }
        out
    }

    /// `attendance_<YYYYmmdd_HHMMSS>`
    pub fn file_stem(&self) -> String {
        format!("attendance_{}", self.recorded_at.format("%Y%m%d_%H%M%S"))
    }
}

/// Write-once destination for a report.
pub trait ReportSink {
    /// Persist the report, returning where it went.
    fn write(&self, report: &SessionReport) -> Result<PathBuf, RecordError>;
}

/// Writes each report to a fresh file in a directory.
///
/// The text goes to a temporary file in the same directory first and is then
/// linked into place without overwriting, so a reader never sees a partial
/// report and two runs in the same second never clobber each other.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidate(&self, stem: &str, n: u32) -> PathBuf {
        if n == 0 {
            self.dir.join(format!("{stem}.txt"))
        } else {
            self.dir.join(format!("{stem}_{n}.txt"))
        }
    }
}

impl ReportSink for DirectorySink {
    fn write(&self, report: &SessionReport) -> Result<PathBuf, RecordError> {
        std::fs::create_dir_all(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(report.render().as_bytes())?;
        tmp.as_file().sync_all()?;

        let stem = report.file_stem();
        for n in 0..MAX_NAME_SUFFIX {
            let path = self.candidate(&stem, n);
            match tmp.persist_noclobber(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => tmp = e.file,
                Err(e) => {
                    return Err(RecordError::Persist {
                        path,
                        source: e.error,
                    })
                }
            }
        }

        Err(RecordError::NameExhausted(self.dir.display().to_string()))
    }
}

/// Turns the final ledger contents into a persisted report.
pub struct RecordEmitter;

impl RecordEmitter {
    /// Write a report for `present` against `known`.
    ///
    /// Returns `Ok(None)` without writing anything when nobody signed in.
    pub fn emit(
        present: &BTreeSet<Identity>,
        known: &BTreeSet<Identity>,
        sink: &dyn ReportSink,
    ) -> Result<Option<PathBuf>, RecordError> {
        if present.is_empty() {
            tracing::info!("no attendance recorded; no report written");
            return Ok(None);
        }

        let report = SessionReport::new(present, known, Local::now());
        let path = sink.write(&report)?;

        tracing::info!(
            path = %path.display(),
            present = report.present.len(),
            absent = report.absent.len(),
            "attendance report written"
        );
        Ok(Some(path))
    }
}
