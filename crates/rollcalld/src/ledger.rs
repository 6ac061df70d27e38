//! Day-scoped, append-only attendance ledger.
//!
//! One tab-delimited file per local calendar day:
//! `label \t HH:MM:SS \t confidence \t ranked-details-json`.
//! Labels cannot contain tabs or newlines and serde_json never emits raw
//! control characters, so the columns are unambiguous.

use crate::recognition::RankedCandidate;
use chrono::{DateTime, Local, NaiveDate};
use rollcall_core::PersonLabel;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const LEDGER_PREFIX: &str = "attendance_";
const LEDGER_EXTENSION: &str = "tsv";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to serialize ranked details: {0}")]
    Details(#[from] serde_json::Error),
}

impl LedgerError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Logged,
    AlreadyLogged,
}

impl LogOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logged => "logged",
            Self::AlreadyLogged => "already_logged",
        }
    }
}

/// One ledger row as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecordView {
    pub name: String,
    pub timestamp: String,
    pub confidence: String,
    pub details: serde_json::Value,
}

impl AttendanceRecordView {
    /// Parse one ledger line, substituting sentinels for missing columns.
    fn parse(line: &str) -> Self {
        let mut columns = line.splitn(4, '\t');
        let mut text = || {
            columns
                .next()
                .filter(|c| !c.is_empty())
                .unwrap_or(NOT_AVAILABLE)
                .to_string()
        };
        let name = text();
        let timestamp = text();
        let confidence = text();
        let details = columns
            .next()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .filter(serde_json::Value::is_array)
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

        Self {
            name,
            timestamp,
            confidence,
            details,
        }
    }
}

/// Attendance ledger rooted at a directory.
///
/// `log_if_absent` holds an internal mutex across its read-then-append so
/// concurrent callers in this process cannot record the same person twice.
pub struct Ledger {
    dir: PathBuf,
    append_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{LEDGER_PREFIX}{}.{LEDGER_EXTENSION}",
            date.format("%Y-%m-%d")
        ))
    }

    /// Record `label` for today unless it already has an entry.
    pub fn log_if_absent(
        &self,
        label: &PersonLabel,
        confidence: f64,
        details: &[RankedCandidate],
    ) -> Result<LogOutcome, LedgerError> {
        self.log_if_absent_at(Local::now(), label, confidence, details)
    }

    pub fn log_if_absent_at(
        &self,
        now: DateTime<Local>,
        label: &PersonLabel,
        confidence: f64,
        details: &[RankedCandidate],
    ) -> Result<LogOutcome, LedgerError> {
        let path = self.path_for(now.date_naive());
        let details = serde_json::to_string(details)?;

        let _guard = match self.append_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.contains(&path, label)? {
            tracing::debug!(label = %label, "attendance already recorded today");
            return Ok(LogOutcome::AlreadyLogged);
        }

        fs::create_dir_all(&self.dir).map_err(|e| LedgerError::io(&self.dir, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::io(&path, e))?;
        let row = format!(
            "{label}\t{}\t{confidence:.2}\t{details}\n",
            now.format("%H:%M:%S")
        );
        file.write_all(row.as_bytes())
            .map_err(|e| LedgerError::io(&path, e))?;

        tracing::info!(label = %label, confidence, ledger = %path.display(), "attendance logged");
        Ok(LogOutcome::Logged)
    }

    fn contains(&self, path: &Path, label: &PersonLabel) -> Result<bool, LedgerError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(LedgerError::io(path, e)),
        };
        Ok(text
            .lines()
            .any(|line| line.split('\t').next() == Some(label.as_str())))
    }

    /// Records for `date` (today when `None`), in append order.
    pub fn logs(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceRecordView>, LedgerError> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        let path = self.path_for(date);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(&path, e)),
        };

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(AttendanceRecordView::parse)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn label(name: &str) -> PersonLabel {
        PersonLabel::new(name).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, day, hour, 15, 0).unwrap()
    }

    fn details() -> Vec<RankedCandidate> {
        vec![
            RankedCandidate {
                name: "alice".into(),
                distance: 31.257,
            },
            RankedCandidate {
                name: "bob".into(),
                distance: 88.0,
            },
        ]
    }

    #[test]
    fn test_second_log_same_day_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());

        let first = ledger
            .log_if_absent_at(at(2, 9), &label("alice"), 31.257, &details())
            .unwrap();
        let second = ledger
            .log_if_absent_at(at(2, 17), &label("alice"), 12.0, &[])
            .unwrap();

        assert_eq!(first, LogOutcome::Logged);
        assert_eq!(second, LogOutcome::AlreadyLogged);
        let rows = ledger.logs(Some(at(2, 0).date_naive())).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, "09:15:00");
        assert_eq!(rows[0].confidence, "31.26");
    }

    #[test]
    fn test_new_day_logs_again() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        ledger
            .log_if_absent_at(at(2, 9), &label("alice"), 20.0, &[])
            .unwrap();

        let next_day = ledger
            .log_if_absent_at(at(3, 9), &label("alice"), 20.0, &[])
            .unwrap();
        assert_eq!(next_day, LogOutcome::Logged);
        assert!(ledger.path_for(at(3, 0).date_naive()).exists());
    }

    #[test]
    fn test_label_match_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        ledger
            .log_if_absent_at(at(2, 9), &label("ann"), 20.0, &[])
            .unwrap();

        for other in ["anne", "Ann", "an"] {
            let outcome = ledger
                .log_if_absent_at(at(2, 10), &label(other), 20.0, &[])
                .unwrap();
            assert_eq!(outcome, LogOutcome::Logged, "{other}");
        }
        assert_eq!(ledger.logs(Some(at(2, 0).date_naive())).unwrap().len(), 4);
    }

    #[test]
    fn test_details_round_trip_as_json_list() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        ledger
            .log_if_absent_at(at(2, 9), &label("Mary Ann, Jr."), 31.257, &details())
            .unwrap();

        let rows = ledger.logs(Some(at(2, 0).date_naive())).unwrap();
        assert_eq!(rows[0].name, "Mary Ann, Jr.");
        assert_eq!(rows[0].details[0]["name"], "alice");
        assert_eq!(rows[0].details[1]["distance"], 88.0);
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("never-created"));
        assert!(ledger
            .logs(Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_malformed_rows_get_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        fs::write(
            ledger.path_for(date),
            "alice\t09:00:00\n\nbob\t09:05:00\t42.00\t{not json\ncarol\t\t10.00\t[]\n",
        )
        .unwrap();

        let rows = ledger.logs(Some(date)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].confidence, NOT_AVAILABLE);
        assert_eq!(rows[0].details, serde_json::json!([]));
        assert_eq!(rows[1].confidence, "42.00");
        assert_eq!(rows[1].details, serde_json::json!([]));
        assert_eq!(rows[2].timestamp, NOT_AVAILABLE);
    }

    #[test]
    fn test_concurrent_writers_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(Ledger::new(dir.path()));
        let now = at(2, 9);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    ledger
                        .log_if_absent_at(now, &label("alice"), 10.0, &[])
                        .unwrap()
                })
            })
            .collect();
        let outcomes: Vec<LogOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(
            outcomes.iter().filter(|o| **o == LogOutcome::Logged).count(),
            1
        );
        assert_eq!(ledger.logs(Some(now.date_naive())).unwrap().len(), 1);
    }
}
