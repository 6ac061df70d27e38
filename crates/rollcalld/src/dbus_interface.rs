use crate::engine::{EngineError, EngineHandle};
use crate::recognition::RankedCandidate;
use chrono::NaiveDate;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService1 {
    engine: EngineHandle,
}

impl AttendanceService1 {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match &e {
        EngineError::Service(inner) if inner.is_input() => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        _ => {
            tracing::error!(error = %e, "request failed");
            zbus::fdo::Error::Failed(e.to_string())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// `""` means today; anything else must be `YYYY-MM-DD`.
fn parse_date(date: &str) -> zbus::fdo::Result<Option<NaiveDate>> {
    let date = date.trim();
    if date.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid date {date:?}: {e}")))
}

/// Details arrive as a JSON list; an empty string means no details.
fn parse_details(details: &str) -> zbus::fdo::Result<Vec<RankedCandidate>> {
    if details.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(details)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid details: {e}")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService1 {
    /// Store the first face found in `image` as a sample for `label`.
    /// Returns false when no face was detected.
    async fn register(&self, label: String, image: Vec<u8>) -> zbus::fdo::Result<bool> {
        tracing::info!(label = %label, bytes = image.len(), "register requested");
        self.engine.register(label, image).await.map_err(to_fdo)
    }

    /// Retrain on every stored sample. Always answers with a report line;
    /// a failed run leaves the previous model active.
    async fn train(&self) -> zbus::fdo::Result<String> {
        tracing::info!("train requested");
        let report = self.engine.train().await.map_err(to_fdo)?;
        Ok(match report {
            Ok(report) => report.to_string(),
            Err(e) => e.to_string(),
        })
    }

    /// Classify `image` and record attendance on a match.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::debug!(bytes = image.len(), "recognize requested");
        let outcome = self.engine.recognize(image).await.map_err(to_fdo)?;
        to_json(&outcome.response())
    }

    /// Record `label` for today unless already present.
    async fn log_attendance(
        &self,
        label: String,
        confidence: f64,
        details: &str,
    ) -> zbus::fdo::Result<String> {
        let details = parse_details(details)?;
        let outcome = self
            .engine
            .log_attendance(label, confidence, details)
            .await
            .map_err(to_fdo)?;
        Ok(outcome.as_str().to_string())
    }

    /// Ledger records for `date` (`""` for today) as a JSON list.
    async fn get_logs(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        let records = self.engine.logs(date).await.map_err(to_fdo)?;
        to_json(&records)
    }

    async fn get_stats(&self) -> zbus::fdo::Result<String> {
        let stats = self.engine.stats().await.map_err(to_fdo)?;
        to_json(&stats)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(status.to_string())
    }
}
