//! Append-only record of every trial in a run, optionally mirrored to CSV.

use std::fs::File;
use std::path::{Path, PathBuf};

use prt_types::{CalibResult, CalibrationError, Trial, TrialStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column order of the history log.
pub const HISTORY_COLUMNS: [&str; 7] = [
    "trial",
    "parameter",
    "status",
    "loss",
    "raw_loss",
    "elapsed_seconds",
    "case_dir",
];

/// One flat CSV row of the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub trial: usize,
    pub parameter: f64,
    pub status: String,
    pub loss: f64,
    pub raw_loss: Option<f64>,
    pub elapsed_seconds: f64,
    pub case_dir: String,
}

impl HistoryRow {
    pub fn status(&self) -> Option<TrialStatus> {
        self.status.parse().ok()
    }
}

impl From<&Trial> for HistoryRow {
    fn from(trial: &Trial) -> Self {
        Self {
            trial: trial.number,
            parameter: trial.parameter,
            status: trial.status.as_str().to_string(),
            loss: trial.loss,
            raw_loss: trial.raw_loss,
            elapsed_seconds: trial.elapsed_seconds,
            case_dir: trial
                .case_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }
}

fn history_error(path: &Path, e: csv::Error) -> CalibrationError {
    CalibrationError::History(format!("{}: {}", path.display(), e))
}

/// CSV sink that flushes after every row, so the log survives a crash of
/// the driver itself.
#[derive(Debug)]
pub struct HistoryWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl HistoryWriter {
    /// Create (or truncate) `path` and write the header.
    pub fn create<P: AsRef<Path>>(path: P) -> CalibResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .map_err(|e| history_error(&path, e))?;
        writer
            .write_record(HISTORY_COLUMNS)
            .map_err(|e| history_error(&path, e))?;
        writer.flush()?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, trial: &Trial) -> CalibResult<()> {
        self.writer
            .serialize(HistoryRow::from(trial))
            .map_err(|e| history_error(&self.path, e))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read a history log back.
pub fn load_history<P: AsRef<Path>>(path: P) -> CalibResult<Vec<HistoryRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|e| history_error(path, e))?;
    reader
        .deserialize()
        .collect::<Result<Vec<HistoryRow>, _>>()
        .map_err(|e| history_error(path, e))
}

/// Ordered, append-only list of trials.
#[derive(Debug, Default)]
pub struct RunHistory {
    trials: Vec<Trial>,
    writer: Option<HistoryWriter>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_writer(mut self, writer: HistoryWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Append the next trial. Numbers must run 1, 2, 3, ... without gaps.
    /// The row is on disk before this returns.
    pub fn append(&mut self, trial: Trial) -> CalibResult<()> {
        let expected = self.trials.len() + 1;
        if trial.number != expected {
            return Err(prt_types::internal_error!(
                "trial {} appended where trial {} was expected",
                trial.number,
                expected
            ));
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&trial)?;
            debug!("Logged trial {} to {}", trial.number, writer.path().display());
        }
        self.trials.push(trial);
        Ok(())
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn next_number(&self) -> usize {
        self.trials.len() + 1
    }

    pub fn into_trials(self) -> Vec<Trial> {
        self.trials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn trial(number: usize, status: TrialStatus, loss: Option<f64>) -> Trial {
        Trial {
            number,
            parameter: 0.5 + number as f64 * 0.05,
            status,
            loss: loss.unwrap_or(100.0),
            raw_loss: loss,
            elapsed_seconds: 1.5,
            case_dir: Some(PathBuf::from(format!("trials/trial_{number:03}"))),
            detail: None,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn append_enforces_sequence() {
        let mut history = RunHistory::new();
        history.append(trial(1, TrialStatus::Success, Some(0.2))).unwrap();
        assert!(history.append(trial(3, TrialStatus::Success, Some(0.1))).is_err());
        assert_eq!(history.len(), 1);
        assert_eq!(history.next_number(), 2);
    }

    #[test]
    fn writer_flushes_each_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("optimization_log.csv");
        let mut history = RunHistory::new().with_writer(HistoryWriter::create(&path).unwrap());

        history.append(trial(1, TrialStatus::Success, Some(0.25))).unwrap();
        // Readable before the history is dropped.
        let rows = load_history(&path).unwrap();
        assert_eq!(rows.len(), 1);

        history.append(trial(2, TrialStatus::NonConvergent, None)).unwrap();
        let rows = load_history(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].raw_loss, Some(0.25));
        assert_eq!(rows[1].status(), Some(TrialStatus::NonConvergent));
        assert_eq!(rows[1].loss, 100.0);
        assert_eq!(rows[1].raw_loss, None);
        assert_eq!(rows[1].case_dir, "trials/trial_002");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("trial,parameter,status,loss,raw_loss,elapsed_seconds,case_dir\n"));
    }

    #[test]
    fn empty_log_has_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        HistoryWriter::create(&path).unwrap();
        assert!(load_history(&path).unwrap().is_empty());
    }
}
