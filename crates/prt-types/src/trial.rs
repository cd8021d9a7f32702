//! Trial records shared between the solver layer and the optimizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique calibration run identifier.
pub type RunId = Uuid;

/// Terminal classification of one objective evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialStatus {
    Success,
    Crashed,
    NonConvergent,
    TimedOut,
}

impl TrialStatus {
    pub const ALL: [TrialStatus; 4] = [
        TrialStatus::Success,
        TrialStatus::Crashed,
        TrialStatus::NonConvergent,
        TrialStatus::TimedOut,
    ];

    pub fn is_success(self) -> bool {
        matches!(self, TrialStatus::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrialStatus::Success => "success",
            TrialStatus::Crashed => "crashed",
            TrialStatus::NonConvergent => "non_convergent",
            TrialStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrialStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown trial status: {s}"))
    }
}

/// What a single pipeline evaluation produced, before the optimizer turns it
/// into a recorded [`Trial`].
///
/// `loss` is only present for successful trials. Failures carry a
/// human-readable `detail` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub status: TrialStatus,
    pub loss: Option<f64>,
    pub case_dir: Option<PathBuf>,
    pub detail: Option<String>,
}

impl TrialOutcome {
    pub fn success(loss: f64, case_dir: Option<PathBuf>) -> Self {
        Self {
            status: TrialStatus::Success,
            loss: Some(loss),
            case_dir,
            detail: None,
        }
    }

    pub fn failure(status: TrialStatus, detail: impl Into<String>, case_dir: Option<PathBuf>) -> Self {
        Self {
            status,
            loss: None,
            case_dir,
            detail: Some(detail.into()),
        }
    }
}

/// One recorded objective evaluation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// 1-based evaluation index within the run.
    pub number: usize,
    pub parameter: f64,
    pub status: TrialStatus,
    /// Loss seen by the minimizer: the RMSE for successes, the penalty otherwise.
    pub loss: f64,
    /// The measured RMSE, absent for failed trials.
    pub raw_loss: Option<f64>,
    pub elapsed_seconds: f64,
    pub case_dir: Option<PathBuf>,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Trial {
    pub fn is_feasible(&self) -> bool {
        self.status.is_success() && self.raw_loss.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in TrialStatus::ALL {
            assert_eq!(status.as_str().parse::<TrialStatus>().unwrap(), status);
        }
        assert!("exploded".parse::<TrialStatus>().is_err());
    }

    #[test]
    fn failure_outcome_has_no_loss() {
        let outcome = TrialOutcome::failure(TrialStatus::TimedOut, "killed after 5s", None);
        assert_eq!(outcome.status, TrialStatus::TimedOut);
        assert!(outcome.loss.is_none());
        assert_eq!(outcome.detail.as_deref(), Some("killed after 5s"));
    }

    #[test]
    fn only_success_is_feasible() {
        let mut trial = Trial {
            number: 1,
            parameter: 0.85,
            status: TrialStatus::Success,
            loss: 0.12,
            raw_loss: Some(0.12),
            elapsed_seconds: 1.0,
            case_dir: None,
            detail: None,
            started_at: Utc::now(),
        };
        assert!(trial.is_feasible());

        trial.status = TrialStatus::NonConvergent;
        assert!(!trial.is_feasible());
    }
}
