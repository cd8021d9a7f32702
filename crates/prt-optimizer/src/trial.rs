//! Trial tracking and calibration run management.

use chrono::{DateTime, Utc};
use prt_types::{
    CalibResult, CalibrationError, ConfigError, OptimizerSettings, RunId, Trial, TrialOutcome,
    TrialStatus,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: RunId,
    pub name: String,

    /// Physical bounds on the parameter; never queried outside.
    pub lower: f64,
    pub upper: f64,

    /// Absolute tolerance on the parameter.
    pub tolerance: f64,

    /// Maximum number of trials (solver launches) to run.
    pub max_evals: usize,

    /// Loss substituted for every non-successful trial.
    pub penalty: f64,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        let defaults = OptimizerSettings::default();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            lower,
            upper,
            tolerance: defaults.tolerance,
            max_evals: defaults.max_evals,
            penalty: defaults.penalty,
            created_at: Utc::now(),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &OptimizerSettings) -> Self {
        Self::new(name, settings.lower, settings.upper)
            .with_tolerance(settings.tolerance)
            .with_max_evals(settings.max_evals)
            .with_penalty(settings.penalty)
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_evals(mut self, n: usize) -> Self {
        self.max_evals = n;
        self
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        OptimizerSettings {
            lower: self.lower,
            upper: self.upper,
            tolerance: self.tolerance,
            max_evals: self.max_evals,
            penalty: self.penalty,
        }
        .validate()
    }
}

/// Why the minimizer stopped asking for trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Bracket narrowed below the tolerance.
    Converged,
    /// The evaluation budget was spent first.
    MaxEvaluations,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => f.write_str("converged"),
            Self::MaxEvaluations => f.write_str("max evaluations reached"),
        }
    }
}

/// Running tally of a calibration: timestamps, trial counts and the best
/// feasible trial so far. The driver reports its best point from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: RunId,
    pub trials_succeeded: usize,
    pub trials_failed: usize,
    pub best: Option<BestTrial>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OptimizationStatus {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            trials_succeeded: 0,
            trials_failed: 0,
            best: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn trials_total(&self) -> usize {
        self.trials_succeeded + self.trials_failed
    }

    /// Count `trial` and keep it as best if it is feasible and strictly
    /// improves on the current best, so ties go to the earliest trial.
    /// Penalized trials never become best.
    pub fn record(&mut self, trial: &Trial) {
        if !trial.is_feasible() {
            self.trials_failed += 1;
            return;
        }
        self.trials_succeeded += 1;

        let improves = match &self.best {
            None => true,
            Some(current_best) => trial.loss < current_best.loss,
        };
        if improves {
            self.best = Some(BestTrial::from(trial));
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// Lifecycle of a trial before it becomes an immutable [`Trial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    Pending,
    Running,
    Finished(TrialStatus),
}

/// Tracks one trial from `Pending` through `Running` to a terminal status.
#[derive(Debug)]
pub struct TrialTracker {
    number: usize,
    parameter: f64,
    phase: TrialPhase,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
}

impl TrialTracker {
    pub fn new(number: usize, parameter: f64) -> Self {
        Self {
            number,
            parameter,
            phase: TrialPhase::Pending,
            started_at: None,
            started: None,
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn mark_running(&mut self) -> CalibResult<()> {
        if self.phase != TrialPhase::Pending {
            return Err(CalibrationError::Internal(format!(
                "trial {} cannot start from {:?}",
                self.number, self.phase
            )));
        }
        self.phase = TrialPhase::Running;
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Close the trial with `outcome`. Non-success outcomes, and successes
    /// without a finite non-negative loss, are recorded with `penalty`.
    pub fn finish(&mut self, outcome: TrialOutcome, penalty: f64) -> CalibResult<Trial> {
        let (started_at, started) = match (self.phase, self.started_at, self.started) {
            (TrialPhase::Running, Some(at), Some(instant)) => (at, instant),
            _ => {
                return Err(CalibrationError::Internal(format!(
                    "trial {} cannot finish from {:?}",
                    self.number, self.phase
                )))
            }
        };

        let TrialOutcome {
            mut status,
            loss,
            case_dir,
            mut detail,
        } = outcome;

        let raw_loss = match (status, loss) {
            (TrialStatus::Success, Some(value)) if value.is_finite() && value >= 0.0 => Some(value),
            (TrialStatus::Success, other) => {
                status = TrialStatus::Crashed;
                detail = Some(format!("successful run reported unusable loss {other:?}"));
                None
            }
            _ => None,
        };

        self.phase = TrialPhase::Finished(status);
        Ok(Trial {
            number: self.number,
            parameter: self.parameter,
            status,
            loss: raw_loss.unwrap_or(penalty),
            raw_loss,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            case_dir,
            detail,
            started_at,
        })
    }
}

/// Best feasible point of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    pub trial_number: usize,
    pub parameter: f64,
    pub loss: f64,
}

impl From<&Trial> for BestTrial {
    fn from(trial: &Trial) -> Self {
        Self {
            trial_number: trial.number,
            parameter: trial.parameter,
            loss: trial.loss,
        }
    }
}

/// Outcome of a complete calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: RunId,
    /// Best among successful trials; `None` when no trial succeeded.
    pub best: Option<BestTrial>,
    pub termination: TerminationReason,
    /// The minimizer's own final estimate, which may be a penalized point.
    pub final_parameter: f64,
    pub history: Vec<Trial>,
    pub trials_succeeded: usize,
    pub trials_failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OptimizationResult {
    pub fn evaluations(&self) -> usize {
        self.history.len()
    }

    pub fn found_minimum(&self) -> bool {
        self.best.is_some()
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.history.iter().filter(|t| t.status == status).count()
    }

    /// One-line human summary.
    pub fn describe(&self) -> String {
        match &self.best {
            Some(best) => format!(
                "best Pr_t = {:.5} (RMSE {:.5}, trial {}) after {} evaluations, {}",
                best.parameter,
                best.loss,
                best.trial_number,
                self.evaluations(),
                self.termination
            ),
            None => format!(
                "no feasible minimum found: all {} evaluations failed, {}",
                self.evaluations(),
                self.termination
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(number: usize, parameter: f64, outcome: TrialOutcome) -> Trial {
        let mut tracker = TrialTracker::new(number, parameter);
        tracker.mark_running().unwrap();
        tracker.finish(outcome, 100.0).unwrap()
    }

    #[test]
    fn optimization_status_timestamps() {
        let config = OptimizationConfig::new("test_run", 0.5, 0.95);
        let mut status = OptimizationStatus::new(config.id);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert!(status.started_at.is_some());
        assert!(status.finished_at.is_none());

        status.mark_completed();
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_trial_tracking_ignores_penalized() {
        let mut status = OptimizationStatus::new(Uuid::new_v4());

        status.record(&finished(1, 0.6, TrialOutcome::success(0.3, None)));
        assert_eq!(status.best.unwrap().parameter, 0.6);

        status.record(&finished(2, 0.7, TrialOutcome::success(0.1, None)));
        assert_eq!(status.best.unwrap().parameter, 0.7);

        // Worse result should not replace
        status.record(&finished(3, 0.8, TrialOutcome::success(0.2, None)));
        assert_eq!(status.best.unwrap().parameter, 0.7);

        // Crashes never become best, even though nothing beats them on loss
        status.record(&finished(4, 0.9, TrialOutcome::failure(TrialStatus::Crashed, "boom", None)));
        assert_eq!(status.best.unwrap().parameter, 0.7);
        assert_eq!(status.trials_succeeded, 3);
        assert_eq!(status.trials_failed, 1);
        assert_eq!(status.trials_total(), 4);
    }

    #[test]
    fn equal_loss_keeps_earliest_best() {
        let mut status = OptimizationStatus::new(Uuid::new_v4());
        status.record(&finished(1, 0.6, TrialOutcome::success(0.1, None)));
        status.record(&finished(2, 0.7, TrialOutcome::success(0.1, None)));

        let best = status.best.unwrap();
        assert_eq!(best.trial_number, 1);
        assert_eq!(best.loss, 0.1);
    }

    #[test]
    fn no_feasible_trial_leaves_best_empty() {
        let mut status = OptimizationStatus::new(Uuid::new_v4());
        status.record(&finished(1, 0.6, TrialOutcome::failure(TrialStatus::TimedOut, "3600s", None)));
        assert!(status.best.is_none());
        assert_eq!(status.trials_failed, 1);
    }

    #[test]
    fn trial_lifecycle() {
        let mut tracker = TrialTracker::new(1, 0.85);
        assert_eq!(tracker.phase(), TrialPhase::Pending);

        tracker.mark_running().unwrap();
        assert_eq!(tracker.phase(), TrialPhase::Running);

        let trial = tracker.finish(TrialOutcome::success(0.42, None), 100.0).unwrap();
        assert_eq!(tracker.phase(), TrialPhase::Finished(TrialStatus::Success));
        assert_eq!(trial.loss, 0.42);
        assert_eq!(trial.raw_loss, Some(0.42));
        assert!(trial.elapsed_seconds >= 0.0);

        // Terminal states never transition again.
        assert!(tracker.mark_running().is_err());
        assert!(tracker.finish(TrialOutcome::success(0.1, None), 100.0).is_err());
    }

    #[test]
    fn finish_requires_running() {
        let mut tracker = TrialTracker::new(1, 0.85);
        assert!(tracker.finish(TrialOutcome::success(0.1, None), 100.0).is_err());
    }

    #[test]
    fn trial_failure_gets_penalty() {
        let trial = finished(2, 0.55, TrialOutcome::failure(TrialStatus::TimedOut, "3600s", None));
        assert_eq!(trial.status, TrialStatus::TimedOut);
        assert_eq!(trial.loss, 100.0);
        assert!(trial.raw_loss.is_none());
        assert_eq!(trial.detail.as_deref(), Some("3600s"));
    }

    #[test]
    fn success_with_nan_loss_is_demoted() {
        let trial = finished(3, 0.7, TrialOutcome::success(f64::NAN, None));
        assert_eq!(trial.status, TrialStatus::Crashed);
        assert_eq!(trial.loss, 100.0);
        assert!(trial.raw_loss.is_none());
    }

    #[test]
    fn config_from_settings_validates() {
        let settings = OptimizerSettings {
            lower: 0.1,
            upper: 1.0,
            tolerance: 1e-4,
            max_evals: 30,
            penalty: 50.0,
        };
        let config = OptimizationConfig::from_settings("calib", &settings);
        assert_eq!(config.bounds(), (0.1, 1.0));
        assert_eq!(config.max_evals, 30);
        config.validate().unwrap();

        assert!(config.with_penalty(f64::NAN).validate().is_err());
    }
}
