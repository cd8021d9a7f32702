//! Calibration loop: the minimizer asks, an evaluator runs the trial, the
//! history records it.

use async_trait::async_trait;
use prt_types::{CalibResult, ConfigError, TrialOutcome};
use tracing::{info, warn};

use crate::history::{HistoryWriter, RunHistory};
use crate::search::{BoundedBrent, ScalarSearch};
use crate::trial::{
    OptimizationConfig, OptimizationResult, OptimizationStatus, TerminationReason, TrialTracker,
};

/// Runs one trial for a given parameter.
///
/// Per-trial failures (crash, timeout, unusable output) come back as `Ok`
/// outcomes with a non-success status. `Err` is reserved for faults that
/// make the whole run meaningless and aborts it.
#[async_trait]
pub trait TrialEvaluator: Send {
    async fn evaluate(&mut self, trial_number: usize, parameter: f64) -> CalibResult<TrialOutcome>;
}

/// Owns the minimizer state and the run history for one calibration.
#[derive(Debug)]
pub struct CalibrationDriver {
    config: OptimizationConfig,
    history: RunHistory,
}

impl CalibrationDriver {
    pub fn new(config: OptimizationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            history: RunHistory::new(),
        })
    }

    /// Mirror every appended trial to a CSV log.
    pub fn with_history_writer(mut self, writer: HistoryWriter) -> Self {
        self.history = self.history.with_writer(writer);
        self
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Run the bounded minimization to completion.
    ///
    /// Every suggested parameter produces exactly one trial, appended to the
    /// history before the minimizer sees its loss.
    pub async fn optimize<E>(self, evaluator: &mut E) -> CalibResult<OptimizationResult>
    where
        E: TrialEvaluator + ?Sized,
    {
        let Self { config, mut history } = self;
        let mut status = OptimizationStatus::new(config.id);
        let mut search = BoundedBrent::new(config.lower, config.upper, config.tolerance, config.max_evals)?;

        info!(
            "Starting calibration '{}' on [{}, {}] with {} (tolerance {}, at most {} evaluations, penalty {})",
            config.name,
            config.lower,
            config.upper,
            search.name(),
            config.tolerance,
            config.max_evals,
            config.penalty
        );
        status.mark_running();

        while let Some(parameter) = search.suggest() {
            let number = history.next_number();
            let mut tracker = TrialTracker::new(number, parameter);
            tracker.mark_running()?;
            info!("Trial {}: Pr_t = {:.6}", number, parameter);

            let outcome = match evaluator.evaluate(number, parameter).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Calibration aborted during trial {}: {}", number, e);
                    return Err(e);
                }
            };

            let trial = tracker.finish(outcome, config.penalty)?;
            match trial.raw_loss {
                Some(loss) => {
                    if loss >= config.penalty {
                        warn!(
                            "Trial {} loss {} is not below the penalty {}; failed trials may look competitive",
                            number, loss, config.penalty
                        );
                    }
                    info!("Trial {} finished: RMSE = {:.6} ({:.1}s)", number, loss, trial.elapsed_seconds);
                }
                None => warn!(
                    "Trial {} {}: {} (penalty {} applied)",
                    number,
                    trial.status,
                    trial.detail.as_deref().unwrap_or("no detail"),
                    config.penalty
                ),
            }

            status.record(&trial);
            let loss = trial.loss;
            history.append(trial)?;
            search.report(parameter, loss);
        }

        let termination = search
            .termination()
            .unwrap_or(TerminationReason::MaxEvaluations);
        status.mark_completed();

        let final_parameter = search.state().best_parameter.unwrap_or(config.lower);

        let result = OptimizationResult {
            run_id: config.id,
            best: status.best,
            termination,
            final_parameter,
            history: history.into_trials(),
            trials_succeeded: status.trials_succeeded,
            trials_failed: status.trials_failed,
            started_at: status.started_at,
            finished_at: status.finished_at,
        };
        info!(
            "Calibration '{}' finished: {} ({} succeeded, {} failed)",
            config.name,
            result.describe(),
            status.trials_succeeded,
            status.trials_failed
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prt_types::{CalibrationError, TrialStatus};

    /// Analytic objective standing in for the solver pipeline.
    struct Quadratic {
        optimum: f64,
        calls: Vec<f64>,
    }

    #[async_trait]
    impl TrialEvaluator for Quadratic {
        async fn evaluate(&mut self, _n: usize, parameter: f64) -> CalibResult<TrialOutcome> {
            self.calls.push(parameter);
            Ok(TrialOutcome::success((parameter - self.optimum).powi(2), None))
        }
    }

    struct AlwaysCrash;

    #[async_trait]
    impl TrialEvaluator for AlwaysCrash {
        async fn evaluate(&mut self, _n: usize, _parameter: f64) -> CalibResult<TrialOutcome> {
            Ok(TrialOutcome::failure(TrialStatus::Crashed, "exit status 1", None))
        }
    }

    /// Crashes below a threshold, quadratic above it.
    struct CrashBelow(f64);

    #[async_trait]
    impl TrialEvaluator for CrashBelow {
        async fn evaluate(&mut self, _n: usize, parameter: f64) -> CalibResult<TrialOutcome> {
            if parameter < self.0 {
                Ok(TrialOutcome::failure(TrialStatus::TimedOut, "timed out", None))
            } else {
                Ok(TrialOutcome::success((parameter - 0.6).powi(2), None))
            }
        }
    }

    struct FailOnThird;

    #[async_trait]
    impl TrialEvaluator for FailOnThird {
        async fn evaluate(&mut self, n: usize, parameter: f64) -> CalibResult<TrialOutcome> {
            if n == 3 {
                return Err(CalibrationError::Internal("disk full".to_string()));
            }
            Ok(TrialOutcome::success(parameter, None))
        }
    }

    #[tokio::test]
    async fn converges_on_analytic_objective() {
        let config = OptimizationConfig::new("quadratic", 0.1, 1.0)
            .with_tolerance(1e-4)
            .with_max_evals(50);
        let mut evaluator = Quadratic {
            optimum: 0.6,
            calls: Vec::new(),
        };

        let result = CalibrationDriver::new(config)
            .unwrap()
            .optimize(&mut evaluator)
            .await
            .unwrap();

        let best = result.best.unwrap();
        assert!((best.parameter - 0.6).abs() < 1e-4, "best = {}", best.parameter);
        assert_eq!(result.termination, TerminationReason::Converged);
        assert!(result.evaluations() < 50);

        // One trial per evaluation, numbered in order, inside the bounds.
        assert_eq!(result.history.len(), evaluator.calls.len());
        for (i, (trial, call)) in result.history.iter().zip(&evaluator.calls).enumerate() {
            assert_eq!(trial.number, i + 1);
            assert_eq!(trial.parameter, *call);
            assert!((0.1..=1.0).contains(&trial.parameter));
        }
    }

    #[tokio::test]
    async fn all_failures_yield_no_minimum() {
        let config = OptimizationConfig::new("crash", 0.5, 0.95)
            .with_tolerance(1e-6)
            .with_max_evals(5)
            .with_penalty(100.0);

        let result = CalibrationDriver::new(config)
            .unwrap()
            .optimize(&mut AlwaysCrash)
            .await
            .unwrap();

        assert_eq!(result.evaluations(), 5);
        assert!(result.best.is_none());
        assert!(!result.found_minimum());
        assert_eq!(result.count(TrialStatus::Crashed), 5);
        assert_eq!(result.trials_failed, 5);
        assert_eq!(result.trials_succeeded, 0);
        assert!(result.history.iter().all(|t| t.loss == 100.0));
        assert!(result.describe().contains("no feasible minimum found"));
    }

    #[tokio::test]
    async fn failed_trials_are_penalized_and_never_best() {
        let config = OptimizationConfig::new("partial", 0.1, 1.0)
            .with_tolerance(1e-4)
            .with_max_evals(40)
            .with_penalty(50.0);

        let result = CalibrationDriver::new(config)
            .unwrap()
            .optimize(&mut CrashBelow(0.45))
            .await
            .unwrap();

        // The first golden-section point (about 0.444) falls in the crash region.
        assert_eq!(result.history[0].status, TrialStatus::TimedOut);
        for trial in &result.history {
            if trial.status.is_success() {
                assert_eq!(trial.raw_loss, Some(trial.loss));
            } else {
                assert_eq!(trial.loss, 50.0);
                assert!(trial.raw_loss.is_none());
            }
        }
        let best = result.best.unwrap();
        assert!(best.parameter >= 0.45);
        assert!((best.parameter - 0.6).abs() < 1e-3);

        // Reported counts and best agree with the recorded history.
        let succeeded = result.history.iter().filter(|t| t.is_feasible()).count();
        assert_eq!(result.trials_succeeded, succeeded);
        assert_eq!(result.trials_failed, result.evaluations() - succeeded);
        let lowest = result
            .history
            .iter()
            .filter(|t| t.is_feasible())
            .map(|t| t.loss)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(best.loss, lowest);
        assert!(result.history[best.trial_number - 1].is_feasible());
    }

    #[tokio::test]
    async fn evaluator_error_aborts_run() {
        let config = OptimizationConfig::new("abort", 0.5, 0.95).with_max_evals(10);
        let err = CalibrationDriver::new(config)
            .unwrap()
            .optimize(&mut FailOnThird)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn history_is_written_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optimization_log.csv");
        let config = OptimizationConfig::new("logged", 0.5, 0.95).with_max_evals(3);

        let driver = CalibrationDriver::new(config)
            .unwrap()
            .with_history_writer(HistoryWriter::create(&path).unwrap());
        let err = driver.optimize(&mut FailOnThird).await.unwrap_err();
        assert!(matches!(err, CalibrationError::Internal(_)));

        // The two trials completed before the abort are on disk.
        let rows = crate::history::load_history(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].trial, 2);
    }

    #[test]
    fn invalid_config_rejected() {
        let config = OptimizationConfig::new("bad", 0.95, 0.5);
        assert!(CalibrationDriver::new(config).is_err());
    }
}
