//! Calibration runs: one self-contained results directory per run, the
//! optimizer loop over the solver pipeline, and the optional validation
//! re-run at the best parameter.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use prt_optimizer::{
    BestTrial, CalibrationDriver, HistoryWriter, OptimizationConfig, OptimizationResult,
    TerminationReason,
};
use prt_types::{CalibResult, CalibrationConfig, RunId, TrialOutcome, TrialStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{load_ground_truth, SolverPipeline};

pub const HISTORY_FILE: &str = "optimization_log.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const CONFIG_SNAPSHOT_FILE: &str = "calibration.toml";
pub const TRIALS_DIR: &str = "trials";
pub const VALIDATION_DIR: &str = "validation";

/// Case number used for the validation re-run; optimizer trials start at 1.
const VALIDATION_TRIAL: usize = 0;

/// `results/run_<yymmdd_HHMM>/` with its fixed layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Create a new, empty run directory under `results_root`. Never reuses
    /// an existing directory; a name collision within the same minute gets a
    /// short random suffix.
    pub fn create(results_root: &Path) -> CalibResult<Self> {
        fs::create_dir_all(results_root)?;
        let stamp = Local::now().format("%y%m%d_%H%M").to_string();

        let mut root = results_root.join(format!("run_{stamp}"));
        if let Err(e) = fs::create_dir(&root) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                return Err(e.into());
            }
            let suffix = Uuid::new_v4().simple().to_string();
            root = results_root.join(format!("run_{stamp}_{}", &suffix[..8]));
            fs::create_dir(&root)?;
        }
        let root = fs::canonicalize(&root)?;

        fs::create_dir(root.join(TRIALS_DIR))?;
        fs::create_dir(root.join(VALIDATION_DIR))?;
        info!("Results will be saved to {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn trials_dir(&self) -> PathBuf {
        self.root.join(TRIALS_DIR)
    }

    pub fn validation_dir(&self) -> PathBuf {
        self.root.join(VALIDATION_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_SNAPSHOT_FILE)
    }

    pub fn write_config(&self, config: &CalibrationConfig) -> CalibResult<()> {
        fs::write(self.config_path(), config.to_toml_string()?)?;
        Ok(())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> CalibResult<()> {
        fs::write(self.summary_path(), serde_json::to_string_pretty(summary)?)?;
        Ok(())
    }
}

/// Outcome of the re-run at the best parameter. Not part of the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub parameter: f64,
    pub status: TrialStatus,
    pub loss: Option<f64>,
    pub case_dir: Option<PathBuf>,
    pub detail: Option<String>,
}

impl ValidationSummary {
    fn new(parameter: f64, outcome: TrialOutcome) -> Self {
        Self {
            parameter,
            status: outcome.status,
            loss: outcome.loss,
            case_dir: outcome.case_dir,
            detail: outcome.detail,
        }
    }
}

/// Machine-readable digest written to `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub run_dir: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lower: f64,
    pub upper: f64,
    pub tolerance: f64,
    pub max_evals: usize,
    pub penalty: f64,
    pub termination: TerminationReason,
    pub best: Option<BestTrial>,
    pub final_parameter: f64,
    pub evaluations: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Trial count per status name; every status is listed.
    pub status_counts: BTreeMap<String, usize>,
    pub validation: Option<ValidationSummary>,
}

impl RunSummary {
    pub fn new(
        config: &OptimizationConfig,
        result: &OptimizationResult,
        validation: Option<ValidationSummary>,
        run_dir: &Path,
    ) -> Self {
        let status_counts = TrialStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), result.count(*s)))
            .collect();

        Self {
            run_id: result.run_id,
            run_dir: run_dir.to_path_buf(),
            started_at: result.started_at,
            finished_at: result.finished_at,
            lower: config.lower,
            upper: config.upper,
            tolerance: config.tolerance,
            max_evals: config.max_evals,
            penalty: config.penalty,
            termination: result.termination,
            best: result.best,
            final_parameter: result.final_parameter,
            evaluations: result.evaluations(),
            succeeded: result.trials_succeeded,
            failed: result.trials_failed,
            status_counts,
            validation,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub run_dir: RunDirectory,
    pub result: OptimizationResult,
    pub summary: RunSummary,
}

/// A validated, ready-to-run calibration: configuration checked, ground
/// truth loaded and the case template parsed. Nothing is written to disk
/// until [`Calibration::run`].
#[derive(Debug)]
pub struct Calibration {
    config: CalibrationConfig,
    pipeline: SolverPipeline,
}

impl Calibration {
    pub fn prepare(config: CalibrationConfig) -> CalibResult<Self> {
        config.validate()?;
        let ground_truth = load_ground_truth(&config.ground_truth)?;
        let pipeline = SolverPipeline::new(&config, ground_truth)?;
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Human-readable description of what [`Calibration::run`] would do.
    pub fn plan(&self) -> String {
        let opt = &self.config.optimizer;
        let (lo, hi) = self.pipeline.ground_truth().domain();
        let mut lines = vec![
            format!("Calibrating {} on [{}, {}]", self.config.case.parameter_key, opt.lower, opt.upper),
            format!(
                "Bounded Brent search: tolerance {}, at most {} solver runs, penalty {}",
                opt.tolerance, opt.max_evals, opt.penalty
            ),
            format!("Template: {}", self.config.case.template.display()),
            format!(
                "Ground truth: {} ({} points over [{}, {}])",
                self.config.ground_truth.path.display(),
                self.pipeline.ground_truth().len(),
                lo,
                hi
            ),
            format!(
                "Solver: `{} {}` per trial, timeout {}s",
                self.pipeline.supervisor().program().join(" "),
                self.config.case.input_file_name,
                self.config.solver.timeout_secs
            ),
            format!("Results under: {}", self.config.output.results_dir.display()),
        ];
        if self.config.output.validation_run {
            lines.push("Validation re-run at the best parameter: enabled".to_string());
        }
        lines.join("\n")
    }

    /// Run the full calibration. Only setup and I/O failures are errors;
    /// a run whose trials all failed still completes with `best = None`.
    pub async fn run(self) -> CalibResult<CalibrationReport> {
        let Self { config, pipeline } = self;

        let run_dir = RunDirectory::create(&config.output.results_dir)?;
        run_dir.write_config(&config)?;

        let opt_config = OptimizationConfig::from_settings(run_dir.name(), &config.optimizer);
        let driver = CalibrationDriver::new(opt_config.clone())?
            .with_history_writer(HistoryWriter::create(run_dir.history_path())?);

        let mut pipeline = pipeline.with_trials_dir(run_dir.trials_dir());
        let result = driver.optimize(&mut pipeline).await?;

        let validation = match (result.best, config.output.validation_run) {
            (Some(best), true) => Some(validate_best(&pipeline, &best, &run_dir.validation_dir()).await?),
            (None, true) => {
                warn!("Skipping validation run: no feasible trial");
                None
            }
            (_, false) => None,
        };

        let summary = RunSummary::new(&opt_config, &result, validation, run_dir.root());
        run_dir.write_summary(&summary)?;
        info!("Summary written to {}", run_dir.summary_path().display());

        Ok(CalibrationReport {
            run_dir,
            result,
            summary,
        })
    }
}

async fn validate_best(pipeline: &SolverPipeline, best: &BestTrial, dir: &Path) -> CalibResult<ValidationSummary> {
    info!("Validation run at optimal Pr_t = {:.6}", best.parameter);
    let outcome = pipeline.run_case(VALIDATION_TRIAL, best.parameter, dir).await?;

    match outcome.loss {
        Some(loss) if (loss - best.loss).abs() <= 1e-9 * best.loss.abs().max(1.0) => {
            info!("Validation reproduced RMSE {:.6}", loss)
        }
        Some(loss) => warn!(
            "Validation RMSE {:.6} differs from trial {} RMSE {:.6}",
            loss, best.trial_number, best.loss
        ),
        None => warn!(
            "Validation run {}: {}",
            outcome.status,
            outcome.detail.as_deref().unwrap_or("no detail")
        ),
    }
    Ok(ValidationSummary::new(best.parameter, outcome))
}
