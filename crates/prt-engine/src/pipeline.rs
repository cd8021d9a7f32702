// Solver-in-the-loop objective
// Case generation, supervised solver run and loss evaluation for one trial

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use prt_data::{GroundTruthLoader, LossEvaluator};
use prt_optimizer::TrialEvaluator;
use prt_solver::{CaseConfigurator, SolverSupervisor};
use prt_types::{
    CalibResult, CalibrationConfig, CalibrationError, GroundTruthSettings, Profile, TrialOutcome,
    TrialStatus,
};
use tracing::warn;

/// Load and validate the reference profile. Any problem here is fatal.
pub fn load_ground_truth(settings: &GroundTruthSettings) -> CalibResult<Profile> {
    GroundTruthLoader::from_settings(settings)
        .and_then(|loader| loader.load(&settings.path))
        .map_err(CalibrationError::GroundTruth)
}

/// Configurator → Supervisor → LossEvaluator, packaged as the objective the
/// driver minimizes.
#[derive(Debug)]
pub struct SolverPipeline {
    configurator: CaseConfigurator,
    supervisor: SolverSupervisor,
    evaluator: LossEvaluator,
    ground_truth: Profile,
    timeout: Duration,
    trials_dir: PathBuf,
}

impl SolverPipeline {
    /// Template and resource problems surface here, before any trial runs.
    pub fn new(config: &CalibrationConfig, ground_truth: Profile) -> CalibResult<Self> {
        Ok(Self {
            configurator: CaseConfigurator::new(&config.case)?,
            supervisor: SolverSupervisor::new(&config.solver),
            evaluator: LossEvaluator::new(&config.extraction),
            ground_truth,
            timeout: config.solver.timeout(),
            trials_dir: config.output.results_dir.join("trials"),
        })
    }

    /// Parent directory for the case directories of optimizer trials.
    pub fn with_trials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trials_dir = dir.into();
        self
    }

    pub fn ground_truth(&self) -> &Profile {
        &self.ground_truth
    }

    pub fn supervisor(&self) -> &SolverSupervisor {
        &self.supervisor
    }

    pub fn configurator(&self) -> &CaseConfigurator {
        &self.configurator
    }

    /// Evaluate `parameter` in a fresh case directory under `workdir`.
    ///
    /// Only failures to create the case (disk, permissions) are errors.
    /// Solver failures and unusable output come back as tagged outcomes.
    pub async fn run_case(&self, trial_number: usize, parameter: f64, workdir: &Path) -> CalibResult<TrialOutcome> {
        let case = self.configurator.build_case(trial_number, parameter, workdir)?;
        let solver = self.supervisor.run(&case, self.timeout).await;
        let case_dir = Some(case.work_dir.clone());

        if solver.status != TrialStatus::Success {
            let detail = solver
                .detail
                .unwrap_or_else(|| solver.status.to_string());
            return Ok(TrialOutcome::failure(solver.status, detail, case_dir));
        }

        match self.evaluator.evaluate(&case.work_dir, &self.ground_truth) {
            Ok(loss) => Ok(TrialOutcome::success(loss, case_dir)),
            Err(e) => {
                warn!("Trial {}: solver output unusable: {}", trial_number, e);
                Ok(TrialOutcome::failure(
                    TrialStatus::Crashed,
                    format!("unusable solver output: {e}"),
                    case_dir,
                ))
            }
        }
    }
}

#[async_trait]
impl TrialEvaluator for SolverPipeline {
    async fn evaluate(&mut self, trial_number: usize, parameter: f64) -> CalibResult<TrialOutcome> {
        self.run_case(trial_number, parameter, &self.trials_dir).await
    }
}
