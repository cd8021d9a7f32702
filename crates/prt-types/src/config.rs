//! Calibration configuration, loaded from TOML with per-section defaults.
//!
//! The defaults reproduce the Mach 14 cold-wall flat-plate campaign: an SU2
//! Spalart-Allmaras case swept over `Pr_t ∈ [0.5, 0.95]` and compared against
//! DNS at `x = 1.5 m`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Top-level configuration for a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CalibrationConfig {
    pub optimizer: OptimizerSettings,
    pub solver: SolverSettings,
    pub case: CaseSettings,
    pub extraction: ExtractionSettings,
    pub ground_truth: GroundTruthSettings,
    pub output: OutputSettings,
}

/// Bounded minimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Lower physical bound on Pr_t.
    pub lower: f64,
    /// Upper physical bound on Pr_t.
    pub upper: f64,
    /// Absolute tolerance on the parameter (bracket width criterion).
    pub tolerance: f64,
    /// Hard cap on objective evaluations, i.e. solver launches.
    pub max_evals: usize,
    /// Loss reported to the minimizer for any non-successful trial. Must
    /// exceed the worst plausible real loss; normalized-temperature RMSE is
    /// of order one, so the default leaves two orders of magnitude.
    pub penalty: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            lower: 0.5,
            upper: 0.95,
            tolerance: 1e-3,
            max_evals: 5,
            penalty: 100.0,
        }
    }
}

impl OptimizerSettings {
    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.lower.is_finite() || !self.upper.is_finite() || self.lower >= self.upper {
            return Err(ConfigError::InvalidBounds {
                lower: self.lower,
                upper: self.upper,
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(crate::config_error!(
                "optimizer.tolerance",
                "must be positive, got {}",
                self.tolerance
            ));
        }
        if self.max_evals == 0 {
            return Err(crate::config_error!("optimizer.max_evals", "must be at least 1"));
        }
        if !(self.penalty.is_finite() && self.penalty > 0.0) {
            return Err(ConfigError::InvalidPenalty {
                penalty: self.penalty,
            });
        }
        Ok(())
    }
}

/// External solver invocation and outcome classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Solver executable and leading arguments; the case input file is appended.
    pub command: Vec<String>,
    /// MPI launcher used when `mpi_ranks > 1`.
    pub mpi_launcher: String,
    pub mpi_ranks: usize,
    pub timeout_secs: u64,
    /// Any of these in the solver output marks a converged run.
    pub convergence_markers: Vec<String>,
    /// Any of these (case-insensitive) marks a diverged run.
    pub divergence_markers: Vec<String>,
    /// Treat NaN/Inf numeric tokens in the output as divergence.
    pub detect_non_finite: bool,
    /// Solver-written log in the case directory that is scanned alongside
    /// stdout/stderr when present.
    pub log_file: Option<String>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            command: vec!["SU2_CFD".to_string()],
            mpi_launcher: "mpirun".to_string(),
            mpi_ranks: 4,
            timeout_secs: 3600,
            convergence_markers: vec!["Exit Success".to_string()],
            divergence_markers: vec!["diverged".to_string()],
            detect_non_finite: true,
            log_file: Some("history.csv".to_string()),
        }
    }
}

impl SolverSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How a trial case is materialized from the base template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseSettings {
    /// Base solver configuration template.
    pub template: PathBuf,
    /// Template key that receives the trial parameter.
    pub parameter_key: String,
    /// Extra static files linked into every case directory.
    pub resources: Vec<PathBuf>,
    /// Link the mesh named by `MESH_FILENAME` (resolved next to the template).
    pub link_mesh: bool,
    /// File name of the generated input inside the case directory.
    pub input_file_name: String,
    /// Fixed `KEY= value` replacements applied to every trial.
    pub overrides: BTreeMap<String, String>,
}

impl Default for CaseSettings {
    fn default() -> Self {
        let overrides = [
            ("RESTART_SOL", "NO"),
            ("ITER", "51"),
            ("OUTPUT_WRT_FREQ", "10"),
            ("OUTPUT_FILES", "(RESTART, PARAVIEW, TECPLOT_ASCII)"),
            ("VOLUME_FILENAME", "flow"),
            ("CONV_FILENAME", "history"),
            ("RESTART_FILENAME", "restart_flow"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            template: PathBuf::from("config/turb_SA_flatplate_M14Tw018.cfg"),
            parameter_key: "PRANDTL_TURB".to_string(),
            resources: Vec::new(),
            link_mesh: true,
            input_file_name: "case.cfg".to_string(),
            overrides,
        }
    }
}

/// Where and how the comparison profile is cut out of the solver result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Tecplot ASCII volume output written by the solver.
    pub result_file: String,
    /// Streamwise station of the profile [m].
    pub x_station: f64,
    /// Half-width of the slice around the station [m].
    pub x_tolerance: f64,
    /// Freestream velocity [m/s].
    pub u_inf: f64,
    /// Freestream temperature [K].
    pub t_inf: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            result_file: "flow.dat".to_string(),
            x_station: 1.5,
            x_tolerance: 0.005,
            u_inf: 1882.0,
            t_inf: 47.4,
        }
    }
}

/// Reference profile location and layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthSettings {
    pub path: PathBuf,
    /// Header of the position column; first column when unset.
    pub position_column: Option<String>,
    /// Header of the value column; second column when unset.
    pub value_column: Option<String>,
    pub delimiter: char,
}

impl Default for GroundTruthSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/DNS Dataset.csv"),
            position_column: None,
            value_column: None,
            delimiter: ',',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Parent directory for per-run result directories.
    pub results_dir: PathBuf,
    /// Re-run the solver at the best parameter once the search finishes.
    pub validation_run: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            validation_run: true,
        }
    }
}

impl CalibrationConfig {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| crate::config_error!("config", "{e}"))
    }

    /// Check every setting the run depends on. Called once before any trial.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.optimizer.validate()?;

        let solver = &self.solver;
        if solver.command.is_empty() || solver.command[0].trim().is_empty() {
            return Err(crate::config_error!("solver.command", "must name an executable"));
        }
        if solver.mpi_ranks == 0 {
            return Err(crate::config_error!("solver.mpi_ranks", "must be at least 1"));
        }
        if solver.mpi_ranks > 1 && solver.mpi_launcher.trim().is_empty() {
            return Err(crate::config_error!(
                "solver.mpi_launcher",
                "required when mpi_ranks > 1"
            ));
        }
        if solver.timeout_secs == 0 {
            return Err(crate::config_error!("solver.timeout_secs", "must be positive"));
        }

        if self.case.parameter_key.trim().is_empty() {
            return Err(crate::config_error!("case.parameter_key", "must not be empty"));
        }
        if self.case.input_file_name.trim().is_empty() {
            return Err(crate::config_error!("case.input_file_name", "must not be empty"));
        }

        let ext = &self.extraction;
        if !(ext.x_tolerance.is_finite() && ext.x_tolerance > 0.0) {
            return Err(crate::config_error!(
                "extraction.x_tolerance",
                "must be positive, got {}",
                ext.x_tolerance
            ));
        }
        for (field, value) in [("extraction.u_inf", ext.u_inf), ("extraction.t_inf", ext.t_inf)] {
            if !value.is_finite() || value == 0.0 {
                return Err(crate::config_error!(field, "must be finite and non-zero, got {value}"));
            }
        }

        Ok(())
    }

    /// Anchor every relative file path at `base`, normally the directory of
    /// the config file they were written in.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        anchor(&mut self.case.template);
        self.case.resources.iter_mut().for_each(|path| anchor(path));
        anchor(&mut self.ground_truth.path);
        anchor(&mut self.output.results_dir);
    }
}
