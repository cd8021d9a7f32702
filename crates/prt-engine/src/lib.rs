// Prandtl calibration engine
// Runs the external solver inside the bounded search loop

pub mod pipeline;
pub mod run;

pub use pipeline::{load_ground_truth, SolverPipeline};
pub use run::{
    Calibration, CalibrationReport, RunDirectory, RunSummary, ValidationSummary,
    CONFIG_SNAPSHOT_FILE, HISTORY_FILE, SUMMARY_FILE, TRIALS_DIR, VALIDATION_DIR,
};
