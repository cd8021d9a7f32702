//! # prt-optimizer
//!
//! Bounded scalar minimization for turbulent Prandtl number calibration.
//!
//! Provides the ask/tell bounded Brent search, trial lifecycle tracking, the
//! append-only run history with its CSV log, and the driver that ties an
//! asynchronous trial evaluator to the search.

mod driver;
mod history;
mod search;
mod trial;

pub use driver::{CalibrationDriver, TrialEvaluator};
pub use history::{load_history, HistoryRow, HistoryWriter, RunHistory, HISTORY_COLUMNS};
pub use search::{minimize_bounded, BoundedBrent, OptimizationState, ScalarMinimum, ScalarSearch};
pub use trial::{
    BestTrial, OptimizationConfig, OptimizationResult, OptimizationStatus, TerminationReason,
    TrialPhase, TrialTracker,
};
