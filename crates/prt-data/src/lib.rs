//! # prt-data
//!
//! Reference data and solver output handling: the DNS ground-truth loader,
//! the Tecplot ASCII parser with boundary-layer slice extraction, and the
//! RMSE loss evaluated on the ground-truth grid.

pub mod loaders;
pub mod loss;
pub mod tecplot;

pub use loaders::GroundTruthLoader;
pub use loss::{profile_rmse, resample, rmse, LossEvaluator};
pub use tecplot::{ProfileExtractor, TecplotTable};
