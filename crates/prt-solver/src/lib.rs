//! # prt-solver
//!
//! The solver-facing half of a trial: [`CaseConfigurator`] turns a trial
//! parameter into a self-contained case directory, and [`SolverSupervisor`]
//! runs the external solver there under a deadline and classifies the result.

mod configurator;
mod supervisor;

pub use configurator::{CaseConfigurator, CaseHandle};
pub use supervisor::{SolverOutcome, SolverSupervisor, STDERR_LOG, STDOUT_LOG};
