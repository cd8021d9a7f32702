//! Bounded scalar search strategies.
//!
//! Strategies are driven ask/tell style: the caller asks for the next point
//! with [`ScalarSearch::suggest`], evaluates it however it likes (a closure,
//! an external solver run) and hands the loss back with
//! [`ScalarSearch::report`]. This keeps the minimizer free of any knowledge
//! about how evaluations happen.

use prt_types::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::trial::TerminationReason;

/// `(3 - sqrt(5)) / 2`, the golden-section fraction.
const GOLDEN_MEAN: f64 = 0.381_966_011_250_105_1;
/// Square root of machine epsilon, the relative floor on the step size.
const SQRT_EPS: f64 = 1.483_239_697_419_132_6e-8;

/// Trait for bounded one-dimensional search strategies.
pub trait ScalarSearch: Send + Sync {
    /// Next parameter to evaluate, or `None` once the search has terminated.
    /// Repeated calls without a `report` return the same point.
    fn suggest(&mut self) -> Option<f64>;

    /// Report the loss observed at the last suggested parameter.
    fn report(&mut self, parameter: f64, loss: f64);

    /// Why the search stopped, once it has.
    fn termination(&self) -> Option<TerminationReason>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Snapshot of the minimizer's bracket and incumbent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationState {
    /// Current bracket `[lower, upper]`, always inside the configured bounds.
    pub lower: f64,
    pub upper: f64,
    /// Incumbent parameter and its loss; `None` before the first report.
    pub best_parameter: Option<f64>,
    pub best_loss: Option<f64>,
    pub evaluations: usize,
}

/// Result of [`minimize_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarMinimum {
    pub parameter: f64,
    pub loss: f64,
    pub evaluations: usize,
    pub termination: TerminationReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Waiting for the loss at the first golden-section point.
    Initial,
    Searching,
    Done(TerminationReason),
}

/// Brent's bounded minimizer: golden-section steps safeguarded by
/// successive parabolic interpolation.
///
/// Holds three points: `xf` (lowest loss seen), `nfc` (second lowest) and
/// `fulc` (previous value of `nfc`). The bracket `[a, b]` only shrinks.
/// Suggestions are clamped to the configured bounds, so no point outside
/// `[lower, upper]` is ever proposed.
#[derive(Debug, Clone)]
pub struct BoundedBrent {
    lower: f64,
    upper: f64,
    xatol: f64,
    max_evals: usize,

    a: f64,
    b: f64,
    xf: f64,
    fx: f64,
    nfc: f64,
    fnfc: f64,
    fulc: f64,
    ffulc: f64,
    /// Step taken two iterations ago, and the last step.
    e: f64,
    rat: f64,

    evaluations: usize,
    phase: Phase,
    pending: Option<f64>,
}

impl BoundedBrent {
    pub fn new(lower: f64, upper: f64, tolerance: f64, max_evals: usize) -> Result<Self, ConfigError> {
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(ConfigError::InvalidBounds { lower, upper });
        }
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(prt_types::config_error!(
                "optimizer.tolerance",
                "must be positive, got {tolerance}"
            ));
        }
        if max_evals == 0 {
            return Err(prt_types::config_error!("optimizer.max_evals", "must be at least 1"));
        }

        let start = lower + GOLDEN_MEAN * (upper - lower);
        Ok(Self {
            lower,
            upper,
            xatol: tolerance,
            max_evals,
            a: lower,
            b: upper,
            xf: start,
            fx: f64::INFINITY,
            nfc: start,
            fnfc: f64::INFINITY,
            fulc: start,
            ffulc: f64::INFINITY,
            e: 0.0,
            rat: 0.0,
            evaluations: 0,
            phase: Phase::Initial,
            pending: None,
        })
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn state(&self) -> OptimizationState {
        let seen = self.phase != Phase::Initial;
        OptimizationState {
            lower: self.a,
            upper: self.b,
            best_parameter: seen.then_some(self.xf),
            best_loss: seen.then_some(self.fx),
            evaluations: self.evaluations,
        }
    }

    /// Midpoint and tolerances for the current bracket.
    fn tolerances(&self) -> (f64, f64, f64) {
        let xm = 0.5 * (self.a + self.b);
        let tol1 = SQRT_EPS * self.xf.abs() + self.xatol / 3.0;
        (xm, tol1, 2.0 * tol1)
    }

    fn next_point(&mut self) -> f64 {
        let (xm, tol1, tol2) = self.tolerances();
        let (a, b, xf) = (self.a, self.b, self.xf);

        let mut golden = true;
        if self.e.abs() > tol1 {
            // Parabola through the three retained points.
            let mut r = (xf - self.nfc) * (self.fx - self.ffulc);
            let mut q = (xf - self.fulc) * (self.fx - self.fnfc);
            let mut p = (xf - self.fulc) * q - (xf - self.nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = self.e;
            self.e = self.rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                golden = false;
                self.rat = p / q;
                let x = xf + self.rat;
                // Never evaluate right next to a bracket end.
                if (x - a) < tol2 || (b - x) < tol2 {
                    self.rat = tol1 * unit_sign(xm - xf);
                }
            }
        }

        if golden {
            self.e = if xf >= xm { a - xf } else { b - xf };
            self.rat = GOLDEN_MEAN * self.e;
        }

        let x = xf + unit_sign(self.rat) * self.rat.abs().max(tol1);
        x.clamp(self.lower, self.upper)
    }

    fn accept(&mut self, x: f64, fu: f64) {
        if fu <= self.fx {
            if x >= self.xf {
                self.a = self.xf;
            } else {
                self.b = self.xf;
            }
            self.fulc = self.nfc;
            self.ffulc = self.fnfc;
            self.nfc = self.xf;
            self.fnfc = self.fx;
            self.xf = x;
            self.fx = fu;
        } else {
            if x < self.xf {
                self.a = x;
            } else {
                self.b = x;
            }
            if fu <= self.fnfc || self.nfc == self.xf {
                self.fulc = self.nfc;
                self.ffulc = self.fnfc;
                self.nfc = x;
                self.fnfc = fu;
            } else if fu <= self.ffulc || self.fulc == self.xf || self.fulc == self.nfc {
                self.fulc = x;
                self.ffulc = fu;
            }
        }
    }
}

impl ScalarSearch for BoundedBrent {
    fn suggest(&mut self) -> Option<f64> {
        if let Some(x) = self.pending {
            return Some(x);
        }

        let x = match self.phase {
            Phase::Done(_) => return None,
            Phase::Initial => self.xf,
            Phase::Searching => {
                let (xm, _, tol2) = self.tolerances();
                if (self.xf - xm).abs() <= tol2 - 0.5 * (self.b - self.a) {
                    self.phase = Phase::Done(TerminationReason::Converged);
                    debug!("Brent converged at {:.6} after {} evaluations", self.xf, self.evaluations);
                    return None;
                }
                if self.evaluations >= self.max_evals {
                    self.phase = Phase::Done(TerminationReason::MaxEvaluations);
                    debug!("Brent stopped at the {} evaluation budget", self.max_evals);
                    return None;
                }
                self.next_point()
            }
        };

        self.pending = Some(x);
        Some(x)
    }

    fn report(&mut self, parameter: f64, loss: f64) {
        let Some(x) = self.pending.take() else {
            warn!("Ignoring loss {} for unsolicited parameter {}", loss, parameter);
            return;
        };
        if x != parameter {
            warn!("Loss reported for {} but {} was suggested; using the suggested point", parameter, x);
        }
        // NaN would poison every comparison below.
        let fu = if loss.is_nan() { f64::INFINITY } else { loss };
        self.evaluations += 1;

        match self.phase {
            Phase::Initial => {
                self.fx = fu;
                self.fnfc = fu;
                self.ffulc = fu;
                self.phase = if self.max_evals <= 1 {
                    Phase::Done(TerminationReason::MaxEvaluations)
                } else {
                    Phase::Searching
                };
            }
            Phase::Searching => self.accept(x, fu),
            Phase::Done(_) => {}
        }
    }

    fn termination(&self) -> Option<TerminationReason> {
        match self.phase {
            Phase::Done(reason) => Some(reason),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        "bounded_brent"
    }
}

/// Sign with zero counted as positive.
fn unit_sign(v: f64) -> f64 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Minimize `objective` over `[lower, upper]` synchronously.
pub fn minimize_bounded<F>(
    lower: f64,
    upper: f64,
    tolerance: f64,
    max_evals: usize,
    mut objective: F,
) -> Result<ScalarMinimum, ConfigError>
where
    F: FnMut(f64) -> f64,
{
    let mut search = BoundedBrent::new(lower, upper, tolerance, max_evals)?;
    while let Some(x) = search.suggest() {
        let loss = objective(x);
        search.report(x, loss);
    }

    Ok(ScalarMinimum {
        parameter: search.xf,
        loss: search.fx,
        evaluations: search.evaluations,
        termination: search
            .termination()
            .unwrap_or(TerminationReason::MaxEvaluations),
    })
}
