//! Profile comparison: resampling onto the reference grid and RMSE.

use std::path::Path;

use prt_types::{DataError, ExtractionSettings, Profile};

use crate::tecplot::{ProfileExtractor, TecplotTable};

/// Piecewise-linear interpolation of `profile` at each of `positions`.
///
/// Linear interpolation between strictly increasing knots never overshoots
/// the neighbouring values. Every requested position must lie inside the
/// profile's domain.
pub fn resample(profile: &Profile, positions: impl IntoIterator<Item = f64>) -> Result<Vec<f64>, DataError> {
    let points = profile.points();
    let (min, max) = profile.domain();

    positions
        .into_iter()
        .map(|p| {
            if !(min..=max).contains(&p) {
                return Err(DataError::InsufficientCoverage { position: p, min, max });
            }
            let i = points.partition_point(|q| q.position < p);
            let right = points[i];
            if right.position == p {
                return Ok(right.value);
            }
            let left = points[i - 1];
            let t = (p - left.position) / (right.position - left.position);
            Ok(left.value + t * (right.value - left.value))
        })
        .collect()
}

/// Root-mean-square difference between two equally long series.
pub fn rmse(predicted: &[f64], reference: &[f64]) -> Result<f64, DataError> {
    if predicted.len() != reference.len() || predicted.is_empty() {
        return Err(DataError::InsufficientData {
            message: format!(
                "cannot compare {} predicted with {} reference values",
                predicted.len(),
                reference.len()
            ),
        });
    }

    let sum_sq: f64 = predicted
        .iter()
        .zip(reference)
        .map(|(p, r)| (p - r).powi(2))
        .sum();
    let value = (sum_sq / predicted.len() as f64).sqrt();

    if !value.is_finite() {
        return Err(DataError::ParseError {
            message: "loss evaluated to a non-finite value".to_string(),
        });
    }
    Ok(value)
}

/// RMSE of `simulation` against `ground_truth`, sampled on the ground-truth grid.
pub fn profile_rmse(simulation: &Profile, ground_truth: &Profile) -> Result<f64, DataError> {
    let interpolated = resample(simulation, ground_truth.positions())?;
    let reference: Vec<f64> = ground_truth.values().collect();
    rmse(&interpolated, &reference)
}

/// Turns a finished case directory into a scalar loss.
#[derive(Debug, Clone)]
pub struct LossEvaluator {
    result_file: String,
    extractor: ProfileExtractor,
}

impl LossEvaluator {
    pub fn new(settings: &ExtractionSettings) -> Self {
        Self {
            result_file: settings.result_file.clone(),
            extractor: ProfileExtractor::new(settings),
        }
    }

    /// Only meaningful for cases whose solver run succeeded. Any error means
    /// the trial output is unusable; callers treat it like a crash.
    pub fn evaluate(&self, case_dir: &Path, ground_truth: &Profile) -> Result<f64, DataError> {
        let table = TecplotTable::read(case_dir.join(&self.result_file))?;
        let simulation = self.extractor.extract(&table)?;
        let loss = profile_rmse(&simulation, ground_truth)?;
        tracing::debug!(
            "RMSE {:.6} over {} reference points ({} simulated)",
            loss,
            ground_truth.len(),
            simulation.len()
        );
        Ok(loss)
    }
}
