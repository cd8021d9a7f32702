//! Position/value profiles compared during calibration.

use serde::{Deserialize, Serialize};

use crate::errors::DataError;

/// One sample of a boundary-layer profile.
///
/// For the flat-plate case the position is the normalized streamwise velocity
/// `u / u_inf` and the value is the normalized temperature `T / T_inf`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub position: f64,
    pub value: f64,
}

impl ProfilePoint {
    pub fn new(position: f64, value: f64) -> Self {
        Self { position, value }
    }
}

/// An ordered profile with at least two points and strictly increasing,
/// finite positions.
///
/// Used both for the DNS ground truth (loaded once, read-only) and for the
/// transient profile extracted from a single solver run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ProfilePoint>", into = "Vec<ProfilePoint>")]
pub struct Profile {
    points: Vec<ProfilePoint>,
}

impl Profile {
    pub fn new(points: Vec<ProfilePoint>) -> Result<Self, DataError> {
        if points.len() < 2 {
            return Err(DataError::InsufficientData {
                message: format!("profile needs at least 2 points, got {}", points.len()),
            });
        }

        for (index, point) in points.iter().enumerate() {
            if !point.position.is_finite() || !point.value.is_finite() {
                return Err(DataError::NonFinite { index });
            }
        }

        for (index, pair) in points.windows(2).enumerate() {
            if pair[1].position <= pair[0].position {
                return Err(DataError::NotMonotonic {
                    index: index + 1,
                    previous: pair[0].position,
                    current: pair[1].position,
                });
            }
        }

        Ok(Self { points })
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(position, value)| ProfilePoint::new(position, value))
                .collect(),
        )
    }

    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// A validated profile holds at least two points, so this is false.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Covered position range `(min, max)`.
    pub fn domain(&self) -> (f64, f64) {
        // Construction guarantees at least two points.
        (
            self.points[0].position,
            self.points[self.points.len() - 1].position,
        )
    }

    pub fn positions(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.position)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }
}

impl TryFrom<Vec<ProfilePoint>> for Profile {
    type Error = DataError;

    fn try_from(points: Vec<ProfilePoint>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<Profile> for Vec<ProfilePoint> {
    fn from(profile: Profile) -> Self {
        profile.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_increasing_positions() {
        let profile = Profile::from_pairs([(0.0, 6.0), (0.5, 4.0), (1.0, 1.0)]).unwrap();
        assert_eq!(profile.len(), 3);
        assert!(!profile.is_empty());
        assert_eq!(profile.domain(), (0.0, 1.0));
        assert_eq!(profile.values().collect::<Vec<_>>(), vec![6.0, 4.0, 1.0]);
    }

    #[test]
    fn rejects_single_point() {
        let err = Profile::from_pairs([(0.0, 1.0)]).unwrap_err();
        assert!(matches!(err, DataError::InsufficientData { .. }));

        let err = Profile::new(Vec::new()).unwrap_err();
        assert!(matches!(err, DataError::InsufficientData { .. }));
    }

    #[test]
    fn rejects_repeated_position() {
        let err = Profile::from_pairs([(0.0, 1.0), (0.5, 2.0), (0.5, 3.0)]).unwrap_err();
        match err {
            DataError::NotMonotonic { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_nan_value() {
        let err = Profile::from_pairs([(0.0, 1.0), (1.0, f64::NAN)]).unwrap_err();
        assert!(matches!(err, DataError::NonFinite { index: 1 }));
    }

    #[test]
    fn deserialization_validates() {
        let bad = r#"[{"position":1.0,"value":0.0},{"position":0.0,"value":0.0}]"#;
        assert!(serde_json::from_str::<Profile>(bad).is_err());

        let good = r#"[{"position":0.0,"value":0.0},{"position":1.0,"value":0.0}]"#;
        let profile: Profile = serde_json::from_str(good).unwrap();
        assert_eq!(profile.len(), 2);
    }
}
