use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use prt_types::{DataError, GroundTruthSettings, Profile, ProfilePoint};

/// Loader for the DNS reference profile.
///
/// The file is a delimited table with a header row. Two numeric columns are
/// read: the position (normalized velocity) and the value (normalized
/// temperature). Unlike solver output, reference data is curated, so every
/// malformed record is an error rather than a skipped line.
#[derive(Debug, Clone)]
pub struct GroundTruthLoader {
    position_column: Option<String>,
    value_column: Option<String>,
    delimiter: u8,
}

impl Default for GroundTruthLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundTruthLoader {
    pub fn new() -> Self {
        Self {
            position_column: None,
            value_column: None,
            delimiter: b',',
        }
    }

    pub fn from_settings(settings: &GroundTruthSettings) -> Result<Self, DataError> {
        if !settings.delimiter.is_ascii() {
            return Err(DataError::LoadingFailed {
                message: format!("delimiter {:?} is not a single-byte character", settings.delimiter),
            });
        }

        Ok(Self {
            position_column: settings.position_column.clone(),
            value_column: settings.value_column.clone(),
            delimiter: settings.delimiter as u8,
        })
    }

    pub fn with_columns(mut self, position: impl Into<String>, value: impl Into<String>) -> Self {
        self.position_column = Some(position.into());
        self.value_column = Some(value.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Load the reference profile.
    pub fn load<P: AsRef<Path>>(&self, file_path: P) -> Result<Profile, DataError> {
        let path = file_path.as_ref();
        tracing::info!("Loading ground truth from: {}", path.display());

        if !path.exists() {
            return Err(DataError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV headers: {}", e),
            })?
            .clone();
        tracing::debug!("Ground truth headers: {:?}", headers);

        let (position_idx, value_idx) = self.detect_columns(&headers)?;

        let mut points = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            // Header occupies line 1.
            let line = row + 2;
            let record = result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV record at line {}: {}", line, e),
            })?;

            let position = parse_field(&record, position_idx, line)?;
            let value = parse_field(&record, value_idx, line)?;
            points.push(ProfilePoint::new(position, value));
        }

        let profile = Profile::new(points)?;
        let (min, max) = profile.domain();
        tracing::info!(
            "Loaded {} ground-truth points over [{:.4}, {:.4}]",
            profile.len(),
            min,
            max
        );
        Ok(profile)
    }

    fn detect_columns(&self, headers: &StringRecord) -> Result<(usize, usize), DataError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| DataError::ParseError {
                    message: format!("Could not find column '{}' in headers {:?}", name, headers),
                })
        };

        let position_idx = match &self.position_column {
            Some(name) => find(name)?,
            None => 0,
        };
        let value_idx = match &self.value_column {
            Some(name) => find(name)?,
            None => 1,
        };

        if headers.len() <= position_idx.max(value_idx) {
            return Err(DataError::ParseError {
                message: format!(
                    "Ground truth needs at least {} columns, header has {}",
                    position_idx.max(value_idx) + 1,
                    headers.len()
                ),
            });
        }
        if position_idx == value_idx {
            return Err(DataError::ParseError {
                message: "Position and value columns must differ".to_string(),
            });
        }

        Ok((position_idx, value_idx))
    }
}

fn parse_field(record: &StringRecord, idx: usize, line: usize) -> Result<f64, DataError> {
    let raw = record.get(idx).ok_or_else(|| DataError::ParseError {
        message: format!("Line {} has {} columns, expected at least {}", line, record.len(), idx + 1),
    })?;
    raw.parse::<f64>().map_err(|_| DataError::ParseError {
        message: format!("Invalid number '{}' at line {}", raw, line),
    })
}
