//! Tecplot ASCII volume output and boundary-layer profile extraction.

use std::fs;
use std::path::Path;

use prt_types::{DataError, ExtractionSettings, Profile, ProfilePoint};

/// Point-packed Tecplot ASCII data: named variables and numeric node rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TecplotTable {
    pub variables: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl TecplotTable {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|e| DataError::LoadingFailed {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;

        let table = Self::parse(&text)?;
        tracing::debug!(
            "Parsed {} rows x {} variables from {}",
            table.rows.len(),
            table.variables.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse the header (`VARIABLES` up to the first `ZONE` line) and every
    /// subsequent line holding exactly one number per variable. Connectivity
    /// rows and anything else that does not fit are skipped.
    pub fn parse(text: &str) -> Result<Self, DataError> {
        let mut lines = text.lines();
        let mut variables = Vec::new();
        let mut in_variables = false;
        let mut saw_zone = false;

        for line in lines.by_ref() {
            let upper = line.trim_start().to_ascii_uppercase();
            if upper.starts_with("ZONE") {
                saw_zone = true;
                break;
            }
            if upper.starts_with("VARIABLES") {
                in_variables = true;
                variables.extend(quoted_names(line));
            } else if in_variables && line.trim_start().starts_with('"') {
                variables.extend(quoted_names(line));
            } else {
                in_variables = false;
            }
        }

        if variables.is_empty() {
            return Err(DataError::ParseError {
                message: "missing VARIABLES header".to_string(),
            });
        }
        if !saw_zone {
            return Err(DataError::ParseError {
                message: "missing ZONE record".to_string(),
            });
        }

        let width = variables.len();
        let mut skipped = 0usize;
        let rows: Vec<Vec<f64>> = lines
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let row = parse_row(line, width);
                if row.is_none() {
                    skipped += 1;
                }
                row
            })
            .collect();

        if skipped > 0 {
            tracing::debug!("Skipped {} non-node lines in Tecplot data", skipped);
        }
        if rows.is_empty() {
            return Err(DataError::InsufficientData {
                message: "no node rows after ZONE".to_string(),
            });
        }

        Ok(Self { variables, rows })
    }

    fn find(&self, predicate: impl Fn(&str) -> bool) -> Option<usize> {
        self.variables
            .iter()
            .position(|name| predicate(&name.to_ascii_lowercase()))
    }

    fn column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[idx])
    }
}

fn quoted_names(line: &str) -> Vec<String> {
    line.split('"')
        .skip(1)
        .step_by(2)
        .map(|name| name.trim().to_string())
        .collect()
}

fn parse_row(line: &str, width: usize) -> Option<Vec<f64>> {
    let fields: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|f| !f.is_empty())
        .collect();
    if fields.len() != width {
        return None;
    }
    fields.iter().map(|f| f.parse::<f64>().ok()).collect()
}

/// Cuts the wall-normal profile at a streamwise station and normalizes it to
/// the `(u / u_inf, T / T_inf)` plane the DNS reference lives in.
#[derive(Debug, Clone)]
pub struct ProfileExtractor {
    x_station: f64,
    x_tolerance: f64,
    u_inf: f64,
    t_inf: f64,
}

/// Column indices resolved from the variable names.
#[derive(Debug, Clone, Copy)]
struct Columns {
    x: usize,
    temperature: usize,
    velocity: VelocitySource,
}

#[derive(Debug, Clone, Copy)]
enum VelocitySource {
    Direct(usize),
    Momentum { momentum: usize, density: usize },
}

impl ProfileExtractor {
    pub fn new(settings: &ExtractionSettings) -> Self {
        Self {
            x_station: settings.x_station,
            x_tolerance: settings.x_tolerance,
            u_inf: settings.u_inf,
            t_inf: settings.t_inf,
        }
    }

    pub fn extract(&self, table: &TecplotTable) -> Result<Profile, DataError> {
        let columns = Self::resolve_columns(table)?;

        let xs: Vec<f64> = table.column(columns.x).collect();
        let temperatures: Vec<f64> = table.column(columns.temperature).collect();
        let velocities: Vec<f64> = match columns.velocity {
            VelocitySource::Direct(idx) => table.column(idx).collect(),
            VelocitySource::Momentum { momentum, density } => table
                .column(momentum)
                .zip(table.column(density))
                .map(|(m, rho)| m / rho)
                .collect(),
        };

        let mut points: Vec<ProfilePoint> = xs
            .iter()
            .zip(velocities.iter().zip(temperatures.iter()))
            .filter(|(x, _)| (**x - self.x_station).abs() < self.x_tolerance)
            .map(|(_, (u, t))| ProfilePoint::new(u / self.u_inf, t / self.t_inf))
            .collect();

        if points.is_empty() {
            return Err(DataError::InsufficientData {
                message: format!(
                    "no nodes within {} of x = {}",
                    self.x_tolerance, self.x_station
                ),
            });
        }

        // Stable sort keeps the first node of any duplicated velocity.
        points.sort_by(|a, b| a.position.total_cmp(&b.position));
        points.dedup_by(|later, earlier| later.position == earlier.position);

        tracing::debug!("Extracted {} profile points at x = {}", points.len(), self.x_station);
        Profile::new(points)
    }

    fn resolve_columns(table: &TecplotTable) -> Result<Columns, DataError> {
        let missing = |what: &str| DataError::ParseError {
            message: format!("no {} column among {:?}", what, table.variables),
        };

        let x = table
            .find(|c| c == "x" || c.contains("coordinatex"))
            .ok_or_else(|| missing("x coordinate"))?;
        let temperature = table
            .find(|c| c == "temperature")
            .or_else(|| table.find(|c| c.contains("temperature")))
            .ok_or_else(|| missing("temperature"))?;

        // Component letter is read after the stem: "velocity" itself has a `y`.
        let streamwise = |c: &str, stem: &str| {
            c.find(stem).map_or(false, |at| {
                let suffix = &c[at + stem.len()..];
                suffix.contains('x') && !suffix.contains('y')
            })
        };
        let velocity = match table.find(|c| streamwise(c, "velocity")) {
            Some(idx) => VelocitySource::Direct(idx),
            None => {
                let momentum = table
                    .find(|c| streamwise(c, "momentum"))
                    .ok_or_else(|| missing("streamwise velocity or momentum"))?;
                let density = table
                    .find(|c| c.contains("density"))
                    .ok_or_else(|| missing("density"))?;
                VelocitySource::Momentum { momentum, density }
            }
        };

        Ok(Columns {
            x,
            temperature,
            velocity,
        })
    }
}
