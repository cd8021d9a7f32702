//! Trial case materialization from the base solver template.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use prt_types::{CalibResult, CaseSettings, ConfigError};
use tracing::{debug, info};

/// Template key naming the mesh the solver reads.
const MESH_KEY: &str = "MESH_FILENAME";

/// A materialized trial case, ready to hand to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseHandle {
    pub trial_number: usize,
    pub parameter: f64,
    /// Directory the solver runs in; owned exclusively by this trial.
    pub work_dir: PathBuf,
    /// Generated solver input inside `work_dir`.
    pub input_file: PathBuf,
}

/// Parsed base template: raw lines plus the position of every `KEY= value`
/// assignment.
#[derive(Debug, Clone)]
struct CaseTemplate {
    path: PathBuf,
    lines: Vec<String>,
    keys: BTreeMap<String, Vec<usize>>,
}

impl CaseTemplate {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::TemplateNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path).map_err(|e| ConfigError::MalformedTemplate {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut keys: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(key) = assignment_key(line) {
                keys.entry(key.to_string()).or_default().push(idx);
            }
        }

        if keys.is_empty() {
            return Err(ConfigError::MalformedTemplate {
                path: path.to_path_buf(),
                message: "no KEY= value assignments".to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            lines,
            keys,
        })
    }

    fn value_of(&self, key: &str) -> Option<&str> {
        let idx = *self.keys.get(key)?.last()?;
        self.lines[idx].split_once('=').map(|(_, v)| v.trim())
    }
}

/// Key of a `KEY= value` line; `None` for comments, blanks and anything else.
fn assignment_key(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('%') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some(key)
}

/// Builds one fresh case directory per trial by substituting the parameter
/// into the base template.
#[derive(Debug, Clone)]
pub struct CaseConfigurator {
    template: CaseTemplate,
    parameter_key: String,
    overrides: BTreeMap<String, String>,
    /// `(absolute source, name inside the case directory)`.
    resources: Vec<(PathBuf, String)>,
    input_file_name: String,
}

impl CaseConfigurator {
    /// Load and validate the template and resources. Every error here is
    /// fatal to the run.
    pub fn new(settings: &CaseSettings) -> Result<Self, ConfigError> {
        let template = CaseTemplate::load(&settings.template)?;

        let parameter_key = settings.parameter_key.trim().to_string();
        match template.keys.get(&parameter_key).map(Vec::len) {
            Some(1) => {}
            Some(n) => {
                return Err(ConfigError::MalformedTemplate {
                    path: template.path.clone(),
                    message: format!("{parameter_key} is assigned {n} times"),
                })
            }
            None => {
                return Err(ConfigError::MalformedTemplate {
                    path: template.path.clone(),
                    message: format!("missing {parameter_key} assignment"),
                })
            }
        }
        if settings.overrides.contains_key(&parameter_key) {
            return Err(prt_types::config_error!(
                "case.overrides",
                "must not override the calibrated key {parameter_key}"
            ));
        }

        let mut overrides = settings.overrides.clone();
        let mut resources = Vec::new();
        for path in &settings.resources {
            resources.push(resolve_resource(path)?);
        }

        if settings.link_mesh {
            if let Some(mesh) = template.value_of(MESH_KEY) {
                let base = template.path.parent().unwrap_or_else(|| Path::new("."));
                let (source, name) = resolve_resource(&base.join(mesh))?;
                overrides
                    .entry(MESH_KEY.to_string())
                    .or_insert_with(|| name.clone());
                resources.push((source, name));
            }
        }

        let mut seen = BTreeSet::new();
        for (_, name) in &resources {
            if !seen.insert(name.as_str()) || *name == settings.input_file_name {
                return Err(prt_types::config_error!(
                    "case.resources",
                    "duplicate file name {name} in case directory"
                ));
            }
        }

        info!(
            "Case template {} ({} assignments, {} linked resources)",
            template.path.display(),
            template.keys.len(),
            resources.len()
        );

        Ok(Self {
            template,
            parameter_key,
            overrides,
            resources,
            input_file_name: settings.input_file_name.clone(),
        })
    }

    /// Solver input text for `parameter`.
    pub fn render(&self, parameter: f64) -> String {
        let mut out = String::new();
        let mut replaced = BTreeSet::new();

        for line in &self.template.lines {
            match assignment_key(line) {
                Some(key) if key == self.parameter_key => {
                    out.push_str(&format!("{key}= {parameter}"));
                }
                Some(key) if self.overrides.contains_key(key) => {
                    out.push_str(&format!("{key}= {}", self.overrides[key]));
                    replaced.insert(key.to_string());
                }
                _ => out.push_str(line),
            }
            out.push('\n');
        }

        for (key, value) in &self.overrides {
            if !replaced.contains(key) {
                out.push_str(&format!("{key}= {value}\n"));
            }
        }
        out
    }

    /// Materialize the case for one trial under `workdir`.
    ///
    /// The trial directory is created with `create_dir`, so an existing path
    /// is an error rather than being reused. The parameter is not clamped;
    /// bounds are the optimizer's responsibility.
    pub fn build_case(&self, trial_number: usize, parameter: f64, workdir: &Path) -> CalibResult<CaseHandle> {
        fs::create_dir_all(workdir)?;
        let work_dir = workdir.join(format!("trial_{trial_number:03}_prt_{parameter:.4}"));
        fs::create_dir(&work_dir)?;

        let input_file = work_dir.join(&self.input_file_name);
        fs::write(&input_file, self.render(parameter))?;

        for (source, name) in &self.resources {
            link_resource(source, &work_dir.join(name))?;
        }

        debug!(
            "Built case {} for Pr_t = {:.6}",
            work_dir.display(),
            parameter
        );

        Ok(CaseHandle {
            trial_number,
            parameter,
            work_dir,
            input_file,
        })
    }
}

fn resolve_resource(path: &Path) -> Result<(PathBuf, String), ConfigError> {
    let not_found = || ConfigError::ResourceNotFound {
        path: path.to_path_buf(),
    };
    let source = fs::canonicalize(path).map_err(|_| not_found())?;
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(not_found)?;
    Ok((source, name))
}

#[cfg(unix)]
fn link_resource(source: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(not(unix))]
fn link_resource(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::copy(source, target).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = "\
% Mach 14 flat plate
SOLVER= RANS
KIND_TURB_MODEL= SA
PRANDTL_TURB= 0.90
RESTART_SOL= YES
ITER= 20000
MESH_FILENAME= mesh_flatplate.su2
% PRANDTL_TURB= 0.85 (old value)
";

    fn fixture() -> (TempDir, CaseSettings) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base.cfg"), TEMPLATE).unwrap();
        fs::write(dir.path().join("mesh_flatplate.su2"), "NDIME= 2\n").unwrap();

        let settings = CaseSettings {
            template: dir.path().join("base.cfg"),
            ..CaseSettings::default()
        };
        (dir, settings)
    }

    #[test]
    fn render_substitutes_parameter_and_overrides() {
        let (_dir, settings) = fixture();
        let configurator = CaseConfigurator::new(&settings).unwrap();
        let text = configurator.render(0.72);

        assert!(text.contains("PRANDTL_TURB= 0.72\n"));
        assert!(text.contains("RESTART_SOL= NO\n"));
        assert!(text.contains("ITER= 51\n"));
        assert!(text.contains("KIND_TURB_MODEL= SA\n"));
        // Comments are untouched, including commented-out assignments.
        assert!(text.contains("% PRANDTL_TURB= 0.85 (old value)\n"));
        // Keys absent from the template are appended once.
        assert_eq!(text.matches("VOLUME_FILENAME= flow\n").count(), 1);
        assert!(!text.contains("PRANDTL_TURB= 0.90"));
    }

    #[test]
    fn build_case_creates_fresh_directory_with_mesh_link() {
        let (dir, settings) = fixture();
        let configurator = CaseConfigurator::new(&settings).unwrap();
        let trials = dir.path().join("trials");

        let case = configurator.build_case(1, 0.85, &trials).unwrap();
        assert!(case.work_dir.starts_with(&trials));
        assert_eq!(case.parameter, 0.85);
        let input = fs::read_to_string(&case.input_file).unwrap();
        assert!(input.contains("PRANDTL_TURB= 0.85"));
        assert!(input.contains("MESH_FILENAME= mesh_flatplate.su2"));
        assert_eq!(
            fs::read_to_string(case.work_dir.join("mesh_flatplate.su2")).unwrap(),
            "NDIME= 2\n"
        );

        let second = configurator.build_case(2, 0.85, &trials).unwrap();
        assert_ne!(second.work_dir, case.work_dir);

        // Same trial number again must not reuse the directory.
        assert!(configurator.build_case(1, 0.85, &trials).is_err());
    }

    #[test]
    fn missing_template_is_fatal() {
        let settings = CaseSettings {
            template: PathBuf::from("/nonexistent/base.cfg"),
            ..CaseSettings::default()
        };
        assert!(matches!(
            CaseConfigurator::new(&settings),
            Err(ConfigError::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn template_without_parameter_key_is_malformed() {
        let (dir, mut settings) = fixture();
        fs::write(dir.path().join("base.cfg"), "SOLVER= RANS\n").unwrap();
        settings.link_mesh = false;
        let err = CaseConfigurator::new(&settings).unwrap_err();
        assert!(err.to_string().contains("missing PRANDTL_TURB"), "{err}");
    }

    #[test]
    fn missing_mesh_is_fatal() {
        let (dir, settings) = fixture();
        fs::remove_file(dir.path().join("mesh_flatplate.su2")).unwrap();
        assert!(matches!(
            CaseConfigurator::new(&settings),
            Err(ConfigError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn overriding_calibrated_key_is_rejected() {
        let (_dir, mut settings) = fixture();
        settings
            .overrides
            .insert("PRANDTL_TURB".to_string(), "0.9".to_string());
        assert!(CaseConfigurator::new(&settings).is_err());
    }
}
