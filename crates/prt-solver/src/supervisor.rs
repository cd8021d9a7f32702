//! External solver process supervision.
//!
//! A solver run is one child process (plus whatever it spawns, e.g. MPI
//! ranks) rooted in the trial's case directory. The supervisor waits for it
//! with a deadline, tears the whole process group down on every exit path,
//! and classifies the run from its exit status and captured output.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use prt_types::{SolverSettings, TrialStatus};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::configurator::CaseHandle;

pub const STDOUT_LOG: &str = "solver.stdout.log";
pub const STDERR_LOG: &str = "solver.stderr.log";

/// Result of one supervised solver run. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    pub status: TrialStatus,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub elapsed: Duration,
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    pub detail: Option<String>,
}

/// Launches and supervises the external CFD solver.
#[derive(Debug, Clone)]
pub struct SolverSupervisor {
    program: Vec<String>,
    convergence_markers: Vec<String>,
    /// Lower-cased.
    divergence_markers: Vec<String>,
    detect_non_finite: bool,
    log_file: Option<String>,
}

impl SolverSupervisor {
    pub fn new(settings: &SolverSettings) -> Self {
        let mut program = Vec::new();
        if settings.mpi_ranks > 1 {
            program.push(settings.mpi_launcher.clone());
            program.push("-n".to_string());
            program.push(settings.mpi_ranks.to_string());
        }
        program.extend(settings.command.iter().cloned());

        Self {
            program,
            convergence_markers: settings.convergence_markers.clone(),
            divergence_markers: settings
                .divergence_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            detect_non_finite: settings.detect_non_finite,
            log_file: settings.log_file.clone(),
        }
    }

    /// Launcher and solver arguments, without the input file.
    pub fn program(&self) -> &[String] {
        &self.program
    }

    /// Full command line for `case`, for display.
    pub fn command_line(&self, case: &CaseHandle) -> String {
        let mut parts = self.program.clone();
        parts.push(input_arg(case).display().to_string());
        parts.join(" ")
    }

    /// Run the solver for `case`, waiting at most `timeout`.
    ///
    /// The child and every process in its group are gone when this returns.
    pub async fn run(&self, case: &CaseHandle, timeout: Duration) -> SolverOutcome {
        let started = Instant::now();
        let stdout_log = case.work_dir.join(STDOUT_LOG);
        let stderr_log = case.work_dir.join(STDERR_LOG);

        let finish = |status: TrialStatus, exit_code: Option<i32>, detail: Option<String>| SolverOutcome {
            status,
            stdout_log: stdout_log.clone(),
            stderr_log: stderr_log.clone(),
            elapsed: started.elapsed(),
            exit_code,
            detail,
        };

        let (stdout, stderr) = match (File::create(&stdout_log), File::create(&stderr_log)) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Cannot create solver logs in {}: {}", case.work_dir.display(), e);
                return finish(TrialStatus::Crashed, None, Some(format!("cannot create solver logs: {e}")));
            }
        };

        let mut std_cmd = std::process::Command::new(&self.program[0]);
        std_cmd
            .args(&self.program[1..])
            .arg(input_arg(case))
            .current_dir(&case.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group led by the child, so the whole tree can be signalled.
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        info!(
            "Trial {}: launching `{}` (timeout {:?})",
            case.trial_number,
            self.command_line(case),
            timeout
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Trial {}: failed to launch solver: {}", case.trial_number, e);
                return finish(
                    TrialStatus::Crashed,
                    None,
                    Some(format!("failed to launch {}: {e}", self.program[0])),
                );
            }
        };
        let pid = child.id();

        let exit = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Leader is reaped; stragglers left in its group go too.
                signal_group(pid);
                status
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                warn!("Trial {}: waiting on solver failed: {}", case.trial_number, e);
                return finish(TrialStatus::Crashed, None, Some(format!("wait failed: {e}")));
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                warn!(
                    "Trial {}: solver exceeded {:?}, process group killed",
                    case.trial_number, timeout
                );
                return finish(
                    TrialStatus::TimedOut,
                    None,
                    Some(format!("exceeded timeout of {:?}", timeout)),
                );
            }
        };

        let (status, detail) = self.classify(exit, case);
        let outcome = finish(status, exit.code(), detail);
        info!(
            "Trial {}: solver finished as {} in {:.2}s",
            case.trial_number,
            outcome.status,
            outcome.elapsed.as_secs_f64()
        );
        outcome
    }

    fn classify(&self, exit: ExitStatus, case: &CaseHandle) -> (TrialStatus, Option<String>) {
        if !exit.success() {
            let detail = match exit.code() {
                Some(code) => format!("solver exited with code {code}"),
                None => "solver terminated by signal".to_string(),
            };
            return (TrialStatus::Crashed, Some(detail));
        }

        let mut sources = vec![case.work_dir.join(STDOUT_LOG), case.work_dir.join(STDERR_LOG)];
        if let Some(log) = &self.log_file {
            sources.push(case.work_dir.join(log));
        }
        let text = sources
            .iter()
            .filter_map(|path| fs::read(path).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(signature) = self.find_divergence(&text) {
            return (TrialStatus::Crashed, Some(format!("divergence detected: {signature}")));
        }

        if self.convergence_markers.iter().any(|m| text.contains(m.as_str())) {
            (TrialStatus::Success, None)
        } else {
            (
                TrialStatus::NonConvergent,
                Some("no convergence marker in solver output".to_string()),
            )
        }
    }

    /// First divergence signature found in `text`: a configured marker
    /// (case-insensitive) or a numeric token that parses to NaN or infinity.
    pub fn find_divergence(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        if let Some(marker) = self.divergence_markers.iter().find(|m| lower.contains(m.as_str())) {
            return Some(format!("marker '{marker}'"));
        }

        if self.detect_non_finite {
            let separators = |c: char| c.is_whitespace() || ",|;:=()[]\"'".contains(c);
            return text
                .split(separators)
                .filter(|token| !token.is_empty())
                .find(|token| matches!(token.parse::<f64>(), Ok(v) if !v.is_finite()))
                .map(|token| format!("non-finite value '{token}'"));
        }
        None
    }
}

/// Solver input as seen from inside the case directory.
fn input_arg(case: &CaseHandle) -> &Path {
    case.input_file
        .file_name()
        .map(Path::new)
        .unwrap_or(&case.input_file)
}

/// Kill the process group and reap the child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    signal_group(pid);
    if let Err(e) = child.start_kill() {
        debug!("start_kill after group kill: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap solver process: {}", e);
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // SAFETY: killpg only takes integers; an empty group yields ESRCH.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "killpg({}) returned {}: {}",
            pid,
            rc,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>) {}
