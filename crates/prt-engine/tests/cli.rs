#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const TEMPLATE: &str = "\
SOLVER= RANS
KIND_TURB_MODEL= SA
PRANDTL_TURB= 0.90
MESH_FILENAME= mesh_flatplate.su2
";

const GROUND_TRUTH: &str = "u,T\n0.0,6.0\n0.5,3.5\n1.0,1.0\n";

const CRASHING_SOLVER: &str = "echo 'Error in solver' >&2\nexit 1\n";

/// Case layout with a config file that uses paths relative to itself.
fn workspace(solver_script: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("config")).unwrap();
    fs::write(root.join("config/base.cfg"), TEMPLATE).unwrap();
    fs::write(root.join("config/mesh_flatplate.su2"), "NDIME= 2\n").unwrap();
    fs::write(root.join("dns.csv"), GROUND_TRUTH).unwrap();
    fs::write(root.join("solver.sh"), solver_script).unwrap();

    let config = format!(
        r#"[optimizer]
max_evals = 3

[solver]
command = ["sh", "{solver}"]
mpi_ranks = 1
timeout_secs = 20

[case]
template = "config/base.cfg"

[extraction]
u_inf = 1.0
t_inf = 1.0

[ground_truth]
path = "dns.csv"

[output]
results_dir = "results"
validation_run = false
"#,
        solver = root.join("solver.sh").display()
    );
    fs::write(root.join("calibration.toml"), config).unwrap();
    dir
}

fn calibrate(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_prt-calibrate"))
        .args(args)
        .current_dir(cwd)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

#[test]
fn dry_run_applies_flag_overrides() {
    let ws = workspace(CRASHING_SOLVER);
    let config = ws.path().join("calibration.toml");
    let out = calibrate(
        ws.path(),
        &["--config", config.to_str().unwrap(), "--lower", "0.6", "--upper", "0.9", "--max-evals", "7", "--dry-run"],
    );

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("PRANDTL_TURB on [0.6, 0.9]"), "{stdout}");
    assert!(stdout.contains("at most 7 solver runs"));
    // Relative paths in the file were anchored at its directory.
    assert!(stdout.contains(&ws.path().join("config/base.cfg").display().to_string()));
    assert!(!ws.path().join("results").exists());
}

#[test]
fn all_failed_run_completes_without_minimum() {
    let ws = workspace(CRASHING_SOLVER);
    let out = calibrate(ws.path(), &[]);

    // ./calibration.toml is picked up without --config.
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("no feasible minimum found"), "{stdout}");
    assert!(stdout.contains("Evaluations:  3"));
    assert!(ws.path().join("results").is_dir());
}

#[test]
fn setup_failure_exits_nonzero() {
    let ws = workspace(CRASHING_SOLVER);
    fs::remove_file(ws.path().join("dns.csv")).unwrap();
    let out = calibrate(ws.path(), &[]);

    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("calibration setup failed"), "{stderr}");
    assert!(!ws.path().join("results").exists());
}

#[test]
fn invalid_override_exits_nonzero() {
    let ws = workspace(CRASHING_SOLVER);
    let out = calibrate(ws.path(), &["--lower", "0.95", "--upper", "0.5"]);

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Invalid bounds"));
}
