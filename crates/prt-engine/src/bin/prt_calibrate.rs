use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use prt_engine::Calibration;
use prt_types::CalibrationConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "calibration.toml";

#[derive(Parser, Debug)]
#[command(name = "prt-calibrate")]
#[command(version)]
#[command(about = "Calibrate the turbulent Prandtl number against DNS with the CFD solver in the loop")]
struct Args {
    /// Path to TOML configuration file (default: ./calibration.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lower bound on Pr_t
    #[arg(long)]
    lower: Option<f64>,

    /// Upper bound on Pr_t
    #[arg(long)]
    upper: Option<f64>,

    /// Maximum number of solver runs
    #[arg(long)]
    max_evals: Option<usize>,

    /// Per-run solver timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Absolute tolerance on Pr_t
    #[arg(long)]
    tolerance: Option<f64>,

    /// Loss assigned to failed solver runs
    #[arg(long)]
    penalty: Option<f64>,

    /// Parent directory for run results
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Skip the re-run at the optimal Pr_t
    #[arg(long)]
    no_validation: bool,

    /// Check configuration, ground truth and template, print the plan and exit
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn load_config(&self) -> Result<CalibrationConfig> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.is_file()),
        };

        let mut config = match path {
            Some(path) => {
                let mut config = CalibrationConfig::from_toml_file(&path)?;
                let base = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
                config.resolve_paths(base);
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => {
                info!("No configuration file, using built-in defaults");
                CalibrationConfig::default()
            }
        };

        if let Some(v) = self.lower {
            config.optimizer.lower = v;
        }
        if let Some(v) = self.upper {
            config.optimizer.upper = v;
        }
        if let Some(v) = self.max_evals {
            config.optimizer.max_evals = v;
        }
        if let Some(v) = self.tolerance {
            config.optimizer.tolerance = v;
        }
        if let Some(v) = self.penalty {
            config.optimizer.penalty = v;
        }
        if let Some(v) = self.timeout {
            config.solver.timeout_secs = v;
        }
        if let Some(dir) = &self.results_dir {
            config.output.results_dir = dir.clone();
        }
        if self.no_validation {
            config.output.validation_run = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = args.load_config()?;
    let calibration = Calibration::prepare(config).context("calibration setup failed")?;

    if args.dry_run {
        println!("{}", calibration.plan());
        return Ok(());
    }

    let report = calibration.run().await.context("calibration aborted")?;
    let result = &report.result;

    println!("{}", "=".repeat(40));
    match &result.best {
        Some(best) => {
            println!("OPTIMIZATION COMPLETE");
            println!("Optimal Pr_t: {:.5}", best.parameter);
            println!("Minimum RMSE: {:.5}", best.loss);
        }
        None => println!("no feasible minimum found"),
    }
    println!("Evaluations:  {} ({})", result.evaluations(), result.termination);
    if let Some(validation) = &report.summary.validation {
        match validation.loss {
            Some(loss) => println!("Validation:   RMSE {:.5} at Pr_t {:.5}", loss, validation.parameter),
            None => println!("Validation:   {}", validation.status),
        }
    }
    println!("Results:      {}", report.run_dir.root().display());
    println!("{}", "=".repeat(40));
    Ok(())
}
