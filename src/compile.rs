//! Compilation Worker Pool
//!
//! Runs contract compilation jobs as OS processes, a bounded number at a
//! time. Every job runs to completion; failures are reported together.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{error, info};

fn default_max_workers() -> usize {
    4
}

/// One compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileJob {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Defaults to the current directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Compilation configuration (`config/compile.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(rename = "job", default)]
    pub jobs: Vec<CompileJob>,
}

impl CompileConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path. If None, uses COMPILE_CONFIG_PATH env var or `config/compile.toml`.
    pub fn load_from_path(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("COMPILE_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/compile.toml".to_string());

        if !std::path::Path::new(&config_path).exists() {
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/compile.template.toml config/compile.toml",
                config_path
            ));
        }
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path))?;
        let config: CompileConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", config_path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("Configuration error: max_workers must be at least 1");
        }
        for job in &self.jobs {
            if job.program.trim().is_empty() {
                anyhow::bail!("Configuration error: job '{}' has no program", job.name);
            }
        }
        Ok(())
    }
}

/// Result of one finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub name: String,
    pub success: bool,
    /// Exit code, `None` when killed by a signal or not started
    pub exit_code: Option<i32>,
    /// Tail of stderr (or the spawn error) for failed jobs
    pub stderr: String,
}

/// Bounded pool of compiler processes.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// A pool of `max_workers` (at least one) concurrent processes.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    async fn run_job(&self, job: CompileJob) -> JobOutcome {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                return JobOutcome {
                    name: job.name,
                    success: false,
                    exit_code: None,
                    stderr: e.to_string(),
                }
            }
        };

        info!("⏳ Compiling {}", job.name);
        let mut command = Command::new(&job.program);
        command
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &job.working_dir {
            command.current_dir(dir);
        }

        match command.output().await {
            Ok(output) if output.status.success() => {
                info!("✅ Compiled {}", job.name);
                JobOutcome {
                    name: job.name,
                    success: true,
                    exit_code: output.status.code(),
                    stderr: String::new(),
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
                let stderr = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
                error!("❌ Compiling {} failed ({}):\n{}", job.name, output.status, stderr);
                JobOutcome {
                    name: job.name,
                    success: false,
                    exit_code: output.status.code(),
                    stderr,
                }
            }
            Err(e) => {
                error!("❌ Could not start {} for {}: {}", job.program, job.name, e);
                JobOutcome {
                    name: job.name,
                    success: false,
                    exit_code: None,
                    stderr: format!("failed to spawn {}: {}", job.program, e),
                }
            }
        }
    }

    /// Runs every job and waits for all of them.
    ///
    /// # Returns
    ///
    /// * `Ok(outcomes)` - All jobs succeeded, in input order
    /// * `Err(anyhow::Error)` - One error naming every failed job
    pub async fn run(&self, jobs: Vec<CompileJob>) -> Result<Vec<JobOutcome>> {
        let total = jobs.len();
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let pool = self.clone();
                let name = job.name.clone();
                (name, tokio::spawn(async move { pool.run_job(job).await }))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(total);
        for (name, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| JobOutcome {
                name,
                success: false,
                exit_code: None,
                stderr: format!("worker panicked: {}", e),
            });
            outcomes.push(outcome);
        }

        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| match o.exit_code {
                Some(code) => format!("{} (exit code {})", o.name, code),
                None => format!("{} ({})", o.name, o.stderr),
            })
            .collect();
        if !failed.is_empty() {
            anyhow::bail!("{} of {} compile jobs failed: {}", failed.len(), total, failed.join(", "));
        }
        info!("✅ {} compile jobs succeeded", total);
        Ok(outcomes)
    }
}
