use std::{
    process::Stdio,
    time::{Duration, Instant},
};
use futures::stream::{
    FuturesUnordered,
    StreamExt,
};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use chrono::{DateTime, Utc};
use serde::Serialize;
use log::{info, warn};

use crate::config::RunnerConfig;
use crate::job::{self, JobInput};

// external program launched once per job input
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,

    // fixed leading arguments, the job input is appended after them
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command_for(&self, input: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        // keep a terminal ctrl-c away from the workers, cancellation kills them
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,

    // non-zero exit, `code` is absent when killed by a signal
    Failed { code: Option<i32> },

    LaunchFailed { reason: String },

    TimedOut { after_ms: u64 },

    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        *self == Outcome::Succeeded
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub index: usize,
    pub input: String,
    pub outcome: Outcome,

    // false if the process never started
    pub launched: bool,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,

    #[serde(skip)]
    pub started: Instant,
    #[serde(skip)]
    pub finished: Instant,
}

impl JobReport {
    fn not_launched(job: JobInput, outcome: Outcome) -> Self {
        let now = Instant::now();
        Self {
            index: job.index,
            input: job.value,
            outcome,
            launched: false,
            started_at: Utc::now(),
            duration_ms: 0,
            started: now,
            finished: now,
        }
    }
}

/// Per-job outcomes of one run, ordered by submission index.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub concurrency: usize,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| !j.outcome.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn num_launched(&self) -> usize {
        self.jobs.iter().filter(|j| j.launched).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} jobs: {} succeeded, {} failed",
            self.jobs.len(),
            self.succeeded().count(),
            self.failed().count(),
        )
    }

    /// Largest number of launched jobs whose execution intervals overlap.
    pub fn peak_concurrency(&self) -> usize {
        // (instant, +1 for start / -1 for finish); finishes sort first on ties
        let mut events: Vec<(Instant, i32)> = self.jobs.iter()
            .filter(|j| j.launched)
            .flat_map(|j| [(j.started, 1), (j.finished, -1)])
            .collect();
        events.sort();
        let mut running = 0i32;
        let mut peak = 0i32;
        for (_, delta) in events {
            running += delta;
            peak = peak.max(running);
        }
        peak as usize
    }
}

/// Runs one external process per job input, never more than
/// `concurrency` at a time.
#[derive(Debug, Clone)]
pub struct Runner {
    command: WorkerCommand,
    concurrency: usize,
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new(command: WorkerCommand, concurrency: usize) -> Self {
        Self {
            command,
            concurrency: concurrency.max(1),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Runner::new(
            WorkerCommand::new(config.program.clone(), config.args.clone()),
            config.max_workers.resolve(),
        )
        .with_timeout(config.timeout())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Attempt every input exactly once and report each outcome.
    ///
    /// Jobs start in submission order as slots free up. A failed job never
    /// affects its siblings. Once `cancel` fires, running workers are killed
    /// and queued inputs are reported as cancelled without being launched.
    pub async fn run(
        &self,
        inputs: Vec<String>,
        cancel: CancellationToken,
    ) -> RunReport {
        let run_id = job::new_run_id();
        let num_jobs = inputs.len();
        if num_jobs == 0 {
            warn!("[{run_id}] No job inputs, nothing to run.");
        } else {
            info!(
                "[{run_id}] Running `{num_jobs}` jobs with at most `{}` concurrent workers.",
                self.concurrency
            );
        }

        let jobs = self.drive(&run_id, inputs, cancel).await;

        let report = RunReport {
            run_id,
            concurrency: self.concurrency,
            jobs,
        };
        info!("[{}] Run finished, {}.", report.run_id, report.summary());
        report
    }

    async fn drive(
        &self,
        run_id: &str,
        inputs: Vec<String>,
        cancel: CancellationToken,
    ) -> Vec<JobReport> {
        let mut jobs = Vec::with_capacity(inputs.len());
        let mut queue = JobInput::from_values(inputs).into_iter();
        let mut in_flight = FuturesUnordered::new();
        loop {
            // fill free slots in submission order
            while in_flight.len() < self.concurrency {
                let Some(job) = queue.next() else {
                    break
                };
                if cancel.is_cancelled() {
                    jobs.push(JobReport::not_launched(job, Outcome::Cancelled));
                    continue
                }
                in_flight.push(self.run_job(run_id, job, cancel.clone()));
            }
            match in_flight.next().await {
                Some(report) => jobs.push(report),

                None => break,
            }
        }
        jobs.sort_by_key(|j| j.index);
        jobs
    }

    async fn run_job(
        &self,
        run_id: &str,
        job: JobInput,
        cancel: CancellationToken,
    ) -> JobReport {
        info!("[{run_id}] Starting worker for `{}`", job.value);
        let started_at = Utc::now();
        let started = Instant::now();
        let (outcome, launched) = self.execute(&job.value, &cancel).await;
        let finished = Instant::now();
        let duration_ms = finished.duration_since(started).as_millis() as u64;

        match &outcome {
            Outcome::Succeeded => info!(
                "[{run_id}] Worker completed for `{}` in `{duration_ms}` msecs.",
                job.value
            ),

            Outcome::Failed { code: Some(code) } => warn!(
                "[{run_id}] Worker failed for `{}`: exit status `{code}`",
                job.value
            ),

            Outcome::Failed { code: None } => warn!(
                "[{run_id}] Worker failed for `{}`: terminated by signal",
                job.value
            ),

            Outcome::LaunchFailed { reason } => warn!(
                "[{run_id}] Worker failed for `{}`: could not launch `{}`: {reason}",
                job.value,
                self.command.program
            ),

            Outcome::TimedOut { after_ms } => warn!(
                "[{run_id}] Worker for `{}` timed out after `{after_ms}` msecs and was killed.",
                job.value
            ),

            Outcome::Cancelled => warn!(
                "[{run_id}] Worker for `{}` was cancelled.",
                job.value
            ),
        }

        JobReport {
            index: job.index,
            input: job.value,
            outcome,
            launched,
            started_at,
            duration_ms,
            started,
            finished,
        }
    }

    // returns the outcome and whether the process was spawned
    async fn execute(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> (Outcome, bool) {
        let mut child = match self.command.command_for(input).spawn() {
            Ok(child) => child,

            Err(e) => return (Outcome::LaunchFailed { reason: e.to_string() }, false),
        };

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,

                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => Outcome::Succeeded,

                Ok(status) => Outcome::Failed { code: status.code() },

                Err(e) => Outcome::LaunchFailed { reason: e.to_string() },
            },

            _ = deadline => {
                kill(&mut child).await;
                Outcome::TimedOut {
                    after_ms: timeout.unwrap_or_default().as_millis() as u64
                }
            },

            _ = cancel.cancelled() => {
                kill(&mut child).await;
                Outcome::Cancelled
            },
        };
        (outcome, true)
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill worker process: `{e:?}`");
    }
}
