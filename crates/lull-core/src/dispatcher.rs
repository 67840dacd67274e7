//! Job dispatch: provision, launch, and record the heuristic job state

use crate::{ActivityLedger, ExecutionReport, JobCatalog, JobDescriptor, JobExecutor, JobState, Result};
use lull_shared::EventMetrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

pub const DEFAULT_SETUP_SCRIPT: &str = "/opt/flink/sql/dynamic-table-job-manager.sql";
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStep {
    /// Idempotent catalog/table provisioning
    Setup,
    /// The table's own job
    Job,
}

impl fmt::Display for DispatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStep::Setup => f.write_str("setup"),
            DispatchStep::Job => f.write_str("job"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Runtime exited non-zero; stderr is the only diagnostic available
    Exit { code: Option<i32>, stderr: String },
    /// The runtime did not answer in time. The process may still be running.
    Timeout(Duration),
    /// The runtime could not be invoked at all
    Launch(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exit { code: Some(code), .. } => write!(f, "exit code {}", code),
            FailureReason::Exit { code: None, .. } => f.write_str("terminated by signal"),
            FailureReason::Timeout(after) => write!(f, "timed out after {:?}", after),
            FailureReason::Launch(message) => write!(f, "launch failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Job launched; the table is now `Active`
    Started,
    /// No job descriptor configured for the table
    NotDispatchable,
    /// Another dispatch is in flight, or the job is considered active
    InFlight(JobState),
    /// The table is back to `Idle` and may be retried on its next qualifying event
    Failed { step: DispatchStep, reason: FailureReason },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Started => "started",
            DispatchOutcome::NotDispatchable => "not_dispatchable",
            DispatchOutcome::InFlight(_) => "in_flight",
            DispatchOutcome::Failed { step: DispatchStep::Setup, .. } => "setup_failed",
            DispatchOutcome::Failed { step: DispatchStep::Job, .. } => "job_failed",
        }
    }
}

/// Launches a table's job through a [`JobExecutor`].
///
/// Holds no process handles and never polls a launched job.
pub struct Dispatcher {
    executor: Arc<dyn JobExecutor>,
    catalog: JobCatalog,
    ledger: Arc<ActivityLedger>,
    setup: Option<JobDescriptor>,
    setup_timeout: Duration,
    job_timeout: Duration,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn JobExecutor>, catalog: JobCatalog, ledger: Arc<ActivityLedger>) -> Self {
        Self {
            executor,
            catalog,
            ledger,
            setup: Some(JobDescriptor::new(DEFAULT_SETUP_SCRIPT)),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    pub fn with_setup(mut self, setup: JobDescriptor) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Skip the provisioning step entirely
    pub fn without_setup(mut self) -> Self {
        self.setup = None;
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &JobCatalog {
        &self.catalog
    }

    pub fn is_dispatchable(&self, table: &str) -> bool {
        self.catalog.is_dispatchable(table)
    }

    /// Dispatch the job configured for `table`
    #[instrument(skip(self), fields(dispatch_id = tracing::field::Empty))]
    pub async fn dispatch(&self, table: &str) -> DispatchOutcome {
        let Some(job) = self.catalog.get(table) else {
            warn!(table = table, "Table is not dispatchable: no job configured");
            EventMetrics::dispatch(table, DispatchOutcome::NotDispatchable.as_str());
            return DispatchOutcome::NotDispatchable;
        };

        if let Err(state) = self.ledger.begin_dispatch(table).await {
            info!(table = table, state = state.as_str(), "Dispatch skipped, job already in flight");
            EventMetrics::dispatch(table, "in_flight");
            return DispatchOutcome::InFlight(state);
        }

        let dispatch_id = Uuid::new_v4();
        Span::current().record("dispatch_id", tracing::field::display(dispatch_id));

        let outcome = match self.launch(table, job).await {
            Ok(()) => {
                info!(table = table, job = %job, "Successfully started job");
                DispatchOutcome::Started
            }
            Err((step, reason)) => {
                match &reason {
                    FailureReason::Exit { stderr, .. } => error!(
                        table = table,
                        step = %step,
                        reason = %reason,
                        stderr = %stderr.trim(),
                        "Failed to start job"
                    ),
                    _ => error!(table = table, step = %step, reason = %reason, "Failed to start job"),
                }
                DispatchOutcome::Failed { step, reason }
            }
        };

        self.ledger
            .finish_dispatch(table, outcome == DispatchOutcome::Started)
            .await;
        EventMetrics::dispatch(table, outcome.as_str());

        outcome
    }

    async fn launch(&self, table: &str, job: &JobDescriptor) -> std::result::Result<(), (DispatchStep, FailureReason)> {
        if let Some(setup) = &self.setup {
            info!(table = table, script = %setup, "Setting up catalog and tables");
            self.run_step(setup, self.setup_timeout)
                .await
                .map_err(|reason| (DispatchStep::Setup, reason))?;
        }

        info!(table = table, job = %job, "Starting job");
        self.run_step(job, self.job_timeout)
            .await
            .map_err(|reason| (DispatchStep::Job, reason))
    }

    async fn run_step(&self, script: &JobDescriptor, timeout: Duration) -> std::result::Result<(), FailureReason> {
        let result: Result<ExecutionReport> =
            match tokio::time::timeout(timeout, self.executor.run(script)).await {
                Ok(result) => result,
                Err(_) => return Err(FailureReason::Timeout(timeout)),
            };

        match result {
            Ok(report) if report.succeeded() => Ok(()),
            Ok(report) => Err(FailureReason::Exit {
                code: report.exit_code,
                stderr: report.stderr,
            }),
            Err(e) => Err(FailureReason::Launch(e.to_string())),
        }
    }
}
