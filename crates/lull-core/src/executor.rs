//! Pluggable capability for running job scripts on the external runtime

use crate::{JobDescriptor, LullError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Result of one external invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionReport {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionReport {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a job script and reports how it went.
///
/// Implementations must not assume they are awaited to completion: the
/// dispatcher drops the future when its timeout elapses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Launch failures are errors; a non-zero exit is a report
    async fn run(&self, script: &JobDescriptor) -> Result<ExecutionReport>;
}

/// Runs scripts through the SQL client inside a long-lived container:
/// `<program> exec <container> bash -c "<sql_client> -f <script>"`.
#[derive(Debug, Clone)]
pub struct ContainerExecutor {
    program: String,
    container: String,
    sql_client: String,
}

impl ContainerExecutor {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            program: "docker".to_string(),
            container: container.into(),
            sql_client: "/opt/flink/bin/sql-client.sh".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_sql_client(mut self, sql_client: impl Into<String>) -> Self {
        self.sql_client = sql_client.into();
        self
    }

    fn command(&self, script: &JobDescriptor) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("exec")
            .arg(&self.container)
            .arg("bash")
            .arg("-c")
            .arg(format!("{} -f {}", self.sql_client, script.script()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // a timed-out job keeps running; only our wait is abandoned
            .kill_on_drop(false);
        command
    }
}

#[async_trait]
impl JobExecutor for ContainerExecutor {
    #[instrument(skip(self), fields(container = %self.container, script = %script))]
    async fn run(&self, script: &JobDescriptor) -> Result<ExecutionReport> {
        let output = self.command(script).output().await.map_err(|e| {
            LullError::Execution(format!("failed to launch '{}': {}", self.program, e))
        })?;

        let report = ExecutionReport {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(exit_code = ?report.exit_code, "job runtime invocation finished");

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success() {
        assert!(ExecutionReport::success().succeeded());
        assert!(!ExecutionReport::failure(1, "boom").succeeded());
        assert!(!ExecutionReport::default().succeeded());
    }

    #[test]
    fn test_command_line() {
        let executor = ContainerExecutor::new("flink-sql-client");
        let command = executor.command(&JobDescriptor::new("/opt/flink/sql/jobs/start-payment-job.sql"));
        let std_command = command.as_std();

        assert_eq!(std_command.get_program(), "docker");
        let args: Vec<_> = std_command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "exec",
                "flink-sql-client",
                "bash",
                "-c",
                "/opt/flink/bin/sql-client.sh -f /opt/flink/sql/jobs/start-payment-job.sql",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_codes_are_reported() {
        let script = JobDescriptor::new("/jobs/anything.sql");

        let ok = ContainerExecutor::new("unused").with_program("true");
        assert!(ok.run(&script).await.unwrap().succeeded());

        let failing = ContainerExecutor::new("unused").with_program("false");
        let report = failing.run(&script).await.unwrap();
        assert_eq!(report.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_launch_error() {
        let executor = ContainerExecutor::new("unused").with_program("lull-no-such-program");
        let err = executor.run(&JobDescriptor::new("/jobs/x.sql")).await.unwrap_err();
        assert!(matches!(err, LullError::Execution(_)));
    }
}
