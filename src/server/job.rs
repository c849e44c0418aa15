//! Job dispatch and sentinel polling.
//!
//! A job is a script that already lives in the server's working
//! directory (copied there by the user or a pipeline). Dispatch fires one
//! detached remote command; progress is observed through two files next
//! to the script on the mount: `<script>.status` and `<script>.log`.
//! Whatever the remote shell wrote into the sentinel is trusted verbatim.

use std::fmt;
use std::time::Instant;

use crate::error::{Result, SkiffError};

use super::shell::shell_escape;
use super::{remote_join, Server};

/// Lifecycle of a dispatched job as told by its sentinel file.
///
/// `Pending → Running → Complete`, or `Pending → Failed`. Nothing
/// enforces the order; the sentinel is the only witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// No sentinel file yet.
    Pending,
    Running,
    Complete,
    /// The job wrote `failed` as the first sentinel line.
    Failed,
    /// Anything else the sentinel holds, verbatim.
    Other(String),
}

impl JobStatus {
    fn from_line(line: &str) -> Self {
        match line {
            "running" => JobStatus::Running,
            "complete" => JobStatus::Complete,
            "failed" => JobStatus::Failed,
            other => JobStatus::Other(other.to_string()),
        }
    }

    /// Whether the job has nothing more to do.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Read a sentinel file's content. A `failed` first line wins regardless
/// of anything written after it; otherwise the last line tells the story.
pub fn parse_sentinel(content: &str) -> JobStatus {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    match lines.first() {
        None => JobStatus::Pending,
        Some(&"failed") => JobStatus::Failed,
        Some(_) => JobStatus::from_line(lines[lines.len() - 1]),
    }
}

impl Server {
    /// The composite remote command that runs one job: source the setup
    /// script if there is one, mark the sentinel `running`, run the
    /// interpreter with output captured to the log, then append
    /// `complete`. A failing job never reaches the final append.
    pub(crate) fn dispatch_command(&self, script: &str) -> String {
        let config = self.config();
        let remote_script = remote_join(&config.server_dir, script);
        let status = shell_escape(&format!("{}.status", remote_script));
        let log = shell_escape(&format!("{}.log", remote_script));
        let remote_script = shell_escape(&remote_script);

        let mut command = String::new();
        if let Some(setup) = &config.server_script {
            command.push_str(&format!("{} && ", setup));
        }
        command.push_str(&format!(
            "echo 'running' > {status} && nohup {interpreter} {script} > {log} 2>&1 && echo 'complete' >> {status}",
            status = status,
            log = log,
            script = remote_script,
            interpreter = config.interpreter,
        ));
        command
    }

    /// Dispatch a job script that already sits in the server directory.
    ///
    /// Fire-and-forget: the remote shell is spawned detached and never
    /// awaited, so no exit code comes back. Poll
    /// [`check_job_status`](Self::check_job_status) for progress. On a
    /// local server this is a no-op.
    pub fn run_job(&self, script: &str) -> Result<()> {
        if self.is_local() {
            tracing::info!("server is local; nothing to dispatch for '{}'", script);
            return Ok(());
        }

        let command = self.dispatch_command(script);
        tracing::debug!("dispatching: {} '{}'", self.connection_prefix(), command);
        self.spawn_remote(&command)
    }

    /// Current sentinel state of a dispatched job. A missing sentinel
    /// means "not yet", never an error. No-op on a local server.
    pub async fn check_job_status(&self, script: &str) -> JobStatus {
        if self.is_local() {
            tracing::debug!("server is local; no sentinel for '{}'", script);
            return JobStatus::Pending;
        }

        match tokio::fs::read_to_string(self.job_status_path(script)).await {
            Ok(content) => parse_sentinel(&content),
            Err(e) => {
                tracing::debug!("no sentinel for '{}': {}", script, e);
                JobStatus::Pending
            }
        }
    }

    /// Poll the sentinel until the job reaches a terminal state, at
    /// `poll_interval`, giving up after `poll_timeout`.
    pub async fn wait_for_job(&self, script: &str) -> Result<JobStatus> {
        if self.is_local() {
            tracing::debug!("server is local; nothing to wait for");
            return Ok(JobStatus::Pending);
        }

        let deadline = Instant::now() + self.config().poll_timeout();
        loop {
            let status = self.check_job_status(script).await;
            if status.is_terminal() {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(SkiffError::Job(format!(
                    "Timed out after {} waiting for '{}' (last status: {})",
                    self.config().poll_timeout,
                    script,
                    status
                )));
            }
            tokio::time::sleep(self.config().poll_interval()).await;
        }
    }

    /// Captured stdout/stderr of a job, read off the mount. `None` until
    /// the job has produced output.
    pub async fn job_log(&self, script: &str) -> Option<String> {
        tokio::fs::read_to_string(self.job_log_path(script)).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn remote_server(mount_dir: &str) -> Server {
        let config = ServerConfig {
            host: Some("box1".to_string()),
            server_dir: "/scratch/jobs".to_string(),
            mount_dir: mount_dir.to_string(),
            ..Default::default()
        };
        Server::new(config, None)
    }

    #[test]
    fn sentinel_empty_is_pending() {
        assert_eq!(parse_sentinel(""), JobStatus::Pending);
        assert_eq!(parse_sentinel("\n  \n"), JobStatus::Pending);
    }

    #[test]
    fn sentinel_last_line_wins() {
        assert_eq!(parse_sentinel("running\n"), JobStatus::Running);
        assert_eq!(parse_sentinel("running\ncomplete\n"), JobStatus::Complete);
    }

    #[test]
    fn sentinel_failed_first_line_wins() {
        assert_eq!(
            parse_sentinel("failed\ncomplete\n"),
            JobStatus::Failed
        );
        assert_eq!(parse_sentinel("failed"), JobStatus::Failed);
    }

    #[test]
    fn sentinel_unknown_content_is_kept() {
        assert_eq!(
            parse_sentinel("running\nqueued by scheduler\n"),
            JobStatus::Other("queued by scheduler".to_string())
        );
    }

    #[test]
    fn job_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Complete.to_string(), "complete");
        assert_eq!(JobStatus::Other("odd".to_string()).to_string(), "odd");
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Other("x".to_string()).is_terminal());
    }

    #[test]
    fn dispatch_command_shape() {
        let server = remote_server("/mnt/cluster");
        let command = server.dispatch_command("run.py");

        assert_eq!(
            command,
            "echo 'running' > /scratch/jobs/run.py.status && \
             nohup python3 /scratch/jobs/run.py > /scratch/jobs/run.py.log 2>&1 && \
             echo 'complete' >> /scratch/jobs/run.py.status"
        );
    }

    #[test]
    fn dispatch_command_includes_setup_script() {
        let config = ServerConfig {
            host: Some("box1".to_string()),
            server_dir: "/scratch/jobs".to_string(),
            mount_dir: "/mnt/cluster".to_string(),
            server_script: Some("source /opt/venv/bin/activate".to_string()),
            ..Default::default()
        };
        let server = Server::new(config, None);
        let command = server.dispatch_command("run.py");
        assert!(command.starts_with("source /opt/venv/bin/activate && "));
    }

    #[test]
    fn dispatch_command_escapes_odd_names() {
        let server = remote_server("/mnt/cluster");
        let command = server.dispatch_command("my run.py");
        assert!(command.contains("'/scratch/jobs/my run.py'"));
        assert!(command.contains("'/scratch/jobs/my run.py.status'"));
    }

    #[test]
    fn run_job_local_is_noop() {
        let config = ServerConfig {
            remote_shell: "/no/such/remote-shell".to_string(),
            ..Default::default()
        };
        let server = Server::new(config, None);
        assert!(server.run_job("run.py").is_ok());
    }

    #[tokio::test]
    async fn job_status_missing_sentinel_is_pending() {
        let temp = tempfile::tempdir().unwrap();
        let server = remote_server(&temp.path().to_string_lossy());
        assert_eq!(server.check_job_status("run.py").await, JobStatus::Pending);
    }

    #[tokio::test]
    async fn job_status_reads_sentinel() {
        let temp = tempfile::tempdir().unwrap();
        let server = remote_server(&temp.path().to_string_lossy());

        std::fs::write(temp.path().join("run.py.status"), "running\n").unwrap();
        assert_eq!(server.check_job_status("run.py").await, JobStatus::Running);

        std::fs::write(temp.path().join("run.py.status"), "running\ncomplete\n").unwrap();
        assert_eq!(server.check_job_status("run.py").await, JobStatus::Complete);

        std::fs::write(temp.path().join("run.py.status"), "failed\nrunning\n").unwrap();
        assert_eq!(server.check_job_status("run.py").await, JobStatus::Failed);
    }

    #[tokio::test]
    async fn wait_returns_terminal_state() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("run.py.status"), "running\ncomplete\n").unwrap();

        let server = remote_server(&temp.path().to_string_lossy());
        assert_eq!(
            server.wait_for_job("run.py").await.unwrap(),
            JobStatus::Complete
        );
    }

    #[tokio::test]
    async fn wait_times_out_on_silent_job() {
        let temp = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            host: Some("box1".to_string()),
            server_dir: "/scratch/jobs".to_string(),
            mount_dir: temp.path().to_string_lossy().to_string(),
            poll_interval: "0s".to_string(),
            poll_timeout: "0s".to_string(),
            ..Default::default()
        };
        let server = Server::new(config, None);

        let err = server.wait_for_job("run.py").await.unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn job_log_missing_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let server = remote_server(&temp.path().to_string_lossy());
        assert!(server.job_log("run.py").await.is_none());

        std::fs::write(temp.path().join("run.py.log"), "iteration 1\n").unwrap();
        assert_eq!(
            server.job_log("run.py").await.unwrap(),
            "iteration 1\n"
        );
    }
}
