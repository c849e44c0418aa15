//! Remote server handle.
//!
//! `Server` wraps one configured dispatch target and answers three
//! questions about it: can we see its filesystem (mount), can we reach it
//! (ping), and do commands round-trip (touch a file remotely, watch it
//! appear through the mount). Checks degrade to `false` on any failure;
//! they never error. Job dispatch and sentinel polling live in [`job`].

pub mod job;
pub mod shell;

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::config::{normalize_host, MpiConfig, ServerConfig};
use crate::error::{Result, SkiffError};
use shell::CommandOutput;

/// Result of the most recent server check. Overwritten on every check;
/// no history is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub mount: bool,
    pub ping: bool,
    pub roundtrip: bool,
    /// Aggregate: `mount && ping && roundtrip`.
    pub ok: bool,
    pub engine_version: String,
}

impl ServerStatus {
    /// A local server passes every check by definition.
    fn assume(local: bool) -> Self {
        Self {
            mount: local,
            ping: local,
            roundtrip: local,
            ok: local,
            engine_version: "unknown".to_string(),
        }
    }
}

/// Handle on one dispatch target, local or remote.
pub struct Server {
    config: ServerConfig,
    mpi: Option<MpiConfig>,
    last_known_status: ServerStatus,
}

impl Server {
    pub fn new(config: ServerConfig, mpi: Option<MpiConfig>) -> Self {
        let local = config.host.is_none();
        Self {
            config,
            mpi,
            last_known_status: ServerStatus::assume(local),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn mpi(&self) -> Option<&MpiConfig> {
        self.mpi.as_ref()
    }

    /// Whether jobs run on this machine.
    pub fn is_local(&self) -> bool {
        self.config.host.is_none()
    }

    /// Whether jobs run on an external machine (not [`is_local`](Self::is_local)).
    pub fn is_external(&self) -> bool {
        !self.is_local()
    }

    pub fn last_known_status(&self) -> &ServerStatus {
        &self.last_known_status
    }

    /// Arguments handed to the remote-shell client ahead of the command:
    /// `[-i <identity>] [<user>@]<host>`.
    fn shell_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity) = self.config.identity_path() {
            args.push("-i".to_string());
            args.push(identity);
        }

        let host = self.config.host.clone().unwrap_or_default();
        match &self.config.username {
            Some(user) => args.push(format!("{}@{}", user, host)),
            None => args.push(host),
        }

        args
    }

    /// Human-readable command prefix used to reach the server. Empty for
    /// a local server.
    pub fn connection_prefix(&self) -> String {
        if self.is_local() {
            return String::new();
        }
        let mut parts = vec![self.config.remote_shell.clone()];
        parts.extend(self.shell_args());
        parts.join(" ")
    }

    /// Run one command on the server, bounded by `command_timeout`.
    pub(crate) async fn run_remote(&self, command: &str) -> Result<CommandOutput> {
        let mut args = self.shell_args();
        args.push(command.to_string());
        shell::run_command(
            &self.config.remote_shell,
            &args,
            self.config.command_timeout(),
        )
        .await
    }

    /// Fire one command on the server without waiting for it.
    pub(crate) fn spawn_remote(&self, command: &str) -> Result<()> {
        let mut args = self.shell_args();
        args.push(command.to_string());
        shell::spawn_detached(&self.config.remote_shell, &args)
    }

    /// Check that the local mount of the server directory exists and is a
    /// directory. The bind mount itself is established out of band.
    pub async fn check_mount(&mut self) -> bool {
        let success = if self.is_local() {
            true
        } else {
            tokio::fs::metadata(self.config.mount_path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
        };
        self.last_known_status.mount = success;
        success
    }

    /// Check that a trivial command round-trips over the connection
    /// prefix. Any spawn failure, timeout, or unexpected output is
    /// `false`, never an error.
    pub async fn check_ping(&mut self) -> bool {
        let success = if self.is_local() {
            true
        } else {
            match self.run_remote(r#"echo "success""#).await {
                Ok(output) => {
                    if !output.success {
                        tracing::debug!("ping exited nonzero: {}", output.stderr.trim());
                    }
                    output.stdout.trim() == "success"
                }
                Err(e) => {
                    tracing::debug!("ping failed: {}", e);
                    false
                }
            }
        };
        self.last_known_status.ping = success;
        success
    }

    /// Touch a uniquely named file on the server, then watch for it to
    /// appear through the mount. Proves the command path and the mount
    /// agree on the same directory. The file is removed on success.
    ///
    /// Requires both [`check_mount`](Self::check_mount) and
    /// [`check_ping`](Self::check_ping) to pass first.
    pub async fn check_roundtrip(&mut self) -> bool {
        if self.is_local() {
            self.last_known_status.roundtrip = true;
            return true;
        }

        if !(self.check_mount().await && self.check_ping().await) {
            self.last_known_status.roundtrip = false;
            return false;
        }

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S%.6f");
        let name = format!("test.{}", stamp);
        let remote_path = remote_join(&self.config.server_dir, &name);
        let command = format!("touch {}", shell::shell_escape(&remote_path));

        let touched = match self.run_remote(&command).await {
            Ok(output) => {
                if !output.success {
                    tracing::debug!("round-trip touch exited nonzero: {}", output.stderr.trim());
                }
                output.success
            }
            Err(e) => {
                tracing::debug!("round-trip touch failed: {}", e);
                false
            }
        };
        if !touched {
            self.last_known_status.roundtrip = false;
            return false;
        }

        let local_path = self.config.mount_path().join(&name);
        let deadline = Instant::now() + self.config.command_timeout();
        let mut success = false;
        loop {
            if tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
                success = true;
                break;
            }
            if Instant::now() >= deadline {
                tracing::debug!(
                    "round-trip file {} never appeared on the mount",
                    local_path.display()
                );
                break;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }

        if success {
            let _ = tokio::fs::remove_file(&local_path).await;
        }

        self.last_known_status.roundtrip = success;
        success
    }

    /// Version of the computation engine installed on the server.
    // TODO: probe over the connection prefix once engines expose a stable
    // --version flag.
    pub fn check_engine_version(&mut self) -> String {
        let version = "unknown".to_string();
        self.last_known_status.engine_version = version.clone();
        version
    }

    /// Run every check and aggregate. The round-trip only runs when mount
    /// and ping both passed; the aggregate is the AND of all three.
    pub async fn check_status(&mut self) -> bool {
        let mount = self.check_mount().await;
        let ping = self.check_ping().await;
        let roundtrip = if mount && ping {
            self.check_roundtrip().await
        } else {
            false
        };
        self.last_known_status.roundtrip = roundtrip;
        self.check_engine_version();

        let ok = mount && ping && roundtrip;
        self.last_known_status.ok = ok;
        ok
    }

    /// Like [`check_status`](Self::check_status) but returns the full
    /// per-check breakdown.
    pub async fn check_status_full(&mut self) -> ServerStatus {
        self.check_status().await;
        self.last_known_status.clone()
    }

    /// Look up a parameter by name: MPI options first, then server keys.
    /// Unknown names are a hard configuration error.
    pub fn get_value(&self, name: &str) -> Result<String> {
        if let Some(mpi) = &self.mpi {
            if let Some(value) = mpi.get(name) {
                return Ok(value.to_string());
            }
        }

        let c = &self.config;
        let value = match name {
            "host" => c.host.clone().unwrap_or_default(),
            "username" => c.username.clone().unwrap_or_default(),
            "identity_file" => c.identity_file.clone().unwrap_or_default(),
            "server_dir" => c.server_dir.clone(),
            "mount_dir" => c.mount_dir.clone(),
            "server_script" => c.server_script.clone().unwrap_or_default(),
            "remote_shell" => c.remote_shell.clone(),
            "interpreter" => c.interpreter.clone(),
            "command_timeout" => c.command_timeout.clone(),
            "poll_interval" => c.poll_interval.clone(),
            "poll_timeout" => c.poll_timeout.clone(),
            _ => {
                return Err(SkiffError::Config(format!(
                    "Unknown parameter '{}'",
                    name
                )))
            }
        };
        Ok(value)
    }

    /// Set a parameter by name: existing MPI options first, then server
    /// keys. Unknown names are a hard configuration error.
    pub fn set_value(&mut self, name: &str, value: &str) -> Result<()> {
        if let Some(mpi) = &mut self.mpi {
            if mpi.contains(name) {
                mpi.set(name, value);
                return Ok(());
            }
        }

        let c = &mut self.config;
        match name {
            "host" => c.host = normalize_host(value),
            "username" => c.username = optional(value),
            "identity_file" => c.identity_file = optional(value),
            "server_dir" => c.server_dir = value.to_string(),
            "mount_dir" => c.mount_dir = value.to_string(),
            "server_script" => c.server_script = optional(value),
            "remote_shell" => c.remote_shell = value.to_string(),
            "interpreter" => c.interpreter = value.to_string(),
            "command_timeout" => c.command_timeout = value.to_string(),
            "poll_interval" => c.poll_interval = value.to_string(),
            "poll_timeout" => c.poll_timeout = value.to_string(),
            _ => {
                return Err(SkiffError::Config(format!(
                    "Unknown parameter '{}'",
                    name
                )))
            }
        }
        Ok(())
    }

    /// Split the handle back into its configuration parts, e.g. to save.
    pub fn into_parts(self) -> (ServerConfig, Option<MpiConfig>) {
        (self.config, self.mpi)
    }

    /// Path of a job's sentinel status file as seen through the mount.
    pub fn job_status_path(&self, script: &str) -> PathBuf {
        self.config.mount_path().join(format!("{}.status", script))
    }

    /// Path of a job's captured output as seen through the mount.
    pub fn job_log_path(&self, script: &str) -> PathBuf {
        self.config.mount_path().join(format!("{}.log", script))
    }
}

/// An optional parameter value: empty and the literal `"None"` both
/// clear the field.
fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == "None" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Join a remote directory and file name without touching the local
/// filesystem's path rules.
fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn local_server() -> Server {
        // A shell that cannot exist: a local server must never spawn it.
        let config = ServerConfig {
            remote_shell: "/no/such/remote-shell".to_string(),
            ..Default::default()
        };
        Server::new(config, None)
    }

    fn remote_config(host: &str) -> ServerConfig {
        ServerConfig {
            host: Some(host.to_string()),
            server_dir: "/scratch/jobs".to_string(),
            mount_dir: "/mnt/cluster".to_string(),
            ..Default::default()
        }
    }

    /// Shell stub that records each invocation and evaluates the command
    /// argument locally, standing in for a passwordless ssh.
    #[cfg(unix)]
    fn stub_shell(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("stub-shell.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn local_and_external_are_complementary() {
        assert!(local_server().is_local());
        assert!(!local_server().is_external());

        let server = Server::new(remote_config("box1"), None);
        assert!(server.is_external());
        assert!(!server.is_local());
    }

    #[test]
    fn set_host_none_makes_server_local() {
        let mut server = Server::new(remote_config("box1"), None);
        assert!(server.is_external());

        server.set_value("host", "None").unwrap();
        assert!(server.is_local());

        server.set_value("host", "").unwrap();
        assert!(server.is_local());

        server.set_value("host", "box2").unwrap();
        assert!(server.is_external());
    }

    #[test]
    fn prefix_empty_when_local() {
        assert_eq!(local_server().connection_prefix(), "");
    }

    #[test]
    fn prefix_bare_host() {
        let server = Server::new(remote_config("box1"), None);
        assert_eq!(server.connection_prefix(), "ssh box1");
    }

    #[test]
    fn prefix_with_username() {
        let mut config = remote_config("box1");
        config.username = Some("astro".to_string());
        let server = Server::new(config, None);
        assert_eq!(server.connection_prefix(), "ssh astro@box1");
    }

    #[test]
    fn prefix_with_identity_and_username() {
        let mut config = remote_config("box1");
        config.username = Some("astro".to_string());
        config.identity_file = Some("/home/astro/.ssh/id_ed25519".to_string());
        let server = Server::new(config, None);
        assert_eq!(
            server.connection_prefix(),
            "ssh -i /home/astro/.ssh/id_ed25519 astro@box1"
        );
    }

    #[tokio::test]
    async fn local_server_passes_every_check() {
        let mut server = local_server();
        assert!(server.check_mount().await);
        assert!(server.check_ping().await);
        assert!(server.check_roundtrip().await);
        assert!(server.check_status().await);

        let status = server.last_known_status();
        assert!(status.mount && status.ping && status.roundtrip && status.ok);
        assert_eq!(status.engine_version, "unknown");
    }

    #[tokio::test]
    async fn check_mount_requires_directory() {
        let temp = tempfile::tempdir().unwrap();

        let mut config = remote_config("box1");
        config.mount_dir = temp.path().to_string_lossy().to_string();
        let mut server = Server::new(config, None);
        assert!(server.check_mount().await);

        let mut config = remote_config("box1");
        config.mount_dir = temp
            .path()
            .join("does-not-exist")
            .to_string_lossy()
            .to_string();
        let mut server = Server::new(config, None);
        assert!(!server.check_mount().await);
        assert!(!server.last_known_status().mount);

        // a plain file is not a mount
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let mut config = remote_config("box1");
        config.mount_dir = file.to_string_lossy().to_string();
        let mut server = Server::new(config, None);
        assert!(!server.check_mount().await);
    }

    #[tokio::test]
    async fn check_ping_degrades_to_false() {
        let mut config = remote_config("box1");
        config.remote_shell = "/no/such/remote-shell".to_string();
        let mut server = Server::new(config, None);
        assert!(!server.check_ping().await);
        assert!(!server.last_known_status().ping);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_ping_compares_output() {
        let temp = tempfile::tempdir().unwrap();

        let mut config = remote_config("box1");
        config.mount_dir = temp.path().to_string_lossy().to_string();
        config.remote_shell = stub_shell(temp.path(), r#"eval "$2""#);
        let mut server = Server::new(config, None);
        assert!(server.check_ping().await);

        let mut config = remote_config("box1");
        config.mount_dir = temp.path().to_string_lossy().to_string();
        config.remote_shell = stub_shell(temp.path(), "echo nonsense");
        let mut server = Server::new(config, None);
        assert!(!server.check_ping().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn roundtrip_touches_polls_and_cleans_up() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_string_lossy().to_string();

        // server_dir and mount_dir are the same directory, so the file
        // "touched remotely" by the stub appears on the "mount" at once.
        let mut config = remote_config("box1");
        config.server_dir = dir.clone();
        config.mount_dir = dir;
        config.poll_interval = "0s".to_string();
        config.remote_shell = stub_shell(temp.path(), r#"eval "$2""#);
        let mut server = Server::new(config, None);

        assert!(server.check_roundtrip().await);
        assert!(server.last_known_status().roundtrip);

        // the test file was removed after it was seen
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("test."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_skips_roundtrip_when_mount_fails() {
        let temp = tempfile::tempdir().unwrap();
        let invocations = temp.path().join("invocations");

        let mut config = remote_config("box1");
        config.mount_dir = temp
            .path()
            .join("missing-mount")
            .to_string_lossy()
            .to_string();
        config.remote_shell = stub_shell(
            temp.path(),
            &format!(r#"echo "$2" >> {}; echo success"#, invocations.display()),
        );
        let mut server = Server::new(config, None);

        assert!(!server.check_status().await);
        let status = server.last_known_status();
        assert!(!status.mount);
        assert!(status.ping);
        assert!(!status.roundtrip);
        assert!(!status.ok);

        // only the ping reached the shell; no touch was attempted
        let log = std::fs::read_to_string(&invocations).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(!log.contains("touch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_aggregates_all_checks() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_string_lossy().to_string();

        let mut config = remote_config("box1");
        config.server_dir = dir.clone();
        config.mount_dir = dir;
        config.poll_interval = "0s".to_string();
        config.remote_shell = stub_shell(temp.path(), r#"eval "$2""#);
        let mut server = Server::new(config, None);

        let status = server.check_status_full().await;
        assert!(status.mount && status.ping && status.roundtrip && status.ok);
    }

    #[test]
    fn get_value_reads_server_keys() {
        let mut config = remote_config("box1");
        config.username = Some("astro".to_string());
        let server = Server::new(config, None);

        assert_eq!(server.get_value("host").unwrap(), "box1");
        assert_eq!(server.get_value("username").unwrap(), "astro");
        assert_eq!(server.get_value("server_dir").unwrap(), "/scratch/jobs");
        // unset options read back as empty
        assert_eq!(server.get_value("identity_file").unwrap(), "");
    }

    #[test]
    fn get_value_unknown_key_is_an_error() {
        let server = Server::new(remote_config("box1"), None);
        let err = server.get_value("does_not_exist").unwrap_err();
        assert!(err.to_string().contains("Unknown parameter"));
    }

    #[test]
    fn set_value_unknown_key_is_an_error() {
        let mut server = Server::new(remote_config("box1"), None);
        assert!(server.set_value("does_not_exist", "1").is_err());
    }

    #[test]
    fn mpi_keys_take_precedence() {
        let mut mpi = MpiConfig::default();
        mpi.set("np", "4");
        let mut server = Server::new(remote_config("box1"), Some(mpi));

        assert_eq!(server.get_value("np").unwrap(), "4");

        server.set_value("np", "16").unwrap();
        assert_eq!(server.get_value("np").unwrap(), "16");
        assert_eq!(server.mpi().unwrap().get("np"), Some("16"));

        // unknown keys still error even with an MPI config present
        assert!(server.get_value("nq").is_err());
        assert!(server.set_value("nq", "1").is_err());
    }

    #[test]
    fn remote_join_handles_trailing_slash() {
        assert_eq!(remote_join("/scratch/jobs", "a.py"), "/scratch/jobs/a.py");
        assert_eq!(remote_join("/scratch/jobs/", "a.py"), "/scratch/jobs/a.py");
        assert_eq!(remote_join("", "a.py"), "a.py");
    }

    #[test]
    fn sentinel_paths_follow_script_name() {
        let server = Server::new(remote_config("box1"), None);
        assert_eq!(
            server.job_status_path("run.py"),
            PathBuf::from("/mnt/cluster/run.py.status")
        );
        assert_eq!(
            server.job_log_path("run.py"),
            PathBuf::from("/mnt/cluster/run.py.log")
        );
    }
}
