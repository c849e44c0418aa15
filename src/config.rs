use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkiffError};

/// Target machine for job dispatch.
///
/// A `host` of `None` means the "server" is this machine: nothing is
/// shelled out, every remote check short-circuits to success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Working directory on the server where job scripts and their
    /// sentinel files live.
    #[serde(default)]
    pub server_dir: String,
    /// Local mount of `host:server_dir`. The bind mount itself is
    /// established out of band (sshfs, nfs, ...).
    #[serde(default)]
    pub mount_dir: String,
    /// Script sourced on the server before a job starts (e.g. to activate
    /// a virtual environment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_script: Option<String>,
    /// Remote-shell client used to reach the host.
    #[serde(default = "default_remote_shell")]
    pub remote_shell: String,
    /// Program that runs dispatched job scripts on the server.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Upper bound on any single blocking remote command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: String,
    /// Delay between sentinel-file polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Upper bound on waiting for a dispatched job to finish.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: String,
}

fn default_remote_shell() -> String {
    "ssh".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_command_timeout() -> String {
    "30s".to_string()
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

fn default_poll_timeout() -> String {
    "1h".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            username: None,
            identity_file: None,
            server_dir: String::new(),
            mount_dir: String::new(),
            server_script: None,
            remote_shell: default_remote_shell(),
            interpreter: default_interpreter(),
            command_timeout: default_command_timeout(),
            poll_interval: default_poll_interval(),
            poll_timeout: default_poll_timeout(),
        }
    }
}

/// Interpret a raw host string. Empty and the literal `"None"` both mean
/// "no host": older config files used them as an absent-host sentinel.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "None" {
        None
    } else {
        Some(raw.to_string())
    }
}

impl ServerConfig {
    /// Local mount directory with `~` expanded.
    pub fn mount_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.mount_dir).to_string())
    }

    /// Identity file path with `~` expanded.
    pub fn identity_path(&self) -> Option<String> {
        self.identity_file
            .as_deref()
            .map(|p| shellexpand::tilde(p).to_string())
    }

    pub fn command_timeout(&self) -> Duration {
        parse_duration(&self.command_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(2))
    }

    pub fn poll_timeout(&self) -> Duration {
        parse_duration(&self.poll_timeout).unwrap_or(Duration::from_secs(3600))
    }

    /// Collapse sentinel strings left over from hand-edited config files.
    pub fn normalize(&mut self) {
        if let Some(host) = self.host.take() {
            self.host = normalize_host(&host);
        }
        for field in [
            &mut self.username,
            &mut self.identity_file,
            &mut self.server_script,
        ] {
            if let Some(value) = field.take() {
                let value = value.trim();
                if !value.is_empty() && value != "None" {
                    *field = Some(value.to_string());
                }
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if the configuration cannot describe a usable
    /// dispatch target (remote host without directories, unparseable
    /// durations, empty remote shell).
    pub fn validate(&self) -> Result<()> {
        if self.remote_shell.trim().is_empty() {
            return Err(SkiffError::Config(
                "remote_shell must not be empty".to_string(),
            ));
        }

        if self.interpreter.trim().is_empty() {
            return Err(SkiffError::Config(
                "interpreter must not be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("command_timeout", &self.command_timeout),
            ("poll_interval", &self.poll_interval),
            ("poll_timeout", &self.poll_timeout),
        ] {
            if parse_duration(value).is_none() {
                return Err(SkiffError::Config(format!(
                    "Invalid {} '{}'. Use format like '30s', '5m', or '3600'",
                    name, value
                )));
            }
        }

        if self.host.is_some() {
            if self.server_dir.trim().is_empty() {
                return Err(SkiffError::Config(
                    "server_dir is required when a host is configured".to_string(),
                ));
            }
            if self.mount_dir.trim().is_empty() {
                return Err(SkiffError::Config(
                    "mount_dir is required when a host is configured".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Options for parallel (MPI) runs.
///
/// Opaque at this layer: stored, listed, and looked up by name, but never
/// interpreted. The job script decides what the keys mean.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MpiConfig {
    #[serde(flatten)]
    options: BTreeMap<String, String>,
}

impl MpiConfig {
    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.options.insert(key.to_string(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpi: Option<MpiConfig>,
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| SkiffError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".config").join("skiff"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Read and parse the config file without validating it. Used by
    /// `config set`, which must be able to repair a half-written config.
    pub(crate) fn read() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Err(SkiffError::Config(format!(
                "Config file not found: {}. Run 'skiff init' first.",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| SkiffError::Config(format!("Invalid config: {}", e)))?;

        // Environment overrides, applied before normalization so that
        // SKIFF_HOST="" can force a local run.
        if let Ok(host) = std::env::var("SKIFF_HOST") {
            config.server.host = Some(host);
        }
        if let Ok(identity) = std::env::var("SKIFF_IDENTITY_FILE") {
            config.server.identity_file = Some(identity);
        }

        config.server.normalize();
        Ok(config)
    }

    pub fn load() -> Result<Self> {
        let config = Self::read()?;
        config.server.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| SkiffError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
