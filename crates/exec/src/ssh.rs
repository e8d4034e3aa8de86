//! SSH connection handling.
//!
//! One [`SshConnection`] per target, cached behind a mutex so exactly one
//! task drives a connection at a time; a per-host semaphore bounds how many
//! commands can queue against the same box.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use tracing::{debug, warn};

/// Resolved connection parameters for one SSH target.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub key_path: Option<PathBuf>,
    pub password: Option<String>,
    pub max_concurrent: usize,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            address: host.clone(),
            host,
            port: 22,
            username: "root".to_string(),
            key_path: None,
            password: None,
            max_concurrent: 4,
        }
    }
}

/// Output of one remote command.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct SshConnection {
    client: Client,
    host: String,
}

impl SshConnection {
    pub async fn connect(target: &SshTarget, connect_timeout_secs: u64) -> Result<Self> {
        debug!(user = %target.username, host = %target.address, "establishing SSH connection");

        let auth_method = match (&target.key_path, &target.password) {
            (Some(path), _) => {
                if path.extension().is_some_and(|e| e == "pub") {
                    return Err(anyhow!(
                        "SSH key path should point to the private key, not {}",
                        path.display()
                    ));
                }
                let key = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading SSH key {}", path.display()))?;
                AuthMethod::with_key(&key, None)
            }
            (None, Some(password)) => AuthMethod::with_password(password),
            (None, None) => {
                let key = default_private_key().await?;
                AuthMethod::with_key(&key, None)
            }
        };

        let client = tokio::time::timeout(
            std::time::Duration::from_secs(connect_timeout_secs),
            Client::connect(
                (target.address.as_str(), target.port),
                &target.username,
                auth_method,
                ServerCheckMethod::NoCheck,
            ),
        )
        .await
        .map_err(|_| anyhow!("SSH connection to {} timed out after {connect_timeout_secs}s", target.host))?
        .map_err(|e| anyhow!("failed to connect to {}@{}: {e}", target.username, target.host))?;

        debug!(host = %target.host, "SSH connection established");
        Ok(Self {
            client,
            host: target.host.clone(),
        })
    }

    /// Run one command; the exit code is reported, never turned into an
    /// error, so the caller can attach analysis to failures.
    pub async fn execute(&self, command: &str) -> Result<RemoteOutput> {
        let result = self
            .client
            .execute(command)
            .await
            .map_err(|e| anyhow!("SSH command execution failed on {}: {e}", self.host))?;

        if result.exit_status != 0 {
            warn!(
                host = %self.host,
                exit_code = result.exit_status,
                "remote command exited non-zero"
            );
        }

        Ok(RemoteOutput {
            exit_code: result.exit_status as i32,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }
}

/// First private key found under `~/.ssh`.
async fn default_private_key() -> Result<String> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME not set, cannot locate an SSH key"))?;
    for name in ["id_ed25519", "id_rsa"] {
        let candidate = home.join(".ssh").join(name);
        if candidate.is_file() {
            return tokio::fs::read_to_string(&candidate)
                .await
                .with_context(|| format!("reading SSH key {}", candidate.display()));
        }
    }
    Err(anyhow!("no SSH key found under ~/.ssh (tried id_ed25519, id_rsa)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_defaults() {
        let target = SshTarget::new("web-01");
        assert_eq!(target.port, 22);
        assert_eq!(target.username, "root");
        assert_eq!(target.address, "web-01");
        assert!(target.key_path.is_none());
    }
}
