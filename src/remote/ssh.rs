// RadioSweep: Parameter Sweeps and Result Consolidation for Emulated Radio Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Remote execution by shelling out to `ssh` and `scp`.

use std::{path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use super::{RemoteError, RemoteExecutor};

/// `ssh` exits with this status if the connection itself failed.
const SSH_CONNECTION_ERROR: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: Option<String>,
    connect_timeout: Duration,
    retries: usize,
    retry_delay: Duration,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            user: None,
            connect_timeout: Duration::from_secs(10),
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl SshExecutor {
    pub fn new(user: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            user: Some(user.into()),
            connect_timeout,
            ..Default::default()
        }
    }

    /// Number of attempts made for a command or transfer whose connection failed.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    fn target(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    fn options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }

    async fn scp(&self, from: &str, to: &str, host: &str) -> Result<(), RemoteError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = Command::new("scp")
                .args(self.options())
                .args(["-q", from, to])
                .stdin(Stdio::null())
                .output()
                .await?;
            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if attempt >= self.retries {
                return Err(RemoteError::CommandFailed {
                    host: host.to_string(),
                    command: format!("scp {from} {to}"),
                    status: output.status.code().unwrap_or(-1),
                    stderr,
                });
            }
            log::debug!("scp {from} {to} failed (attempt {attempt}): {stderr}");
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &str, command: &str) -> Result<i32, RemoteError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let output = Command::new("ssh")
                .args(self.options())
                .arg(self.target(host))
                .arg(command)
                .stdin(Stdio::null())
                .output()
                .await?;
            let status = output.status.code().unwrap_or(-1);
            log::trace!("{host}: `{command}` exited with {status}");

            if status != SSH_CONNECTION_ERROR {
                return Ok(status);
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if attempt >= self.retries {
                return Err(RemoteError::CommandFailed {
                    host: host.to_string(),
                    command: command.to_string(),
                    status,
                    stderr,
                });
            }
            log::debug!("cannot connect to {host} (attempt {attempt}): {stderr}");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn push_file(&self, local: &Path, host: &str, remote: &str) -> Result<(), RemoteError> {
        let to = format!("{}:{remote}", self.target(host));
        self.scp(&local.to_string_lossy(), &to, host).await
    }

    async fn pull_file(&self, host: &str, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let from = format!("{}:{remote}", self.target(host));
        self.scp(&from, &local.to_string_lossy(), host).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn target_and_options() {
        let ssh = SshExecutor::new("emane-01", Duration::from_secs(5)).with_retries(0);
        assert_eq!(ssh.target("10.1.0.1"), "emane-01@10.1.0.1");
        assert_eq!(ssh.retries, 1);
        assert!(ssh.options().contains(&"ConnectTimeout=5".to_string()));
        assert!(ssh.options().contains(&"BatchMode=yes".to_string()));
        assert_eq!(SshExecutor::default().target("node1"), "node1");
    }
}
