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
//! Narrow interfaces to the fleet of remote nodes: command execution and file transfer,
//! provisioning, and writing topology artifacts.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use itertools::Itertools;

use crate::topology::{NodeId, TopologyGraph};

pub mod fleet;
pub mod ssh;

pub use fleet::{JsonTopologyWriter, StaticFleet};
pub use ssh::SshExecutor;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{command}` on {host} exited with status {status}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Remote task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Runs commands on, and transfers files from and to, remote hosts. Implementations must be
/// usable from many concurrent tasks.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `command` on `host` and return its exit status.
    async fn execute(&self, host: &str, command: &str) -> Result<i32, RemoteError>;

    /// Copy the local file `local` to `remote` on `host`.
    async fn push_file(&self, local: &Path, host: &str, remote: &str) -> Result<(), RemoteError>;

    /// Copy `remote` on `host` to the local file `local`.
    async fn pull_file(&self, host: &str, remote: &str, local: &Path) -> Result<(), RemoteError>;
}

/// Makes sure that the fleet of instances exists and is reachable.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn ensure_instances_ready(&self, prefix: &str, count: usize, timeout: Duration) -> bool;

    async fn create_instances(
        &self,
        count: usize,
        image: &str,
        key_name: &str,
        prefix: &str,
    ) -> Result<(), RemoteError>;
}

/// Writes the topology artifacts read by the emulator into a local directory.
pub trait TopologyWriter: Send + Sync {
    /// Returns the paths of all written files.
    fn write(&self, graph: &TopologyGraph, dir: &Path) -> Result<Vec<PathBuf>, RemoteError>;
}

/// A node taking part in a trial, together with the host it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub node: NodeId,
    pub host: String,
}

/// Spawn one task per participant, and wait for all of them to finish. The results are returned
/// in the order of `participants`. A failing or panicking task does not affect the others.
pub async fn broadcast<F, Fut, T>(
    participants: &[Participant],
    f: F,
) -> Vec<(NodeId, Result<T, RemoteError>)>
where
    F: Fn(Participant) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    T: Send + 'static,
{
    let handles = participants
        .iter()
        .map(|p| (p.node, tokio::spawn(f(p.clone()))))
        .collect_vec();

    let mut results = Vec::with_capacity(handles.len());
    for (node, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(RemoteError::Join(e)),
        };
        results.push((node, result));
    }
    results
}

/// Execute a (possibly participant-specific) command on every participant in parallel.
pub async fn broadcast_command(
    executor: &Arc<dyn RemoteExecutor>,
    participants: &[Participant],
    command: impl Fn(&Participant) -> String,
) -> Vec<(NodeId, Result<i32, RemoteError>)> {
    broadcast(participants, |p| {
        let executor = executor.clone();
        let command = command(&p);
        async move {
            log::trace!("[node{}] {command}", p.node);
            executor.execute(&p.host, &command).await
        }
    })
    .await
}

/// Push the same local file to every participant in parallel.
pub async fn broadcast_file(
    executor: &Arc<dyn RemoteExecutor>,
    participants: &[Participant],
    local: &Path,
    remote: &str,
) -> Vec<(NodeId, Result<(), RemoteError>)> {
    broadcast(participants, |p| {
        let executor = executor.clone();
        let local = local.to_path_buf();
        let remote = remote.to_string();
        async move { executor.push_file(&local, &p.host, &remote).await }
    })
    .await
}

/// Handle that stops every participant. It owns everything it needs, such that it can be used
/// while the sweep itself is borrowed.
#[derive(Clone)]
pub struct Stopper {
    executor: Arc<dyn RemoteExecutor>,
    participants: Vec<Participant>,
    command: String,
}

impl Stopper {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        participants: Vec<Participant>,
        command: String,
    ) -> Self {
        Self {
            executor,
            participants,
            command,
        }
    }

    /// Best-effort stop of all participants. Failures are only logged.
    pub async fn stop_all(&self) {
        let command = self.command.clone();
        for (node, result) in broadcast_command(&self.executor, &self.participants, |_| {
            command.clone()
        })
        .await
        {
            match result {
                Ok(0) => {}
                Ok(status) => log::debug!("[node{node}] stop exited with status {status}"),
                Err(e) => log::warn!("[node{node}] cannot stop: {e}"),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;

    /// Executor that records every command and answers according to a closure.
    pub(crate) struct MockExecutor {
        pub log: Mutex<Vec<(String, String)>>,
        pub pulled: Mutex<Vec<(String, String, PathBuf)>>,
        pub pushed: AtomicUsize,
        #[allow(clippy::type_complexity)]
        respond: Box<dyn Fn(&str, &str) -> Result<i32, RemoteError> + Send + Sync>,
    }

    impl MockExecutor {
        pub(crate) fn new(
            respond: impl Fn(&str, &str) -> Result<i32, RemoteError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                pulled: Mutex::new(Vec::new()),
                pushed: AtomicUsize::new(0),
                respond: Box::new(respond),
            }
        }

        pub(crate) fn ok() -> Self {
            Self::new(|_, _| Ok(0))
        }

        pub(crate) fn commands_on(&self, host: &str) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h == host)
                .map(|(_, c)| c.clone())
                .collect()
        }

        pub(crate) fn count_matching(&self, pattern: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, c)| c.contains(pattern))
                .count()
        }

        /// Number of occurrences of `pattern` over all commands.
        pub(crate) fn occurrences(&self, pattern: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .map(|(_, c)| c.matches(pattern).count())
                .sum()
        }
    }

    #[async_trait]
    impl RemoteExecutor for MockExecutor {
        async fn execute(&self, host: &str, command: &str) -> Result<i32, RemoteError> {
            self.log
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            (self.respond)(host, command)
        }

        async fn push_file(
            &self,
            _local: &Path,
            _host: &str,
            _remote: &str,
        ) -> Result<(), RemoteError> {
            self.pushed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn pull_file(&self, host: &str, remote: &str, local: &Path) -> Result<(), RemoteError> {
            self.pulled
                .lock()
                .unwrap()
                .push((host.to_string(), remote.to_string(), local.to_path_buf()));
            Ok(())
        }
    }

    pub(crate) fn participants(n: u32) -> Vec<Participant> {
        (1..=n)
            .map(|node| Participant {
                node,
                host: format!("host{node}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_despite_failures() {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(MockExecutor::new(|host, _| {
            if host == "host2" {
                Err(RemoteError::Unsupported("unreachable"))
            } else {
                Ok(0)
            }
        }));
        let results = broadcast_command(&executor, &participants(4), |p| {
            format!("echo {}", p.node)
        })
        .await;
        assert_eq!(results.iter().map(|(n, _)| *n).collect_vec(), [1, 2, 3, 4]);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[3].1.is_ok());
    }

    #[tokio::test]
    async fn stopper_sends_to_all() {
        let mock = Arc::new(MockExecutor::ok());
        let stopper = Stopper::new(mock.clone(), participants(3), "sudo pkill java".to_string());
        stopper.stop_all().await;
        let hosts: HashSet<String> = mock.log.lock().unwrap().iter().map(|(h, _)| h.clone()).collect();
        assert_eq!(hosts.len(), 3);
        assert_eq!(mock.count_matching("pkill java"), 3);
    }
}
