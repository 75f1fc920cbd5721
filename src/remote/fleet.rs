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
//! A fixed fleet of already running hosts, and the topology artifacts pushed onto it.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{broadcast_command, Participant, Provisioner, RemoteError, RemoteExecutor, TopologyWriter};
use crate::topology::TopologyGraph;

/// File name of the resolved topology written by [`JsonTopologyWriter`].
pub const TOPOLOGY_FILE_NAME: &str = "topology.json";

/// Provisioner over a static list of hosts. Instances are "ready" once all of them answer.
pub struct StaticFleet {
    executor: Arc<dyn RemoteExecutor>,
    hosts: Vec<String>,
    probe: String,
    probe_interval: Duration,
}

impl StaticFleet {
    pub fn new(executor: Arc<dyn RemoteExecutor>, hosts: Vec<String>) -> Self {
        Self {
            executor,
            hosts,
            probe: "true".to_string(),
            probe_interval: Duration::from_secs(5),
        }
    }

    /// Command that exits with 0 on a host that is up.
    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.probe = probe.into();
        self
    }

    async fn all_reachable(&self, count: usize) -> bool {
        let participants = self
            .hosts
            .iter()
            .take(count)
            .zip(1..)
            .map(|(host, node)| Participant {
                node,
                host: host.clone(),
            })
            .collect::<Vec<_>>();
        broadcast_command(&self.executor, &participants, |_| self.probe.clone())
            .await
            .into_iter()
            .all(|(node, result)| match result {
                Ok(0) => true,
                Ok(status) => {
                    log::debug!("[node{node}] probe exited with {status}");
                    false
                }
                Err(e) => {
                    log::debug!("[node{node}] not reachable: {e}");
                    false
                }
            })
    }
}

#[async_trait]
impl Provisioner for StaticFleet {
    async fn ensure_instances_ready(&self, prefix: &str, count: usize, timeout: Duration) -> bool {
        if self.hosts.len() < count {
            log::error!(
                "Only {} hosts known for {count} instances with prefix {prefix}",
                self.hosts.len()
            );
            return false;
        }
        let start = Instant::now();
        loop {
            if self.all_reachable(count).await {
                log::debug!("{count} instances with prefix {prefix} are ready");
                return true;
            }
            if start.elapsed() + self.probe_interval > timeout {
                return false;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    async fn create_instances(
        &self,
        _count: usize,
        _image: &str,
        _key_name: &str,
        _prefix: &str,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::Unsupported(
            "a static fleet cannot create new instances",
        ))
    }
}

/// Writes the topology with all assigned addresses as a single JSON file, readable with
/// [`TopologyGraph::load`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTopologyWriter;

impl TopologyWriter for JsonTopologyWriter {
    fn write(&self, graph: &TopologyGraph, dir: &Path) -> Result<Vec<PathBuf>, RemoteError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(TOPOLOGY_FILE_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(&graph.to_file())?)?;
        Ok(vec![path])
    }
}
