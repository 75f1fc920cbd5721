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
//! Module driving a parameter sweep over the fleet of emulated radio nodes.

pub mod app_config;
pub mod error_rate;
pub mod poller;
pub mod runner;
pub mod supervisor;
pub mod sweep;

pub use poller::{CompletionPoller, PollOutcome};
pub use runner::{TrialError, TrialRunner, TrialState};
pub use supervisor::{FailureSupervisor, SweepError, Trial, TrialStatus};
pub use sweep::{Advance, ParameterSweepEnumerator, ParameterVector};

use std::sync::Arc;

use crate::{
    config::{ConfigError, SweepConfig},
    remote::{Participant, Provisioner, RemoteExecutor, TopologyWriter},
    topology::{NodeId, TopologyGraph},
};

/// Everything a sweep needs to know about its environment. Shared read-only between the runner
/// and its background tasks.
pub struct SweepContext {
    pub config: SweepConfig,
    pub graph: Arc<TopologyGraph>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub provisioner: Arc<dyn Provisioner>,
    pub topology_writer: Arc<dyn TopologyWriter>,
}

impl SweepContext {
    pub fn new(
        config: SweepConfig,
        graph: TopologyGraph,
        executor: Arc<dyn RemoteExecutor>,
        provisioner: Arc<dyn Provisioner>,
        topology_writer: Arc<dyn TopologyWriter>,
    ) -> Result<Self, ConfigError> {
        config.validate_hosts(graph.num_nodes())?;
        Ok(Self {
            config,
            graph: Arc::new(graph),
            executor,
            provisioner,
            topology_writer,
        })
    }

    /// All nodes of the topology, in ascending order.
    pub fn participants(&self) -> Vec<Participant> {
        self.graph
            .nodes()
            .filter_map(|n| self.participant(n.id))
            .collect()
    }

    pub fn participant(&self, node: NodeId) -> Option<Participant> {
        self.graph.node(node)?;
        self.config.remote.host(node).map(|host| Participant {
            node,
            host: host.to_string(),
        })
    }
}
