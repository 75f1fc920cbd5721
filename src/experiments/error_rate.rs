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
//! Emulated packet loss, realized as random drop rules on every link of the topology.

use std::net::Ipv4Addr;

use crate::topology::{NodeId, TopologyGraph};

/// Whether a drop rule is installed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorRateAction {
    #[strum(serialize = "-A")]
    Add,
    #[strum(serialize = "-D")]
    Remove,
}

/// Drop rule for the packets a node receives from one of its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRateCommand {
    /// Node on which the rule is installed.
    pub node_id: NodeId,
    pub interface_name: String,
    pub neighbour: Ipv4Addr,
    pub action: ErrorRateAction,
    pub rate: f64,
}

impl ErrorRateCommand {
    pub fn command(&self) -> String {
        format!(
            "sudo iptables {} INPUT -i {} -s {} -m statistic --mode random --probability {} -j DROP",
            self.action, self.interface_name, self.neighbour, self.rate
        )
    }
}

/// One rule per node and neighbour, for every subnet that carries traffic.
pub fn error_rate_commands(
    graph: &TopologyGraph,
    rate: f64,
    action: ErrorRateAction,
) -> Vec<ErrorRateCommand> {
    graph
        .nodes()
        .flat_map(|node| {
            graph.links(node.id).into_iter().map(move |link| ErrorRateCommand {
                node_id: node.id,
                interface_name: link.interface_name,
                neighbour: link.neighbour_address,
                action,
                rate,
            })
        })
        .collect()
}
