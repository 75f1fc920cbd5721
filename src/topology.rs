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
//! Static model of the emulated radio network: subnets, their member nodes, conflict-free
//! address assignment and hop distances between subnets and nodes.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::Ipv4Addr,
    path::Path,
    sync::OnceLock,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// 1-based node index, as used in the node names `node1`, `node2`, ...
pub type NodeId = u32;
/// Subnet number (unique within a topology).
pub type SubnetId = u32;

/// Prefix length of every subnet address.
const SUBNET_PREFIX_LEN: u8 = 24;

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Subnet {0} lists node {1}, which is not part of the topology")]
    UnknownNode(SubnetId, NodeId),
    #[error("Subnet number {0} is used more than once")]
    DuplicateSubnet(SubnetId),
    #[error("Node number {0} is used more than once")]
    DuplicateNode(NodeId),
    #[error("No free subnet address left for subnet {0}")]
    AddressSpaceExhausted(SubnetId),
    #[error("Node number {0} cannot be used as a host address")]
    InvalidHostNumber(NodeId),
}

/// A group of nodes sharing one emulated radio network segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub number: SubnetId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "memberids")]
    pub members: Vec<NodeId>,
    /// Network address, assigned by `assign_addresses` if missing or conflicting.
    #[serde(default, rename = "addr")]
    pub address: Option<Ipv4Net>,
}

impl Subnet {
    /// Subnets with at most one member carry no traffic and have no links.
    pub fn carries_traffic(&self) -> bool {
        self.members.len() > 1
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    /// Address of `node` inside this subnet, i.e., `<network>.<node number>`.
    pub fn host_address(&self, node: NodeId) -> Option<Ipv4Addr> {
        let network = self.address?.network().octets();
        let host = u8::try_from(node).ok().filter(|h| *h != 0 && *h != u8::MAX)?;
        Some(Ipv4Addr::new(network[0], network[1], network[2], host))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub number: NodeId,
}

/// Topology as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyFile {
    pub subnets: Vec<Subnet>,
    pub nodes: Vec<NodeDescription>,
}

impl TopologyFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A node of the topology. A node with more than one subnet is a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Member subnets, in topology order. The k-th entry is attached to interface `emane<k>`.
    pub subnets: Vec<SubnetId>,
    /// One address per member subnet, in the same order as `subnets`.
    pub addresses: Vec<Ipv4Addr>,
}

impl Node {
    pub fn is_relay(&self) -> bool {
        self.subnets.len() > 1
    }

    /// Name used for the node on the fleet and in artifact names.
    pub fn name(&self) -> String {
        format!("node{}", self.id)
    }

    /// Name of the emulator interface attached to `subnet`.
    pub fn interface_name(&self, subnet: SubnetId) -> Option<String> {
        self.subnets
            .iter()
            .position(|s| *s == subnet)
            .map(|k| format!("emane{k}"))
    }

    /// Primary address (the one in the first member subnet).
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.addresses.first().copied()
    }
}

/// A directed link from a node towards one of its neighbours in a traffic-carrying subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub subnet: SubnetId,
    pub interface_name: String,
    pub neighbour: NodeId,
    pub neighbour_address: Ipv4Addr,
}

/// Assign each subnet an address that neither conflicts with the blacklist nor with the address
/// of another subnet. Addresses that are already valid are kept.
pub fn assign_addresses(subnets: &mut [Subnet], blacklist: &[Ipv4Net]) -> Result<(), TopologyError> {
    let blacklisted = |net: &Ipv4Net| {
        blacklist
            .iter()
            .any(|b| b.contains(&net.network()) || net.contains(&b.network()))
    };
    let mut taken: Vec<Ipv4Net> = Vec::new();

    for subnet in subnets.iter_mut() {
        match subnet.address {
            Some(addr) if !taken.contains(&addr) && !blacklisted(&addr) => {
                log::trace!("subnet {} keeps address {addr}", subnet.number);
            }
            _ => {
                let mut counter = subnet.number;
                let addr = loop {
                    let third = u8::try_from(counter)
                        .map_err(|_| TopologyError::AddressSpaceExhausted(subnet.number))?;
                    let candidate = Ipv4Net::new(Ipv4Addr::new(10, 0, third, 0), SUBNET_PREFIX_LEN)
                        .map_err(|_| TopologyError::AddressSpaceExhausted(subnet.number))?;
                    if !taken.contains(&candidate) && !blacklisted(&candidate) {
                        break candidate;
                    }
                    counter += 1;
                };
                log::debug!("assigning address {addr} to subnet {}", subnet.number);
                subnet.address = Some(addr);
            }
        }
        taken.extend(subnet.address);
    }
    Ok(())
}

/// Owns all subnets and nodes of a topology. Immutable once built.
#[derive(Debug)]
pub struct TopologyGraph {
    subnets: Vec<Subnet>,
    nodes: BTreeMap<NodeId, Node>,
    subnet_hops: OnceLock<HashMap<(SubnetId, SubnetId), usize>>,
}

impl TopologyGraph {
    /// Validate the topology, assign subnet addresses and resolve the node memberships.
    pub fn build(file: TopologyFile, blacklist: &[Ipv4Net]) -> Result<Self, TopologyError> {
        let TopologyFile { mut subnets, nodes } = file;

        let mut node_ids = HashSet::new();
        for node in &nodes {
            if !node_ids.insert(node.number) {
                return Err(TopologyError::DuplicateNode(node.number));
            }
        }
        let mut subnet_ids = HashSet::new();
        for subnet in &subnets {
            if !subnet_ids.insert(subnet.number) {
                return Err(TopologyError::DuplicateSubnet(subnet.number));
            }
            if let Some(unknown) = subnet.members.iter().find(|m| !node_ids.contains(*m)) {
                return Err(TopologyError::UnknownNode(subnet.number, *unknown));
            }
        }

        assign_addresses(&mut subnets, blacklist)?;

        let nodes = nodes
            .iter()
            .map(|n| {
                let member_of = subnets.iter().filter(|s| s.contains(n.number)).collect_vec();
                let addresses = member_of
                    .iter()
                    .map(|s| s.host_address(n.number))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(TopologyError::InvalidHostNumber(n.number))?;
                Ok((
                    n.number,
                    Node {
                        id: n.number,
                        subnets: member_of.iter().map(|s| s.number).collect(),
                        addresses,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>, TopologyError>>()?;

        Ok(Self {
            subnets,
            nodes,
            subnet_hops: OnceLock::new(),
        })
    }

    /// Load a topology file and build the graph from it.
    pub fn load(path: impl AsRef<Path>, blacklist: &[Ipv4Net]) -> Result<Self, TopologyError> {
        Self::build(TopologyFile::load(path)?, blacklist)
    }

    /// The topology file this graph was built from, with every subnet address filled in. Building
    /// a graph from it again keeps all addresses that are not blacklisted.
    pub fn to_file(&self) -> TopologyFile {
        TopologyFile {
            subnets: self.subnets.clone(),
            nodes: self
                .nodes
                .keys()
                .map(|number| NodeDescription { number: *number })
                .collect(),
        }
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn subnet(&self, id: SubnetId) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.number == id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_subnets(&self) -> usize {
        self.subnets.len()
    }

    /// All links of `node` towards its neighbours. Subnets that carry no traffic contribute none.
    pub fn links(&self, node: NodeId) -> Vec<Link> {
        let Some(n) = self.nodes.get(&node) else {
            return Vec::new();
        };
        n.subnets
            .iter()
            .filter_map(|id| self.subnet(*id))
            .filter(|s| s.carries_traffic())
            .flat_map(|s| {
                let interface_name = n.interface_name(s.number).unwrap_or_default();
                s.members
                    .iter()
                    .filter(|m| **m != node)
                    .filter_map(move |m| {
                        Some(Link {
                            subnet: s.number,
                            interface_name: interface_name.clone(),
                            neighbour: *m,
                            neighbour_address: s.host_address(*m)?,
                        })
                    })
            })
            .collect()
    }

    /// Number of subnet-to-subnet traversals between two subnets. `None` if they are not
    /// connected.
    pub fn hops_between_subnets(&self, a: SubnetId, b: SubnetId) -> Option<usize> {
        self.subnet_hops
            .get_or_init(|| self.compute_subnet_hops())
            .get(&(a, b))
            .copied()
    }

    /// 0 if both nodes share a subnet, otherwise the minimum hop distance over all pairs of their
    /// subnets. `None` if they are not connected.
    pub fn hops_between_nodes(&self, a: NodeId, b: NodeId) -> Option<usize> {
        if a == b {
            return Some(0);
        }
        let na = self.nodes.get(&a)?;
        let nb = self.nodes.get(&b)?;
        if na.subnets.iter().any(|s| nb.subnets.contains(s)) {
            return Some(0);
        }
        na.subnets
            .iter()
            .cartesian_product(nb.subnets.iter())
            .filter_map(|(sa, sb)| self.hops_between_subnets(*sa, *sb))
            .min()
    }

    /// Mean hop distance from `node` to every other reachable node.
    pub fn average_hops_from(&self, node: NodeId) -> Option<f64> {
        let hops = self
            .nodes
            .keys()
            .filter(|other| **other != node)
            .filter_map(|other| self.hops_between_nodes(node, *other))
            .collect_vec();
        (!hops.is_empty()).then(|| hops.iter().sum::<usize>() as f64 / hops.len() as f64)
    }

    /// Breadth-first expansion from every subnet over shared members. In each round, every
    /// unreached subnet that intersects the reached node set is recorded with the round number,
    /// and its members are added to the reached set for the next round.
    fn compute_subnet_hops(&self) -> HashMap<(SubnetId, SubnetId), usize> {
        let mut hops = HashMap::new();
        let n = self.subnets.len();

        for source in &self.subnets {
            hops.insert((source.number, source.number), 0);
            let mut reached_nodes: HashSet<NodeId> = source.members.iter().copied().collect();
            let mut reached: HashSet<SubnetId> = HashSet::from([source.number]);

            let mut round = 0;
            while reached.len() < n && round < n {
                round += 1;
                let mut new_nodes = Vec::new();
                for target in &self.subnets {
                    if reached.contains(&target.number)
                        || !target.members.iter().any(|m| reached_nodes.contains(m))
                    {
                        continue;
                    }
                    hops.insert((source.number, target.number), round);
                    reached.insert(target.number);
                    new_nodes.extend(
                        target
                            .members
                            .iter()
                            .filter(|m| !reached_nodes.contains(*m))
                            .copied(),
                    );
                }
                if new_nodes.is_empty() {
                    // the reached node set is final
                    break;
                }
                reached_nodes.extend(new_nodes);
            }

            if reached.len() < n {
                log::warn!(
                    "Topology is disconnected: subnet {} cannot reach subnet(s) {}",
                    source.number,
                    self.subnets
                        .iter()
                        .filter(|s| !reached.contains(&s.number))
                        .map(|s| s.number)
                        .join(", ")
                );
            }
        }

        hops
    }
}
