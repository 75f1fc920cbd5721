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
//! Statistics dumped by the emulator instances with `emanesh <node> get stat '*' all`.
//!
//! Every line holds one counter, e.g. `nem 1   phy  numUpstreamPacketsUnicastRx0 = 2451`.

use std::{collections::BTreeMap, path::Path};

use radiosweep_utils::other::trailing_number;

use crate::{topology::NodeId, util::files_matching};

/// One counter of one emulator layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmaneStat {
    pub nem: Option<u32>,
    pub layer: String,
    pub name: String,
    pub value: String,
}

impl EmaneStat {
    pub fn as_u64(&self) -> Option<u64> {
        self.value.trim().parse().ok()
    }
}

/// Parse the statistics dump of one node. Lines that do not assign a value are ignored.
pub fn parse_stats(content: &str) -> Vec<EmaneStat> {
    content
        .lines()
        .filter_map(|line| {
            let (lhs, value) = line.split_once(" = ")?;
            let tokens = lhs.split_whitespace().collect::<Vec<_>>();
            let (name, rest) = tokens.split_last()?;
            let (nem, rest) = match rest {
                ["nem", id, rest @ ..] => (id.parse().ok(), rest),
                _ => (None, rest),
            };
            Some(EmaneStat {
                nem,
                layer: rest.last().map(|l| l.to_string()).unwrap_or_default(),
                name: name.to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

/// Sum of all numeric counters whose name contains `term`, optionally restricted to one layer.
pub fn sum_stat(stats: &[EmaneStat], term: &str, layer: Option<&str>) -> u64 {
    stats
        .iter()
        .filter(|s| s.name.contains(term))
        .filter(|s| layer.map_or(true, |l| s.layer.eq_ignore_ascii_case(l)))
        .filter_map(EmaneStat::as_u64)
        .sum()
}

/// Read the pulled statistics dumps (`node<N>.stats`) of all nodes in `dir`.
pub fn read_node_stats(dir: impl AsRef<Path>) -> Result<BTreeMap<NodeId, Vec<EmaneStat>>, std::io::Error> {
    let files = files_matching(dir, "*.stats")
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stats = BTreeMap::new();
    for path in files {
        let Some(node) = path
            .file_name()
            .and_then(|n| trailing_number(n.to_string_lossy()))
        else {
            log::debug!("Skipping {path:?}, which belongs to no node");
            continue;
        };
        stats.insert(node, parse_stats(&std::fs::read_to_string(&path)?));
    }
    Ok(stats)
}

#[cfg(test)]
mod test {
    use super::*;

    const DUMP: &str = "nem 2   mac  numDownstreamPacketsBroadcastDrop0 = 0
nem 2   mac  numUpstreamPacketsBroadcastRx = 17
nem 2   phy  numUpstreamPacketsBroadcastRx = 120
nem 2   phy  numUpstreamPacketsUnicastRx = 30
nem 2   phy  processedEvents = [(1, 2)]
emanesh: unknown nem
";

    #[test]
    fn parse_dump() {
        let stats = parse_stats(DUMP);
        assert_eq!(stats.len(), 5);
        assert_eq!(stats[1].nem, Some(2));
        assert_eq!(stats[1].layer, "mac");
        assert_eq!(stats[1].name, "numUpstreamPacketsBroadcastRx");
        assert_eq!(stats[1].as_u64(), Some(17));
        assert_eq!(stats[4].as_u64(), None);

        assert_eq!(sum_stat(&stats, "numUpstreamPackets", Some("phy")), 150);
        assert_eq!(sum_stat(&stats, "numUpstreamPacketsBroadcastRx", None), 137);
        assert_eq!(sum_stat(&stats, "missing", None), 0);
    }

    #[test]
    fn stats_per_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("node2.stats"), DUMP).unwrap();
        std::fs::write(dir.path().join("node10.stats"), "nem 10 phy numUpstreamPacketsBroadcastRx = 5\n").unwrap();
        let stats = read_node_stats(dir.path()).unwrap();
        assert_eq!(stats.keys().copied().collect::<Vec<_>>(), [2, 10]);
        assert_eq!(sum_stat(&stats[&10], "Rx", Some("phy")), 5);
    }
}
