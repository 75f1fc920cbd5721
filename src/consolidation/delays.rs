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
//! Message delays as recorded by the receivers in the consolidated database.

use std::{collections::BTreeMap, path::Path};

use rusqlite::{types::Value, Connection, OpenFlags};

use crate::topology::{NodeId, TopologyGraph};

/// Table in which every node logs the messages it received.
pub const RECEIVED_TABLE: &str = "loggableeventmessagereceived";

/// Positions of the relevant columns in the consolidated receive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayColumns {
    pub node: usize,
    pub receive_time: usize,
    pub file_name: usize,
    pub creation_time: usize,
}

impl Default for DelayColumns {
    fn default() -> Self {
        Self {
            node: 0,
            receive_time: 2,
            file_name: 3,
            creation_time: 5,
        }
    }
}

/// Delay of every node for every message: `message -> node -> delay`.
pub type MessageDelays = BTreeMap<String, BTreeMap<NodeId, f64>>;

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(x) => Some(*x as f64),
        Value::Real(x) => Some(*x),
        Value::Text(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_node(value: &Value) -> Option<NodeId> {
    match value {
        Value::Integer(x) => NodeId::try_from(*x).ok(),
        Value::Text(s) => radiosweep_utils::other::trailing_number(s),
        _ => None,
    }
}

/// Read the receive table of a consolidated database and compute the delay
/// (`receive time - creation time`) of each message at each node. A database without that table
/// yields no delays.
pub fn read_delays(
    path: impl AsRef<Path>,
    columns: DelayColumns,
) -> Result<MessageDelays, rusqlite::Error> {
    let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [RECEIVED_TABLE],
        |r| r.get(0),
    )?;
    if !exists {
        log::warn!("There is no delay data in {:?}", path.as_ref());
        return Ok(MessageDelays::new());
    }

    let mut stmt = conn.prepare(&format!("SELECT * FROM {RECEIVED_TABLE}"))?;
    let n = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut delays = MessageDelays::new();
    while let Some(row) = rows.next()? {
        let values = (0..n)
            .map(|i| row.get::<_, Value>(i))
            .collect::<Result<Vec<_>, _>>()?;
        let get = |i: usize| values.get(i);
        let (Some(node), Some(file), Some(end), Some(start)) = (
            get(columns.node).and_then(as_node),
            get(columns.file_name).map(|v| match v {
                Value::Text(s) => s.clone(),
                other => format!("{other:?}"),
            }),
            get(columns.receive_time).and_then(as_f64),
            get(columns.creation_time).and_then(as_f64),
        ) else {
            log::debug!("Skipping incomplete row {values:?}");
            continue;
        };
        delays.entry(file).or_default().insert(node, end - start);
    }
    Ok(delays)
}

/// Divide every delay by the hop distance between the receiver and `sender`. Delays of nodes
/// at distance 0, or without a path to the sender, stay as they are.
pub fn normalize_by_hops(delays: &MessageDelays, graph: &TopologyGraph, sender: NodeId) -> MessageDelays {
    delays
        .iter()
        .map(|(message, per_node)| {
            let normalized = per_node
                .iter()
                .map(|(node, delay)| {
                    let delay = match graph.hops_between_nodes(sender, *node) {
                        Some(hops) if hops > 0 => delay / hops as f64,
                        _ => *delay,
                    };
                    (*node, delay)
                })
                .collect();
            (message.clone(), normalized)
        })
        .collect()
}
