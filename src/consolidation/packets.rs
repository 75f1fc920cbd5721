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
//! Packet counts as logged by the application, compared against the counts of the captures.

use std::{collections::BTreeMap, path::Path};

use rusqlite::{types::Value, Connection, OpenFlags};
use strum::IntoEnumIterator;

use crate::{
    time_series::{Direction, FrameType, PacketCounts},
    topology::NodeId,
};

/// Table in which every node logs the packets it sent.
pub const SENT_TABLE: &str = "loggableeventpacketsent";
/// Table in which every node logs the packets it received.
pub const RECEIVED_TABLE: &str = "loggableeventpacketreceived";

/// Positions of the relevant columns in the consolidated packet tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketColumns {
    pub node: usize,
    pub sent_type: usize,
    pub received_type: usize,
}

impl Default for PacketColumns {
    fn default() -> Self {
        Self {
            node: 0,
            sent_type: 3,
            received_type: 4,
        }
    }
}

fn as_frame_type(value: &Value) -> Option<FrameType> {
    match value {
        Value::Integer(x) => u8::try_from(*x).ok().and_then(FrameType::from_tag),
        Value::Text(s) => s
            .parse::<u8>()
            .ok()
            .and_then(FrameType::from_tag)
            .or_else(|| s.to_lowercase().parse().ok()),
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

/// Count the packets every node logged as sent and received, per frame type. Missing tables
/// count as empty.
pub fn logged_packet_counts(
    path: impl AsRef<Path>,
    columns: PacketColumns,
) -> Result<BTreeMap<NodeId, PacketCounts>, rusqlite::Error> {
    let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut counts: BTreeMap<NodeId, PacketCounts> = BTreeMap::new();

    for (table, type_column, direction) in [
        (SENT_TABLE, columns.sent_type, Direction::Sent),
        (RECEIVED_TABLE, columns.received_type, Direction::Received),
    ] {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |r| r.get(0),
        )?;
        if !exists {
            log::warn!("There is no table {table} in {:?}", path.as_ref());
            continue;
        }

        let mut stmt = conn.prepare(&format!("SELECT * FROM {table}"))?;
        let mut rows = stmt.query([])?;
        let mut skipped = 0;
        while let Some(row) = rows.next()? {
            let node = row.get::<_, Value>(columns.node).ok();
            let frame_type = row.get::<_, Value>(type_column).ok();
            let (Some(node), Some(frame_type)) = (
                node.as_ref().and_then(as_node),
                frame_type.as_ref().and_then(as_frame_type),
            ) else {
                skipped += 1;
                continue;
            };
            let c = counts.entry(node).or_default();
            *c.per_type.entry(frame_type).or_default() += 1;
            match direction {
                Direction::Sent => c.sent += 1,
                Direction::Received => c.received += 1,
            }
        }
        if skipped > 0 {
            log::debug!("{table}: skipped {skipped} rows without node or known packet type");
        }
    }
    Ok(counts)
}

/// One counter of one node, as logged and as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountComparison {
    pub node: NodeId,
    /// A frame type, `sent` or `received`.
    pub category: String,
    pub logged: usize,
    pub captured: usize,
}

impl CountComparison {
    pub fn matches(&self) -> bool {
        self.logged == self.captured
    }

    pub fn record_title() -> [&'static str; 5] {
        ["node", "category", "logged", "captured", "matches"]
    }

    pub fn record(&self) -> [String; 5] {
        [
            self.node.to_string(),
            self.category.clone(),
            self.logged.to_string(),
            self.captured.to_string(),
            self.matches().to_string(),
        ]
    }
}

/// Compare every counter of every node that appears on either side.
pub fn compare_packet_counts(
    logged: &BTreeMap<NodeId, PacketCounts>,
    captured: &BTreeMap<NodeId, PacketCounts>,
) -> Vec<CountComparison> {
    let empty = PacketCounts::default();
    let mut nodes = logged.keys().chain(captured.keys()).copied().collect::<Vec<_>>();
    nodes.sort_unstable();
    nodes.dedup();

    nodes
        .into_iter()
        .flat_map(|node| {
            let l = logged.get(&node).unwrap_or(&empty);
            let c = captured.get(&node).unwrap_or(&empty);
            let per_type = |counts: &PacketCounts, t: FrameType| {
                counts.per_type.get(&t).copied().unwrap_or_default()
            };
            FrameType::iter()
                .map(|t| (t.to_string(), per_type(l, t), per_type(c, t)))
                .chain([
                    (Direction::Sent.to_string(), l.sent, c.sent),
                    (Direction::Received.to_string(), l.received, c.received),
                ])
                .map(move |(category, logged, captured)| CountComparison {
                    node,
                    category,
                    logged,
                    captured,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Write a comparison as CSV.
pub fn write_comparison_csv(path: impl AsRef<Path>, rows: &[CountComparison]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CountComparison::record_title())?;
    for row in rows {
        writer.write_record(row.record())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE {SENT_TABLE} (nodeNumber INTEGER, eventId INTEGER, ts INTEGER, \
             packetType INTEGER);
             INSERT INTO {SENT_TABLE} VALUES (1, 1, 100, 1);
             INSERT INTO {SENT_TABLE} VALUES (1, 2, 110, 2);
             INSERT INTO {SENT_TABLE} VALUES (1, 3, 120, 2);
             INSERT INTO {SENT_TABLE} VALUES (2, 1, 130, 9);
             CREATE TABLE {RECEIVED_TABLE} (nodeNumber INTEGER, eventId INTEGER, ts INTEGER, \
             source TEXT, packetType TEXT);
             INSERT INTO {RECEIVED_TABLE} VALUES (2, 1, 105, 'node1', '1');
             INSERT INTO {RECEIVED_TABLE} VALUES (2, 2, 115, 'node1', 'gvine');"
        ))
        .unwrap();
    }

    #[test]
    fn counts_from_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consolidated.db");
        write_db(&path);
        let counts = logged_packet_counts(&path, PacketColumns::default()).unwrap();

        assert_eq!(counts[&1].sent, 3);
        assert_eq!(counts[&1].received, 0);
        assert_eq!(counts[&1].per_type[&FrameType::Gvine], 2);
        // the packet with the unknown type 9 is not counted
        assert_eq!(counts[&2].sent, 0);
        assert_eq!(counts[&2].received, 2);
        assert_eq!(counts[&2].per_type[&FrameType::Beacon], 1);
    }

    #[test]
    fn comparison_reports_mismatches() {
        let mut logged = BTreeMap::new();
        logged.insert(
            1,
            PacketCounts {
                per_type: BTreeMap::from([(FrameType::Gvine, 3)]),
                sent: 3,
                received: 0,
            },
        );
        let mut captured = logged.clone();
        captured.insert(
            2,
            PacketCounts {
                per_type: BTreeMap::from([(FrameType::Beacon, 1)]),
                sent: 0,
                received: 1,
            },
        );

        let rows = compare_packet_counts(&logged, &captured);
        // four frame types plus sent and received, for both nodes
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().filter(|r| r.node == 1).all(CountComparison::matches));
        let mismatches = rows.iter().filter(|r| !r.matches()).collect::<Vec<_>>();
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].category, "beacon");
        assert_eq!((mismatches[0].logged, mismatches[0].captured), (0, 1));
        assert_eq!(mismatches[1].category, "received");

        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("comparison.csv");
        write_comparison_csv(&csv_path, &rows).unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.records().count(), 12);
    }
}
