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
//! Classification of the frames captured on every node, and their aggregation into time series.

use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use itertools::Itertools;
use pcap_file::DataLink;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use radiosweep_utils::{
    other::trailing_number,
    pcap_utils::{read_capture, Capture, CaptureError},
};

use crate::{
    topology::{NodeId, TopologyGraph},
    util::files_matching,
};

pub mod buckets;

pub use buckets::{
    bucket, check_width, BucketKey, BucketValue, InvalidBucketWidth, Metric, TimeBuckets, View,
};

/// Offset of the type tag in the application payload.
pub const TYPE_TAG_OFFSET: usize = 3;

/// Frame categories of the application protocol, identified by their type tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FrameType {
    Beacon,
    Gvine,
    Handshake,
    Babel,
}

impl FrameType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Beacon),
            2 => Some(Self::Gvine),
            3 => Some(Self::Handshake),
            4 => Some(Self::Babel),
            _ => None,
        }
    }
}

/// Direction of a frame, relative to the node that captured it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFrame {
    pub node: NodeId,
    pub timestamp_millis: u64,
    /// Length of the frame on the wire.
    pub byte_length: u32,
    pub direction: Direction,
    pub frame_type: FrameType,
}

/// The node that owns a capture, together with its addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub node: NodeId,
    /// All addresses of the node. If empty, a source address is considered to be the node's own
    /// if its last octet equals the node number.
    pub addresses: Vec<Ipv4Addr>,
}

impl Owner {
    pub fn new(node: NodeId, addresses: Vec<Ipv4Addr>) -> Self {
        Self { node, addresses }
    }

    /// Owners of every node in the topology.
    pub fn from_graph(graph: &TopologyGraph) -> BTreeMap<NodeId, Owner> {
        graph
            .nodes()
            .map(|n| (n.id, Owner::new(n.id, n.addresses.clone())))
            .collect()
    }

    pub fn is_own(&self, addr: Ipv4Addr) -> bool {
        if self.addresses.is_empty() {
            u32::from(addr.octets()[3]) == self.node
        } else {
            self.addresses.contains(&addr)
        }
    }
}

/// Extract the IPv4 source address and the type tag of a packet.
fn parse_packet(datalink: &DataLink, data: &[u8]) -> Option<(Option<Ipv4Addr>, u8)> {
    let sliced = match datalink {
        DataLink::LINUX_SLL => SlicedPacket::from_linux_sll(data),
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => SlicedPacket::from_ip(data),
        _ => SlicedPacket::from_ethernet(data),
    }
    .ok()?;
    let source = match &sliced.net {
        Some(InternetSlice::Ipv4(ip)) => Some(ip.header().source_addr()),
        _ => None,
    };
    let payload = match &sliced.transport {
        Some(TransportSlice::Udp(udp)) => udp.payload(),
        Some(TransportSlice::Tcp(tcp)) => tcp.payload(),
        _ => return None,
    };
    payload.get(TYPE_TAG_OFFSET).map(|tag| (source, *tag))
}

/// Classify every packet of a capture. Packets without a (known) type tag are dropped.
pub fn classify(capture: &Capture, owner: &Owner) -> Vec<CapturedFrame> {
    let mut dropped = 0;
    let frames = capture
        .packets
        .iter()
        .filter_map(|packet| {
            let Some((frame_type, source)) = parse_packet(&capture.datalink, &packet.data)
                .and_then(|(source, tag)| FrameType::from_tag(tag).map(|t| (t, source)))
            else {
                dropped += 1;
                return None;
            };
            let direction = match source {
                Some(addr) if owner.is_own(addr) => Direction::Sent,
                _ => Direction::Received,
            };
            Some(CapturedFrame {
                node: owner.node,
                timestamp_millis: packet.timestamp_millis(),
                byte_length: packet.orig_len,
                direction,
                frame_type,
            })
        })
        .collect_vec();
    if dropped > 0 {
        log::debug!(
            "[node{}] dropped {dropped} frames without a known type tag",
            owner.node
        );
    }
    frames
}

/// All capture files (`*.pcap` or `*.pcap.gz`) in `dir`, with the node they belong to.
pub fn node_captures(dir: impl AsRef<Path>) -> Result<Vec<(NodeId, PathBuf)>, glob::PatternError> {
    Ok(files_matching(dir, "*.pcap*")?
        .into_iter()
        .zip(1..)
        .map(|(path, idx)| {
            let node = path
                .file_name()
                .and_then(|n| trailing_number(n.to_string_lossy()))
                .unwrap_or(idx);
            (node, path)
        })
        .collect())
}

/// Read and classify the captures of all nodes in parallel. Nodes without an entry in `owners`
/// are classified by the last octet of the source address.
pub fn classify_captures(
    captures: &[(NodeId, PathBuf)],
    owners: &BTreeMap<NodeId, Owner>,
) -> Result<Vec<CapturedFrame>, CaptureError> {
    let per_node = captures
        .par_iter()
        .map(|(node, path)| {
            let owner = owners
                .get(node)
                .cloned()
                .unwrap_or_else(|| Owner::new(*node, Vec::new()));
            let capture = read_capture(path)?;
            Ok(classify(&capture, &owner))
        })
        .collect::<Result<Vec<_>, CaptureError>>()?;
    Ok(per_node.into_iter().flatten().collect())
}

/// Frame counts of a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCounts {
    pub per_type: BTreeMap<FrameType, usize>,
    pub sent: usize,
    pub received: usize,
}

impl PacketCounts {
    pub fn total(&self) -> usize {
        self.sent + self.received
    }
}

/// Count the frames of each node per type and per direction.
pub fn packet_counts(frames: &[CapturedFrame]) -> BTreeMap<NodeId, PacketCounts> {
    let mut counts: BTreeMap<NodeId, PacketCounts> = BTreeMap::new();
    for frame in frames {
        let c = counts.entry(frame.node).or_default();
        *c.per_type.entry(frame.frame_type).or_default() += 1;
        match frame.direction {
            Direction::Sent => c.sent += 1,
            Direction::Received => c.received += 1,
        }
    }
    counts
}

#[cfg(test)]
pub(crate) mod test {
    use std::{fs::File, time::Duration};

    use etherparse::PacketBuilder;
    use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
    use radiosweep_utils::pcap_utils::RawPacket;

    use super::*;

    /// An Ethernet/IPv4/UDP frame whose payload carries `tag` at the type tag offset.
    pub(crate) fn udp_frame(source: [u8; 4], tag: Option<u8>) -> Vec<u8> {
        let payload = match tag {
            Some(tag) => vec![0xca, 0xfe, 0x00, tag, 0x42, 0x42],
            None => vec![0xca, 0xfe],
        };
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(source, [10, 0, 1, 255], 20)
            .udp(7000, 7000);
        let mut data = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut data, &payload).unwrap();
        data
    }

    pub(crate) fn write_pcap(path: &Path, frames: &[(u64, Vec<u8>)]) {
        let mut writer = PcapWriter::with_header(
            File::create(path).unwrap(),
            PcapHeader {
                datalink: DataLink::ETHERNET,
                ..Default::default()
            },
        )
        .unwrap();
        for (millis, data) in frames {
            writer
                .write_packet(&PcapPacket::new(
                    Duration::from_millis(*millis),
                    data.len() as u32,
                    data,
                ))
                .unwrap();
        }
    }

    fn capture(frames: Vec<Vec<u8>>) -> Capture {
        Capture {
            datalink: DataLink::ETHERNET,
            packets: frames
                .into_iter()
                .enumerate()
                .map(|(i, data)| RawPacket {
                    timestamp: Duration::from_millis(1000 + 100 * i as u64),
                    orig_len: data.len() as u32,
                    data,
                })
                .collect(),
        }
    }

    #[test]
    fn tags_and_directions() {
        let owner = Owner::new(2, vec![Ipv4Addr::new(10, 0, 1, 2)]);
        let frames = classify(
            &capture(vec![
                udp_frame([10, 0, 1, 2], Some(1)),
                udp_frame([10, 0, 1, 3], Some(2)),
                udp_frame([10, 0, 1, 3], Some(4)),
                udp_frame([10, 0, 1, 2], Some(3)),
            ]),
            &owner,
        );
        assert_eq!(
            frames.iter().map(|f| (f.frame_type, f.direction)).collect_vec(),
            [
                (FrameType::Beacon, Direction::Sent),
                (FrameType::Gvine, Direction::Received),
                (FrameType::Babel, Direction::Received),
                (FrameType::Handshake, Direction::Sent),
            ]
        );
        assert_eq!(frames[1].timestamp_millis, 1100);
        assert!(frames.iter().all(|f| f.node == 2));
    }

    #[test]
    fn unknown_and_missing_tags_are_dropped() {
        let owner = Owner::new(1, Vec::new());
        let frames = classify(
            &capture(vec![
                udp_frame([10, 0, 1, 1], Some(0)),
                udp_frame([10, 0, 1, 1], Some(9)),
                udp_frame([10, 0, 1, 1], None),
                vec![0xff; 10],
                udp_frame([10, 0, 1, 1], Some(2)),
            ]),
            &owner,
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Gvine);
        // last octet fallback
        assert_eq!(frames[0].direction, Direction::Sent);
    }

    #[test]
    fn counts_per_node() {
        let dir = tempfile::tempdir().unwrap();
        write_pcap(
            &dir.path().join("node1.pcap"),
            &[
                (0, udp_frame([10, 0, 1, 1], Some(1))),
                (10, udp_frame([10, 0, 1, 2], Some(1))),
            ],
        );
        write_pcap(
            &dir.path().join("node2.pcap"),
            &[(20, udp_frame([10, 0, 1, 1], Some(2)))],
        );
        let captures = node_captures(dir.path()).unwrap();
        assert_eq!(captures.iter().map(|(n, _)| *n).collect_vec(), [1, 2]);
        let frames = classify_captures(&captures, &BTreeMap::new()).unwrap();
        let counts = packet_counts(&frames);
        assert_eq!(counts[&1].sent, 1);
        assert_eq!(counts[&1].received, 1);
        assert_eq!(counts[&1].per_type[&FrameType::Beacon], 2);
        assert_eq!(counts[&2].total(), 1);
        assert_eq!(counts[&2].per_type.get(&FrameType::Beacon), None);
    }

    #[test]
    fn names() {
        assert_eq!(FrameType::Handshake.to_string(), "handshake");
        assert_eq!("received".parse::<Direction>().unwrap(), Direction::Received);
    }
}
