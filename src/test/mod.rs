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
//! End-to-end scenarios across modules.

use std::{collections::HashSet, sync::Arc, time::Duration};

use rusqlite::Connection;
use tokio::time::Instant;

use crate::{
    consolidation::{test::node_db, NodeDatabase, SchemaUnifier},
    experiments::{
        poller::CompletionPoller,
        runner::test::{context, test_config},
        Advance, FailureSupervisor, ParameterSweepEnumerator, ParameterVector, TrialRunner,
    },
    remote::test::{participants, MockExecutor},
    time_series::{bucket, classify, test::udp_frame, FrameType, Owner},
    topology::{NodeDescription, Subnet, TopologyFile, TopologyGraph},
};
use radiosweep_utils::pcap_utils::{Capture, RawPacket};

#[test]
fn odometer_over_small_space() {
    let mut e = ParameterSweepEnumerator::new([2, 1, 2, 1]);
    let mut seen = HashSet::new();
    seen.insert(e.current());
    let mut completions = 0;
    for _ in 0..4 {
        match e.advance() {
            Advance::Next => assert!(seen.insert(e.current())),
            Advance::Complete => completions += 1,
        }
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(completions, 1);
    assert_eq!(e.current(), ParameterVector::new([0, 0, 0, 0]));
}

#[test]
fn relay_hops() {
    let subnet = |number, members: &[u32]| Subnet {
        number,
        name: format!("subnet{number}"),
        members: members.to_vec(),
        address: None,
    };
    // node1 relays between subnet 1 and subnet 3
    let graph = TopologyGraph::build(
        TopologyFile {
            subnets: vec![subnet(1, &[1, 2]), subnet(2, &[2, 3]), subnet(3, &[1])],
            nodes: (1..=3).map(|number| NodeDescription { number }).collect(),
        },
        &[],
    )
    .unwrap();
    assert_eq!(graph.hops_between_subnets(1, 2), Some(1));
    assert_eq!(graph.hops_between_subnets(1, 3), Some(1));
    assert_eq!(graph.hops_between_subnets(2, 3), Some(2));
    for node in 1..=3 {
        assert_eq!(graph.hops_between_nodes(node, node), Some(0));
    }
}

#[tokio::test(start_paused = true)]
async fn poll_returns_soon_after_receipt() {
    let start = Instant::now();
    let executor = Arc::new(MockExecutor::new(move |_, _| {
        Ok(if start.elapsed() >= Duration::from_secs(12) { 0 } else { 1 })
    }));
    let poller = CompletionPoller::new(executor, Duration::from_secs(5));
    let outcome = poller
        .await_completion("msg", "probe", &participants(5), 3, Duration::from_secs(25))
        .await;
    assert!(outcome.success);
    assert!(outcome.elapsed >= Duration::from_secs(12));
    assert!(outcome.elapsed <= Duration::from_secs(17));
    assert_eq!(outcome.num_confirmed(), 4);
}

#[test]
fn merging_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let schema = "CREATE TABLE events (eventId INTEGER PRIMARY KEY, kind TEXT NOT NULL)";
    let inputs = (1..=3)
        .map(|node| NodeDatabase {
            node,
            path: node_db(
                dir.path(),
                &format!("eventsql{node}.db"),
                schema,
                &[
                    "INSERT INTO events VALUES (1, 'start')",
                    "INSERT INTO events VALUES (2, 'received')",
                ],
            ),
        })
        .collect();
    let output = dir.path().join("consolidated.db");
    let unifier = SchemaUnifier::new(inputs);
    let first = unifier.merge_into(&output).unwrap();
    let count = || -> i64 {
        Connection::open(&output)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap()
    };
    let rows = count();
    assert_eq!(rows, 6);
    let second = unifier.merge_into(&output).unwrap();
    assert_eq!(count(), rows);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, first.inserted);
}

#[test]
fn unknown_frames_never_reach_a_bucket() {
    let capture = Capture {
        datalink: pcap_file::DataLink::ETHERNET,
        packets: [Some(1), Some(7), Some(4), Some(200), None]
            .into_iter()
            .enumerate()
            .map(|(i, tag)| {
                let data = udp_frame([10, 0, 1, 1], tag);
                RawPacket {
                    timestamp: Duration::from_millis(500 * i as u64),
                    orig_len: data.len() as u32,
                    data,
                }
            })
            .collect(),
    };
    let frames = classify(&capture, &Owner::new(1, Vec::new()));
    let buckets = bucket(&frames, 1.0).unwrap();
    let frame_count: u64 = buckets.buckets.values().map(|v| v.frames).sum();
    assert_eq!(frame_count, 2);
    assert!(buckets
        .buckets
        .keys()
        .all(|k| matches!(k.frame_type, FrameType::Beacon | FrameType::Babel)));
}

#[tokio::test(start_paused = true)]
async fn supervised_sweep_recovers_from_failures() {
    let dir = tempfile::tempdir().unwrap();
    // node3 only receives the message of the seventh attempt
    let mock = Arc::new(MockExecutor::new(|host, command| {
        let late = (0..6).any(|i| command.ends_with(&format!("/data/autotestmsg_1_{i}")));
        Ok(if host == "host3" && late { 2 } else { 0 })
    }));
    let mut config = test_config(dir.path());
    config.error_rates = vec![0.0];
    let runner = TrialRunner::new(context(config, mock.clone())).unwrap();
    let mut supervisor = FailureSupervisor::new(runner, 5);
    supervisor.run_until(std::future::pending()).await.unwrap();

    assert_eq!(supervisor.resetups(), 1);
    assert_eq!(supervisor.consecutive_failures(), 0);
    assert_eq!(supervisor.trial().trial_counter(), 7);
    // initial setup and one re-setup
    assert_eq!(mock.count_matching("rm -rf $(ls -I '*.jar' -I '*.json')"), 6);
}
