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
use std::{collections::BTreeMap, path::PathBuf};

use clap::Parser;
use itertools::iproduct;
use strum::IntoEnumIterator;

use radiosweep::{
    config::{blacklist_of, SweepConfig},
    consolidation::packets::{
        compare_packet_counts, logged_packet_counts, write_comparison_csv, PacketColumns,
    },
    time_series::{
        bucket, check_width, classify_captures, node_captures, packet_counts, Metric, Owner, View,
    },
    topology::TopologyGraph,
    util::{self, PathBufExt},
};

fn parse_width(s: &str) -> Result<f64, String> {
    let width = s.parse::<f64>().map_err(|e| e.to_string())?;
    check_width(width).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Directory containing one capture per node (`node<N>.pcap` or `node<N>.pcap.gz`).
    #[arg(short, long, default_value = "./dumps/")]
    dumps: PathBuf,
    /// Output directory. Defaults to the capture directory.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Width of a time bucket in seconds. Defaults to the width of the sweep configuration, or
    /// to 1 second.
    #[arg(short, long, value_parser = parse_width)]
    bucket_width: Option<f64>,
    /// Topology with the addresses of every node, e.g., the one written by the sweep. Without it,
    /// a node owns every address ending in its number.
    #[arg(short, long)]
    topology: Option<PathBuf>,
    /// Sweep configuration that produced the captures. Its address blacklist is used to resolve
    /// the topology.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Consolidated database of the same trial. Its logged packet counts are compared against
    /// the captures.
    #[arg(long)]
    compare_db: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();

    let args = Args::parse();
    let output = args.output.unwrap_or_else(|| args.dumps.clone());
    std::fs::create_dir_all(&output)?;

    let config = args.config.as_deref().map(SweepConfig::load).transpose()?;
    let bucket_width = args
        .bucket_width
        .or(config.as_ref().map(|c| c.bucket_width_seconds as f64))
        .unwrap_or(1.0);

    let owners = match &args.topology {
        Some(path) => Owner::from_graph(&TopologyGraph::load(
            path,
            &blacklist_of(args.config.as_deref())?,
        )?),
        None => BTreeMap::new(),
    };

    let captures = node_captures(&args.dumps)?;
    log::info!("Classifying the captures of {} nodes", captures.len());
    let frames = classify_captures(&captures, &owners)?;

    let buckets = bucket(&frames, bucket_width)?;
    buckets.write_json(output.as_path().then("buckets.json"))?;
    for (metric, view) in iproduct!(Metric::iter(), View::iter()) {
        buckets.write_view_csv(output.as_path().then(format!("{metric}_{view}.csv")), metric, view)?;
    }

    let captured = packet_counts(&frames);
    for (node, counts) in &captured {
        println!(
            "node{node}: {} sent, {} received, {}",
            counts.sent,
            counts.received,
            counts
                .per_type
                .iter()
                .map(|(t, n)| format!("{t}: {n}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if let Some(db) = &args.compare_db {
        let logged = logged_packet_counts(db, PacketColumns::default())?;
        let comparison = compare_packet_counts(&logged, &captured);
        for row in comparison.iter().filter(|r| !r.matches()) {
            println!(
                "node{}: {} does not match, logged: {}, captured: {}",
                row.node, row.category, row.logged, row.captured
            );
        }
        println!(
            "{} of {} counters match",
            comparison.iter().filter(|r| r.matches()).count(),
            comparison.len()
        );
        write_comparison_csv(output.as_path().then("packet_comparison.csv"), &comparison)?;
    }
    Ok(())
}
