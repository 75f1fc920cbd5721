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
use std::{collections::BTreeMap, fs::File, path::PathBuf};

use clap::Parser;
use itertools::Itertools;

use radiosweep::{
    config::blacklist_of,
    consolidation::{
        consolidate,
        delays::{normalize_by_hops, read_delays, DelayColumns},
        emane::{read_node_stats, sum_stat},
    },
    serde_generic_hashmap::SerializeMap,
    topology::TopologyGraph,
    util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Directory containing the pulled node databases (`eventsql<N>.db`).
    #[arg(short, long, default_value = "./nodedata/")]
    input: PathBuf,
    /// Directory into which the consolidated database is written.
    #[arg(short, long, default_value = "./")]
    output: PathBuf,
    /// Keep the node databases after merging them.
    #[arg(short, long)]
    keep_inputs: bool,
    /// Print the delay of every message at every node.
    #[arg(short, long)]
    delays: bool,
    /// Topology used to normalize the delays by the hop distance to the sender.
    #[arg(short, long)]
    topology: Option<PathBuf>,
    /// Sender of the messages, used together with `--topology`.
    #[arg(short, long, default_value_t = 1)]
    sender: u32,
    /// Also write the delays as JSON, keyed by `(message, node)`.
    #[arg(short, long)]
    json: Option<PathBuf>,
    /// Sweep configuration whose address blacklist is used to resolve the topology.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory with the pulled emulator statistics (`node<N>.stats`) of the trial.
    #[arg(long)]
    emane_stats: Option<PathBuf>,
    /// Emulator counters to sum up per node.
    #[arg(long, default_value = "numUpstreamPacketsBroadcastRx")]
    stat_term: String,
    /// Emulator layer of the summed counters. All layers if empty.
    #[arg(long, default_value = "phy")]
    stat_layer: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();

    let args = Args::parse();
    let report = consolidate(&args.input, &args.output, !args.keep_inputs)?;
    println!(
        "{}: {} tables, {} rows inserted, {} duplicates skipped",
        report.output.display(),
        report.tables,
        report.inserted,
        report.skipped
    );

    if args.delays || args.json.is_some() {
        let mut delays = read_delays(&report.output, DelayColumns::default())?;
        if let Some(topology) = args.topology {
            let graph = TopologyGraph::load(topology, &blacklist_of(args.config.as_deref())?)?;
            delays = normalize_by_hops(&delays, &graph, args.sender);
        }
        if let Some(path) = &args.json {
            let flat: BTreeMap<(String, u32), f64> = delays
                .iter()
                .flat_map(|(message, per_node)| {
                    per_node
                        .iter()
                        .map(move |(node, delay)| ((message.clone(), *node), *delay))
                })
                .collect();
            serde_json::to_writer_pretty(File::create(path)?, &SerializeMap::from(flat))?;
        }
        for (message, per_node) in delays.iter().filter(|_| args.delays) {
            println!(
                "{message}: {}",
                per_node
                    .iter()
                    .map(|(node, delay)| format!("node{node}={delay:.1}"))
                    .join(", ")
            );
        }
    }

    if let Some(dir) = &args.emane_stats {
        let layer = Some(args.stat_layer.as_str()).filter(|l| !l.is_empty());
        for (node, stats) in read_node_stats(dir)? {
            println!("node{node}: {} = {}", args.stat_term, sum_stat(&stats, &args.stat_term, layer));
        }
    }
    Ok(())
}
