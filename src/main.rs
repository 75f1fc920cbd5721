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
use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use radiosweep::{
    config::SweepConfig,
    experiments::{FailureSupervisor, ParameterVector, SweepContext, SweepError, TrialRunner},
    remote::{JsonTopologyWriter, RemoteExecutor, SshExecutor, StaticFleet},
    topology::TopologyGraph,
    util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Sweep configuration (JSON).
    #[arg(short, long, default_value = "./sweep.json")]
    config: PathBuf,
    /// Overwrite the output root of the configuration.
    #[arg(short, long)]
    output_root: Option<PathBuf>,
    /// Overwrite the topology file of the configuration.
    #[arg(short, long)]
    topology: Option<PathBuf>,
    /// Resume the sweep at the given vector, e.g., `0,1,2,0`.
    #[arg(short, long, value_delimiter = ',', num_args = 4)]
    resume: Option<Vec<usize>>,
    /// Number of ssh retries on connection failures.
    #[arg(long, default_value_t = 3)]
    ssh_retries: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = MultiProgress::new();
    util::init_logging_with_progress(&multi);

    let args = Args::parse();
    let mut config = SweepConfig::load(&args.config)?;
    if let Some(output_root) = args.output_root {
        config.output_root = output_root;
    }
    if let Some(topology) = args.topology {
        config.topology_file = topology;
    }
    if let Some(resume) = args.resume {
        let indices: [usize; 4] = resume
            .as_slice()
            .try_into()
            .map_err(|_| format!("--resume needs 4 indices, got {}", resume.len()))?;
        config.initial_vector = ParameterVector::new(indices);
    }
    config.validate()?;

    let graph = TopologyGraph::load(&config.topology_file, &config.address_blacklist)?;
    log::info!(
        "Loaded topology {} with {} nodes in {} subnets",
        config.topology_name,
        graph.num_nodes(),
        graph.num_subnets()
    );

    let executor: Arc<dyn RemoteExecutor> = Arc::new(
        SshExecutor::new(
            &config.remote.user,
            Duration::from_secs(config.remote.connect_timeout_seconds),
        )
        .with_retries(args.ssh_retries),
    );
    let fleet = Arc::new(
        StaticFleet::new(executor.clone(), config.remote.hosts.clone())
            .with_probe(config.remote.alive_probe.clone()),
    );
    let threshold = config.failure_threshold;
    let ctx = Arc::new(SweepContext::new(
        config,
        graph,
        executor,
        fleet,
        Arc::new(JsonTopologyWriter),
    )?);

    let bar = multi.add(ProgressBar::new(0));
    bar.set_style(ProgressStyle::with_template(
        "{wide_bar} {pos}/{len} trials, time: {elapsed}, eta: {eta} {msg}",
    )?);
    let runner = TrialRunner::new(ctx)?.with_progress(bar);

    let mut supervisor = FailureSupervisor::new(runner, threshold);
    match supervisor.run().await {
        Ok(()) => Ok(()),
        Err(SweepError::Interrupted) => {
            log::warn!(
                "Interrupted at {}. Resume with `--resume {}`",
                supervisor.trial().current(),
                supervisor
                    .trial()
                    .current()
                    .indices()
                    .map(|x| x.to_string())
                    .join(",")
            );
            Err(SweepError::Interrupted.into())
        }
        Err(e) => Err(e.into()),
    }
}
