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
//! Executes the trials of a sweep, one parameter vector at a time.

use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use indicatif::ProgressBar;
use itertools::Itertools;
use tokio::task::JoinHandle;

use super::{
    app_config::AppConfigArtifact,
    error_rate::{error_rate_commands, ErrorRateAction},
    poller::CompletionPoller,
    supervisor::{Trial, TrialStatus},
    sweep::{Advance, ParameterSweepEnumerator, ParameterVector},
    SweepContext,
};
use crate::{
    config::{CleanLevel, EMANE_STATS},
    consolidation::{consolidate, ConsolidationError, MergeReport},
    records::{TrialLog, TrialOutcome, TrialParameters, TrialRecord},
    remote::{broadcast, broadcast_command, broadcast_file, Participant, RemoteError, Stopper},
    timing_model::estimate_hop_time,
    topology::NodeId,
    util::PathBufExt,
};

/// Directory of a trial into which the node databases are pulled.
pub const NODE_DATA_DIR: &str = "nodedata";
/// Directory of a trial into which the captures are pulled.
pub const DUMPS_DIR: &str = "dumps";
/// Local directory (inside the group directory) holding the written topology artifacts.
pub const TOPOLOGY_DIR: &str = "topology";
/// Directory of a trial into which the emulator statistics are pulled.
pub const EMANE_STATS_DIR: &str = "emane";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TrialState {
    Idle,
    Preparing,
    Starting,
    Injecting,
    Polling,
    Stopping,
    Collecting,
    CleaningUp,
    Advancing,
    SweepComplete,
}

#[derive(Debug, thiserror::Error)]
pub enum TrialError {
    #[error("Remote Error: {0}")]
    Remote(#[from] RemoteError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("The instances did not become ready in time")]
    InstancesNotReady,
    #[error("Sender node{0} is not part of the topology")]
    UnknownSender(NodeId),
}

/// Timeout of the polling phase: the estimated hop time over `num_subnets + 2` hops, inflated by
/// the expected retransmissions, but never less than `min_seconds`.
pub fn poll_timeout(hop_seconds: f64, num_subnets: usize, error_rate: f64, min_seconds: f64) -> Duration {
    let seconds = hop_seconds * (num_subnets + 2) as f64 / (1.0 - error_rate);
    Duration::from_secs_f64(seconds.max(min_seconds))
}

fn first_error<T>(results: Vec<(NodeId, Result<T, RemoteError>)>) -> Result<(), RemoteError> {
    for (node, result) in results {
        if let Err(e) = result {
            log::warn!("[node{node}] {e}");
            return Err(e);
        }
    }
    Ok(())
}

fn check_status(results: Vec<(NodeId, Result<i32, RemoteError>)>, what: &str) {
    for (node, result) in results {
        match result {
            Ok(0) => {}
            Ok(status) => log::debug!("[node{node}] {what} exited with status {status}"),
            Err(e) => log::debug!("[node{node}] {what} failed: {e}"),
        }
    }
}

pub struct TrialRunner {
    ctx: Arc<SweepContext>,
    enumerator: ParameterSweepEnumerator,
    state: TrialState,
    trial_counter: usize,
    /// Error rate of the drop rules currently installed on the fleet.
    applied_error_rate: f64,
    app_config: AppConfigArtifact,
    poller: CompletionPoller,
    trial_log: TrialLog,
    consolidation: Option<JoinHandle<Result<MergeReport, ConsolidationError>>>,
    progress: Option<ProgressBar>,
}

impl TrialRunner {
    pub fn new(ctx: Arc<SweepContext>) -> Result<Self, TrialError> {
        let config = &ctx.config;
        let enumerator = ParameterSweepEnumerator::starting_at(config.maxima(), config.initial_vector);
        let app_config = AppConfigArtifact::load(&config.remote.local_app_config)?;
        let poller = CompletionPoller::new(
            ctx.executor.clone(),
            Duration::from_secs(config.poll_interval_seconds),
        );
        let trial_log = TrialLog::create(config.group_dir())?;
        log::info!("Logging all trials to {:?}", trial_log.path());
        Ok(Self {
            ctx,
            enumerator,
            state: TrialState::Idle,
            trial_counter: 0,
            applied_error_rate: 0.0,
            app_config,
            poller,
            trial_log,
            consolidation: None,
            progress: None,
        })
    }

    /// Report the progress of the sweep on `bar`.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        bar.set_length(self.enumerator.total() as u64);
        bar.set_position(self.enumerator.position() as u64);
        self.progress = Some(bar);
        self
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn current(&self) -> ParameterVector {
        self.enumerator.current()
    }

    pub fn trial_counter(&self) -> usize {
        self.trial_counter
    }

    pub fn trial_log_path(&self) -> &Path {
        self.trial_log.path()
    }

    fn transition(&mut self, state: TrialState) {
        self.state = state;
        log::info!("{} {state}", self.enumerator.current());
    }

    /// Concrete parameters of the current vector.
    pub fn parameters(&self) -> TrialParameters {
        let vector = self.enumerator.current();
        let config = &self.ctx.config;
        TrialParameters {
            vector,
            sender: vector.source_node() as NodeId + 1,
            message_size: config.message_sizes[vector.message_size_index()],
            error_rate: config.error_rates[vector.error_rate_index()],
            topology: config.topology_name.clone(),
        }
    }

    /// Prepare the fleet from scratch: wait for all instances, stop and clean everything, push the
    /// topology and the application configuration.
    pub async fn setup(&mut self) -> Result<(), TrialError> {
        let config = &self.ctx.config;
        let participants = self.ctx.participants();
        log::info!(
            "Setting up {} nodes for topology {}",
            participants.len(),
            config.topology_name
        );

        let provisioner = &self.ctx.provisioner;
        let count = self.ctx.graph.num_nodes();
        let timeout = Duration::from_secs(config.instance_ready_timeout_seconds);
        if !provisioner
            .ensure_instances_ready(&config.node_prefix, count, timeout)
            .await
        {
            log::warn!("Instances are not ready, creating {count} new ones");
            if let Err(e) = provisioner
                .create_instances(count, &config.image_name, &config.key_name, &config.node_prefix)
                .await
            {
                log::error!("Cannot create instances: {e}");
                return Err(TrialError::InstancesNotReady);
            }
            if !provisioner
                .ensure_instances_ready(&config.node_prefix, count, timeout)
                .await
            {
                return Err(TrialError::InstancesNotReady);
            }
        }

        self.stopper().stop_all().await;
        check_status(
            broadcast_command(&self.ctx.executor, &participants, |_| {
                config.remote.clean(CleanLevel::Full)
            })
            .await,
            "clean",
        );

        let topology_dir = config.group_dir().then(TOPOLOGY_DIR);
        for file in self.ctx.topology_writer.write(&self.ctx.graph, &topology_dir)? {
            let Some(name) = file.file_name() else {
                continue;
            };
            let remote = format!("{}/{}", config.remote.topology_dir, name.to_string_lossy());
            first_error(broadcast_file(&self.ctx.executor, &participants, &file, &remote).await)?;
        }

        self.app_config.set_tx_rate(config.tx_rate);
        self.app_config.set_fragment_size(config.fragment_size);
        self.app_config.save()?;
        first_error(
            broadcast_file(
                &self.ctx.executor,
                &participants,
                self.app_config.path(),
                &config.remote.remote_app_config(),
            )
            .await,
        )?;
        Ok(())
    }

    /// Install (or remove) the drop rules of `rate` on every node.
    async fn apply_error_rate(&self, rate: f64, action: ErrorRateAction) -> Result<(), RemoteError> {
        let mut per_node: BTreeMap<NodeId, Vec<String>> = BTreeMap::new();
        for cmd in error_rate_commands(&self.ctx.graph, rate, action) {
            per_node.entry(cmd.node_id).or_default().push(cmd.command());
        }
        let participants = self
            .ctx
            .participants()
            .into_iter()
            .filter(|p| per_node.contains_key(&p.node))
            .collect_vec();
        let results = broadcast_command(&self.ctx.executor, &participants, |p| {
            per_node
                .get(&p.node)
                .map(|cmds| cmds.join("; "))
                .unwrap_or_default()
        })
        .await;
        for (node, result) in results {
            let status = result?;
            if status != 0 {
                return Err(RemoteError::CommandFailed {
                    host: format!("node{node}"),
                    command: format!("iptables {action} (rate {rate})"),
                    status,
                    stderr: String::new(),
                });
            }
        }
        Ok(())
    }

    async fn prepare(&mut self, params: &TrialParameters, participants: &[Participant]) -> Result<(), TrialError> {
        let rate = params.error_rate;
        if rate != self.applied_error_rate {
            let previous = self.applied_error_rate;
            if previous != 0.0 {
                if let Err(e) = self.apply_error_rate(previous, ErrorRateAction::Remove).await {
                    log::warn!("Cannot remove all drop rules of rate {previous}: {e}");
                }
                self.applied_error_rate = 0.0;
            }
            if rate != 0.0 {
                if let Err(e) = self.apply_error_rate(rate, ErrorRateAction::Add).await {
                    // some nodes may already carry the new rules
                    if let Err(e) = self.apply_error_rate(rate, ErrorRateAction::Remove).await {
                        log::warn!("Cannot roll back the drop rules of rate {rate}: {e}");
                    }
                    return Err(e.into());
                }
            }
            self.applied_error_rate = rate;
        }

        if self.app_config.set_fragment_size(self.ctx.config.fragment_size) {
            self.app_config.save()?;
            first_error(
                broadcast_file(
                    &self.ctx.executor,
                    participants,
                    self.app_config.path(),
                    &self.ctx.config.remote.remote_app_config(),
                )
                .await,
            )?;
        }
        Ok(())
    }

    /// Start emulator, capture and application on every participant. Failures only show up later
    /// as missing receipts.
    async fn start(&self, participants: &[Participant]) {
        let remote = &self.ctx.config.remote;
        let graph = &self.ctx.graph;
        let results = broadcast_command(&self.ctx.executor, participants, |p| {
            let app = graph
                .node(p.node)
                .map(|n| remote.start_application(n))
                .unwrap_or_default();
            format!("{}; {}; {app}", remote.start_emulator(), remote.start_capture())
        })
        .await;
        check_status(results, "start");
        tokio::time::sleep(Duration::from_secs(self.ctx.config.startup_grace_seconds)).await;
    }

    /// Pull the result database and the capture of every participant into the trial directory,
    /// and start consolidating the databases in the background.
    async fn collect(
        &mut self,
        trial_name: &str,
        participants: &[Participant],
    ) -> Result<(), TrialError> {
        let remote = &self.ctx.config.remote;
        let trial_dir = self.ctx.config.group_dir().then(trial_name);
        let node_data = trial_dir.as_path().then(NODE_DATA_DIR);
        let dumps = trial_dir.as_path().then(DUMPS_DIR);
        std::fs::create_dir_all(&node_data)?;
        std::fs::create_dir_all(&dumps)?;

        if let Some(export) = &remote.result_db_export {
            check_status(
                broadcast_command(&self.ctx.executor, participants, |_| export.clone()).await,
                "export",
            );
        }

        let db_pulls = self
            .pull_all(participants, &node_data, &remote.result_db_path, |n| {
                format!("eventsql{n}.db")
            })
            .await;
        for (node, result) in db_pulls {
            if let Err(e) = result {
                log::warn!("[node{node}] cannot pull the result database: {e}");
            }
        }
        let capture_pulls = self
            .pull_all(participants, &dumps, &remote.capture_path, |n| format!("node{n}.pcap"))
            .await;
        for (node, result) in capture_pulls {
            if let Err(e) = result {
                log::debug!("[node{node}] cannot pull the capture: {e}");
            }
        }

        if self.ctx.config.collect_emane_stats {
            let graph = &self.ctx.graph;
            check_status(
                broadcast_command(&self.ctx.executor, participants, |p| {
                    graph
                        .node(p.node)
                        .map(|n| remote.generate_emane_stats(n))
                        .unwrap_or_default()
                })
                .await,
                "emane stats",
            );
            let stats_dir = trial_dir.as_path().then(EMANE_STATS_DIR);
            std::fs::create_dir_all(&stats_dir)?;
            let remote_stats = format!("{}/{EMANE_STATS}", remote.emane_stats_dir());
            let stats_pulls = self
                .pull_all(participants, &stats_dir, &remote_stats, |n| format!("node{n}.stats"))
                .await;
            for (node, result) in stats_pulls {
                if let Err(e) = result {
                    log::debug!("[node{node}] cannot pull the emulator statistics: {e}");
                }
            }
        }

        self.await_consolidation().await;
        self.consolidation = Some(tokio::task::spawn_blocking(move || {
            consolidate(node_data, trial_dir, true)
        }));
        Ok(())
    }

    /// Pull `remote_path` from every participant into `local_dir`, named by `name`.
    async fn pull_all(
        &self,
        participants: &[Participant],
        local_dir: &Path,
        remote_path: &str,
        name: fn(NodeId) -> String,
    ) -> Vec<(NodeId, Result<(), RemoteError>)> {
        broadcast(participants, |p| {
            let executor = self.ctx.executor.clone();
            let local = local_dir.join(name(p.node));
            let remote_path = remote_path.to_string();
            async move { executor.pull_file(&p.host, &remote_path, &local).await }
        })
        .await
    }

    /// Wait for the consolidation of the previous trial, if any.
    async fn await_consolidation(&mut self) {
        let Some(handle) = self.consolidation.take() else {
            return;
        };
        match handle.await {
            Ok(Ok(report)) => log::debug!(
                "{:?}: {} tables, {} rows",
                report.output,
                report.tables,
                report.inserted
            ),
            Ok(Err(e)) => log::error!("Consolidation failed: {e}"),
            Err(e) => log::error!("Consolidation task failed: {e}"),
        }
    }

    /// Execute the trial of the current parameter vector, and advance to the next vector if it
    /// succeeded.
    pub async fn run_trial(&mut self) -> Result<TrialStatus, TrialError> {
        let ctx = self.ctx.clone();
        let config = &ctx.config;
        let params = self.parameters();
        let participants = ctx.participants();
        let sender = ctx
            .participant(params.sender)
            .ok_or(TrialError::UnknownSender(params.sender))?;
        log::info!("Trial {}: {params}", self.trial_counter);

        self.transition(TrialState::Preparing);
        self.prepare(&params, &participants).await?;

        self.transition(TrialState::Starting);
        self.start(&participants).await;

        self.transition(TrialState::Injecting);
        let trial_name = format!(
            "{}_{}_{}",
            config.remote.message_prefix, params.sender, self.trial_counter
        );
        self.trial_counter += 1;
        let command = config
            .remote
            .inject_message(&trial_name, params.message_size, params.sender);
        let status = ctx.executor.execute(&sender.host, &command).await?;
        if status != 0 {
            return Err(RemoteError::CommandFailed {
                host: sender.host,
                command,
                status,
                stderr: String::new(),
            }
            .into());
        }

        self.transition(TrialState::Polling);
        let estimate = estimate_hop_time(config.tx_rate, params.message_size, config.fragment_size);
        let timeout = poll_timeout(
            estimate.seconds,
            ctx.graph.num_subnets(),
            params.error_rate,
            config.min_poll_timeout_seconds,
        );
        log::debug!("{trial_name}: waiting at most {timeout:.0?}");
        let poll = self
            .poller
            .await_completion(
                &trial_name,
                &config.remote.receipt_probe(&trial_name),
                &participants,
                params.sender,
                timeout,
            )
            .await;

        self.transition(TrialState::Stopping);
        self.stopper().stop_all().await;

        let outcome = TrialOutcome {
            vector: params.vector,
            trial_name: trial_name.clone(),
            success: poll.success,
            elapsed_wait_seconds: poll.elapsed.as_secs_f64(),
            receipts: poll.receipts,
        };
        self.trial_log.write(&TrialRecord {
            params: &params,
            outcome: &outcome,
            timeout_seconds: timeout.as_secs_f64(),
            hop_time_validated: estimate.validated,
        })?;

        params.write_params(config.group_dir().then(&trial_name))?;

        if outcome.success {
            self.transition(TrialState::Collecting);
            self.collect(&trial_name, &participants).await?;
        } else {
            log::warn!(
                "{trial_name} timed out after {:.1}s ({} of {} nodes confirmed)",
                outcome.elapsed_wait_seconds,
                outcome.receipts.values().filter(|x| **x).count(),
                outcome.receipts.len()
            );
        }

        self.transition(TrialState::CleaningUp);
        check_status(
            broadcast_command(&ctx.executor, &participants, |_| {
                config.remote.clean(CleanLevel::Trial)
            })
            .await,
            "clean",
        );

        if !outcome.success {
            return Ok(TrialStatus::Failed);
        }

        self.transition(TrialState::Advancing);
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
        match self.enumerator.advance() {
            Advance::Next => Ok(TrialStatus::Advanced),
            Advance::Complete => {
                self.finish().await;
                Ok(TrialStatus::SweepComplete)
            }
        }
    }

    /// Wait for the last consolidation and mark the sweep as complete.
    pub async fn finish(&mut self) {
        self.await_consolidation().await;
        if let Some(bar) = &self.progress {
            bar.finish_with_message("done");
        }
        self.transition(TrialState::SweepComplete);
        log::info!("All trials are recorded in {:?}", self.trial_log.path());
    }
}

#[async_trait]
impl Trial for TrialRunner {
    async fn setup(&mut self) -> Result<(), TrialError> {
        TrialRunner::setup(self).await
    }

    async fn run(&mut self) -> Result<TrialStatus, TrialError> {
        let result = self.run_trial().await;
        if result.is_err() {
            // leave nothing running behind before the trial is retried
            self.stopper().stop_all().await;
        }
        result
    }

    fn stopper(&self) -> Stopper {
        Stopper::new(
            self.ctx.executor.clone(),
            self.ctx.participants(),
            self.ctx.config.remote.stop(),
        )
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{
        config::{test::example_config, SweepConfig},
        remote::{
            fleet::StaticFleet, test::MockExecutor, JsonTopologyWriter, Provisioner, RemoteExecutor,
        },
        topology::{NodeDescription, Subnet, TopologyFile, TopologyGraph},
    };

    pub(crate) fn line_graph() -> TopologyGraph {
        let subnet = |number, members: &[u32]| Subnet {
            number,
            name: String::new(),
            members: members.to_vec(),
            address: None,
        };
        TopologyGraph::build(
            TopologyFile {
                subnets: vec![subnet(1, &[1, 2]), subnet(2, &[2, 3])],
                nodes: (1..=3).map(|number| NodeDescription { number }).collect(),
            },
            &[],
        )
        .unwrap()
    }

    pub(crate) fn test_config(dir: &Path) -> SweepConfig {
        let mut config = example_config();
        config.output_root = dir.join("out");
        config.num_iterations = 1;
        config.message_sizes = vec![1000];
        config.error_rates = vec![0.0, 0.25];
        config.remote.hosts = vec!["host1".into(), "host2".into(), "host3".into()];
        config.remote.local_app_config = dir.join("gvine.conf.json");
        config
    }

    pub(crate) fn context(config: SweepConfig, executor: Arc<MockExecutor>) -> Arc<SweepContext> {
        let hosts = config.remote.hosts.clone();
        let executor: Arc<dyn RemoteExecutor> = executor;
        Arc::new(
            SweepContext::new(
                config,
                line_graph(),
                executor.clone(),
                Arc::new(StaticFleet::new(executor, hosts)),
                Arc::new(JsonTopologyWriter),
            )
            .unwrap(),
        )
    }

    #[test]
    fn timeout_is_floored() {
        assert_eq!(poll_timeout(1.0, 2, 0.0, 25.0), Duration::from_secs(25));
        assert_eq!(poll_timeout(10.0, 3, 0.5, 25.0), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn whole_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockExecutor::ok());
        let ctx = context(test_config(dir.path()), mock.clone());
        let mut runner = TrialRunner::new(ctx.clone()).unwrap();

        runner.setup().await.unwrap();
        // topology and application config on every node
        assert_eq!(mock.pushed.load(std::sync::atomic::Ordering::SeqCst), 6);

        assert_eq!(runner.run_trial().await.unwrap(), TrialStatus::Advanced);
        assert_eq!(runner.current(), ParameterVector::new([0, 0, 0, 1]));
        assert_eq!(mock.count_matching("iptables"), 0);

        assert_eq!(runner.run_trial().await.unwrap(), TrialStatus::SweepComplete);
        assert_eq!(runner.state(), TrialState::SweepComplete);
        assert!(runner.current().is_zero());
        // four directed links of the line
        assert_eq!(mock.occurrences("iptables -A"), 4);
        assert_eq!(mock.occurrences("iptables -D"), 0);

        assert_eq!(mock.commands_on("host1").iter().filter(|c| c.contains("gvapp.jar file")).count(), 2);
        assert_eq!(mock.count_matching("autotestmsg_1_0"), 3);
        let group = ctx.config.group_dir();
        assert!(group.join("autotestmsg_1_0").join("params").exists());
        assert!(group.join("autotestmsg_1_1").join("params").exists());
        // database and capture of three nodes, twice
        assert_eq!(mock.pulled.lock().unwrap().len(), 12);
        assert!(mock
            .pulled
            .lock()
            .unwrap()
            .iter()
            .any(|(host, _, local)| host == "host3" && local.ends_with("nodedata/eventsql3.db")));

        let log = std::fs::read_to_string(runner.trial_log_path()).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_is_not_advanced() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockExecutor::new(|host, command| {
            Ok(if host == "host3" && command.contains("/data/") { 2 } else { 0 })
        }));
        let ctx = context(test_config(dir.path()), mock.clone());
        let mut runner = TrialRunner::new(ctx.clone()).unwrap();

        assert_eq!(runner.run_trial().await.unwrap(), TrialStatus::Failed);
        assert_eq!(runner.current(), ParameterVector::new([0, 0, 0, 0]));
        assert_eq!(runner.trial_counter(), 1);
        assert!(mock.pulled.lock().unwrap().is_empty());
        // the parameters are recorded even though nothing was collected
        let trial_dir = ctx.config.group_dir().join("autotestmsg_1_0");
        assert!(trial_dir.join("params").exists());
        assert!(!trial_dir.join(NODE_DATA_DIR).exists());
        // stopped and cleaned regardless
        assert_eq!(mock.count_matching("pkill java"), 3);
        assert_eq!(mock.count_matching("-I '*.cer'"), 3);

        // the retry uses a new name
        assert_eq!(runner.run_trial().await.unwrap(), TrialStatus::Failed);
        assert_eq!(mock.count_matching("file autotestmsg_1_1 1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_error_rate_removes_previous_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.error_rates = vec![0.1, 0.2];
        let mock = Arc::new(MockExecutor::ok());
        let mut runner = TrialRunner::new(context(config, mock.clone())).unwrap();

        runner.run_trial().await.unwrap();
        assert_eq!(mock.occurrences("-A INPUT"), 4);
        assert_eq!(mock.occurrences("-D INPUT"), 0);
        runner.run_trial().await.unwrap();
        assert_eq!(mock.occurrences("--probability 0.1 -j DROP"), 8);
        assert_eq!(mock.occurrences("--probability 0.2 -j DROP"), 4);
        // node2 reaches node1 over emane0 and node3 over emane1
        assert_eq!(mock.occurrences("-D INPUT -i emane0"), 3);
        assert_eq!(mock.occurrences("-D INPUT -i emane1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partially_added_rules_are_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.error_rates = vec![0.1];
        let failed = AtomicBool::new(false);
        // host2 fails to install its rules once
        let mock = Arc::new(MockExecutor::new(move |host, command| {
            if host == "host2" && command.contains("-A INPUT") && !failed.swap(true, Ordering::SeqCst) {
                Ok(1)
            } else {
                Ok(0)
            }
        }));
        let ctx = context(config, mock.clone());
        let mut runner = TrialRunner::new(ctx.clone()).unwrap();

        assert!(matches!(runner.run_trial().await, Err(TrialError::Remote(_))));
        assert_eq!(runner.run_trial().await.unwrap(), TrialStatus::SweepComplete);

        // every node ends up with exactly one rule per link
        for node in ctx.graph.nodes() {
            let host = format!("host{}", node.id);
            let count = |pattern: &str| {
                mock.commands_on(&host)
                    .iter()
                    .map(|c| c.matches(pattern).count())
                    .sum::<usize>()
            };
            assert_eq!(
                count("-A INPUT") - count("-D INPUT"),
                ctx.graph.links(node.id).len(),
                "{host}"
            );
        }
    }

    /// Provisioner whose instances only become ready once they were created.
    struct EmptyFleet {
        created: AtomicUsize,
        can_create: bool,
    }

    #[async_trait]
    impl Provisioner for EmptyFleet {
        async fn ensure_instances_ready(&self, _: &str, _: usize, _: Duration) -> bool {
            self.created.load(Ordering::SeqCst) > 0
        }

        async fn create_instances(
            &self,
            count: usize,
            image: &str,
            key_name: &str,
            prefix: &str,
        ) -> Result<(), RemoteError> {
            if !self.can_create {
                return Err(RemoteError::Unsupported("no quota left"));
            }
            assert_eq!((count, image, key_name, prefix), (3, "emane-image", "sweep-key", "node"));
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn setup_creates_missing_instances() {
        for can_create in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let mut config = test_config(dir.path());
            config.image_name = "emane-image".into();
            config.key_name = "sweep-key".into();
            let fleet = Arc::new(EmptyFleet {
                created: AtomicUsize::new(0),
                can_create,
            });
            let executor: Arc<dyn RemoteExecutor> = Arc::new(MockExecutor::ok());
            let ctx = Arc::new(
                SweepContext::new(config, line_graph(), executor, fleet.clone(), Arc::new(JsonTopologyWriter))
                    .unwrap(),
            );
            let mut runner = TrialRunner::new(ctx).unwrap();
            let result = runner.setup().await;
            if can_create {
                result.unwrap();
                assert_eq!(fleet.created.load(Ordering::SeqCst), 1);
            } else {
                assert!(matches!(result, Err(TrialError::InstancesNotReady)));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emulator_statistics_are_pulled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.collect_emane_stats = true;
        let mock = Arc::new(MockExecutor::ok());
        let ctx = context(config, mock.clone());
        let mut runner = TrialRunner::new(ctx.clone()).unwrap();

        assert_eq!(runner.run_trial().await.unwrap(), TrialStatus::Advanced);
        assert_eq!(mock.count_matching("emanesh node2 get stat '*' all"), 1);
        let pulled = mock.pulled.lock().unwrap();
        assert!(pulled.iter().any(|(host, remote, local)| host == "host2"
            && remote.ends_with("data/stats/emane.stats")
            && local.ends_with("autotestmsg_1_0/emane/node2.stats")));
    }
}
