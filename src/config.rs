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
//! Configuration of a parameter sweep, loaded from a JSON file.

use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{
    experiments::sweep::ParameterVector,
    topology::{Node, NodeId},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("The list of {0} must not be empty")]
    EmptyList(&'static str),
    #[error("Error rate {0} is not in [0, 1)")]
    InvalidErrorRate(f64),
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("Only {hosts} hosts configured for {nodes} nodes")]
    NotEnoughHosts { hosts: usize, nodes: usize },
    #[error("Initial vector {0} lies outside of the parameter space")]
    InvalidInitialVector(ParameterVector),
}

/// Everything needed to run a sweep. Passed around explicitly as part of the
/// [`crate::experiments::SweepContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub topology_name: String,
    pub topology_file: PathBuf,
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub key_name: String,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Transmit rate of the application in bytes per second.
    pub tx_rate: f64,
    #[serde(default = "default_fragment_size")]
    pub fragment_size: u64,
    #[serde(default = "default_one")]
    pub num_iterations: usize,
    /// Message sizes in bytes.
    pub message_sizes: Vec<u64>,
    /// Drop probabilities. `0.0` is the baseline without any drop rules.
    pub error_rates: Vec<f64>,
    #[serde(default = "default_one")]
    pub num_source_nodes: usize,
    /// Vector to resume the sweep from.
    #[serde(default)]
    pub initial_vector: ParameterVector,

    #[serde(default = "default_blacklist")]
    pub address_blacklist: Vec<Ipv4Net>,
    #[serde(default = "default_one_u64")]
    pub bucket_width_seconds: u64,
    #[serde(default = "default_startup_grace")]
    pub startup_grace_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_min_poll_timeout")]
    pub min_poll_timeout_seconds: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_instance_ready_timeout")]
    pub instance_ready_timeout_seconds: u64,
    /// Pull the emulator statistics of every node after each successful trial.
    #[serde(default)]
    pub collect_emane_stats: bool,

    pub remote: RemoteLayout,
}

fn default_node_prefix() -> String {
    "node".to_string()
}
fn default_output_root() -> PathBuf {
    PathBuf::from("./stats/events")
}
fn default_fragment_size() -> u64 {
    500_000
}
fn default_one() -> usize {
    1
}
fn default_one_u64() -> u64 {
    1
}
fn default_startup_grace() -> u64 {
    15
}
fn default_poll_interval() -> u64 {
    5
}
fn default_min_poll_timeout() -> f64 {
    25.0
}
fn default_failure_threshold() -> usize {
    5
}
fn default_instance_ready_timeout() -> u64 {
    9999
}
/// Networks that are in use on the fleet's hosts and must not be assigned to any subnet.
pub fn default_blacklist() -> Vec<Ipv4Net> {
    ["10.0.3.0/24", "23.253.107.0/24", "192.168.3.0/24", "127.0.0.0/24"]
        .into_iter()
        .filter_map(|n| n.parse().ok())
        .collect()
}

/// Address blacklist of the sweep configuration at `config`, or the default one without a
/// configuration. Analysing the results of a sweep must use the same blacklist as the sweep
/// itself, or the nodes get different addresses.
pub fn blacklist_of(config: Option<&Path>) -> Result<Vec<Ipv4Net>, ConfigError> {
    Ok(match config {
        Some(path) => SweepConfig::load(path)?.address_blacklist,
        None => default_blacklist(),
    })
}

impl SweepConfig {
    /// Read the configuration from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that would make the sweep meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_sizes.is_empty() {
            return Err(ConfigError::EmptyList("message sizes"));
        }
        if self.error_rates.is_empty() {
            return Err(ConfigError::EmptyList("error rates"));
        }
        if let Some(rate) = self
            .error_rates
            .iter()
            .find(|r| !(0.0..1.0).contains(*r))
        {
            return Err(ConfigError::InvalidErrorRate(*rate));
        }
        if self.fragment_size == 0 {
            return Err(ConfigError::Zero("fragment_size"));
        }
        if self.tx_rate <= 0.0 {
            return Err(ConfigError::Zero("tx_rate"));
        }
        if self.num_iterations == 0 {
            return Err(ConfigError::Zero("num_iterations"));
        }
        if self.num_source_nodes == 0 {
            return Err(ConfigError::Zero("num_source_nodes"));
        }
        if self.bucket_width_seconds == 0 {
            return Err(ConfigError::Zero("bucket_width_seconds"));
        }
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::Zero("poll_interval_seconds"));
        }
        if !self.initial_vector.fits(&self.maxima()) {
            return Err(ConfigError::InvalidInitialVector(self.initial_vector));
        }
        Ok(())
    }

    /// Validate that there is one host for each of the `num_nodes` nodes.
    pub fn validate_hosts(&self, num_nodes: usize) -> Result<(), ConfigError> {
        if self.remote.hosts.len() < num_nodes {
            return Err(ConfigError::NotEnoughHosts {
                hosts: self.remote.hosts.len(),
                nodes: num_nodes,
            });
        }
        Ok(())
    }

    /// Per-dimension maxima of the parameter space.
    pub fn maxima(&self) -> [usize; 4] {
        [
            self.num_iterations,
            self.num_source_nodes,
            self.message_sizes.len(),
            self.error_rates.len(),
        ]
    }

    /// Output directory of the whole trial group.
    pub fn group_dir(&self) -> PathBuf {
        self.output_root.join(&self.topology_name)
    }
}

/// File names of the emulator statistics dumps.
pub const EMANE_SHOW: &str = "emane.show";
pub const EMANE_STATS: &str = "emane.stats";
pub const EMANE_TABLES: &str = "emane.tables";

/// How much of the application directory a clean removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CleanLevel {
    /// Between trials: keep binaries, configuration and certificates.
    Trial,
    /// On re-setup: keep only binaries and configuration.
    Full,
}

/// Locations on the remote nodes, and the commands built from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLayout {
    pub user: String,
    /// One SSH host per node. The host of node `n` is `hosts[n - 1]`.
    pub hosts: Vec<String>,
    pub app_dir: String,
    pub topology_dir: String,
    #[serde(default = "default_app_jar")]
    pub app_jar: String,
    #[serde(default = "default_sender_jar")]
    pub sender_jar: String,
    #[serde(default = "default_app_config_file")]
    pub app_config_file: String,
    /// Local copy of the application configuration. Pushed to `<app_dir>/<app_config_file>`.
    #[serde(default = "default_local_app_config")]
    pub local_app_config: PathBuf,
    pub result_db_path: String,
    /// Command that materializes the result database before it is pulled, if any.
    #[serde(default)]
    pub result_db_export: Option<String>,
    #[serde(default = "default_capture_path")]
    pub capture_path: String,
    #[serde(default = "default_capture_interface")]
    pub capture_interface: String,
    #[serde(default = "default_message_prefix")]
    pub message_prefix: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_alive_probe")]
    pub alive_probe: String,
}

fn default_app_jar() -> String {
    "jvine.jar".to_string()
}
fn default_sender_jar() -> String {
    "gvapp.jar".to_string()
}
fn default_app_config_file() -> String {
    "gvine.conf.json".to_string()
}
fn default_local_app_config() -> PathBuf {
    PathBuf::from("./autotestfiles/gvine.conf.json")
}
fn default_capture_path() -> String {
    "/tmp/radiosweep.pcap".to_string()
}
fn default_capture_interface() -> String {
    "any".to_string()
}
fn default_message_prefix() -> String {
    "autotestmsg".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_alive_probe() -> String {
    "true".to_string()
}

impl RemoteLayout {
    /// SSH host of a node.
    pub fn host(&self, node: NodeId) -> Option<&str> {
        let idx = usize::try_from(node).ok()?.checked_sub(1)?;
        self.hosts.get(idx).map(String::as_str)
    }

    pub fn remote_app_config(&self) -> String {
        format!("{}/{}", self.app_dir, self.app_config_file)
    }

    pub fn start_emulator(&self) -> String {
        format!("cd {} && sudo ./emane_start.sh", self.topology_dir)
    }

    pub fn start_capture(&self) -> String {
        format!(
            "sudo nohup tcpdump -i {} -n udp -w {} > /dev/null 2>&1 &",
            self.capture_interface, self.capture_path
        )
    }

    pub fn start_application(&self, node: &Node) -> String {
        format!(
            "cd {dir} && java -jar {jar} {name} 500 >> log_{name}.txt 2>&1 &",
            dir = self.app_dir,
            jar = self.app_jar,
            name = node.name()
        )
    }

    /// Stops the application, the capture and the emulator. Every part runs even if a previous
    /// one fails.
    pub fn stop(&self) -> String {
        format!(
            "sudo pkill java; sudo pkill tcpdump; cd {} && sudo ./emane_stop.sh",
            self.topology_dir
        )
    }

    pub fn clean(&self, level: CleanLevel) -> String {
        let keep = match level {
            CleanLevel::Trial => "-I '*.jar' -I '*.json' -I '*.cer' -I '*pki.db*'",
            CleanLevel::Full => "-I '*.jar' -I '*.json'",
        };
        format!(
            "cd {} && rm -rf $(ls {keep}); rm -f {}",
            self.app_dir, self.capture_path
        )
    }

    /// Exits with 0 iff the node has received the message `trial_name`.
    pub fn receipt_probe(&self, trial_name: &str) -> String {
        format!("ls {}/data/{trial_name}", self.app_dir)
    }

    /// Creates a random file of `size` bytes and hands it to the application for sending.
    pub fn inject_message(&self, trial_name: &str, size: u64, sender: NodeId) -> String {
        format!(
            "cd {dir} && head -c {size} /dev/urandom > {trial_name} && java -jar {jar} file {trial_name} {sender}",
            dir = self.app_dir,
            jar = self.sender_jar,
        )
    }

    /// Remote directory into which the emulator statistics are written.
    pub fn emane_stats_dir(&self) -> String {
        format!("{}/data/stats", self.topology_dir)
    }

    /// Dumps the configuration, the statistics and the statistic tables of the emulator instance
    /// of `node` into [`Self::emane_stats_dir`].
    pub fn generate_emane_stats(&self, node: &Node) -> String {
        let dir = self.emane_stats_dir();
        let name = node.name();
        format!(
            "mkdir -p {dir} && emanesh {name} show > {dir}/{EMANE_SHOW}; \
             emanesh {name} get stat '*' all > {dir}/{EMANE_STATS}; \
             emanesh {name} get table '*' all > {dir}/{EMANE_TABLES}"
        )
    }
}
