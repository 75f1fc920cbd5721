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
//! Records written for every trial: the `params` file of a trial directory, and one row per
//! attempt in the CSV trial log of the sweep.
use std::{
    collections::BTreeMap,
    fmt::Display,
    fs::File,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use radiosweep_utils::other::get_timestamp;

use crate::{experiments::sweep::ParameterVector, topology::NodeId, util::PathBufExt};

/// Name of the parameter file in every trial directory.
pub const PARAMS_FILE: &str = "params";

/// Outcome of a single trial attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub vector: ParameterVector,
    pub trial_name: String,
    pub success: bool,
    pub elapsed_wait_seconds: f64,
    pub receipts: BTreeMap<NodeId, bool>,
}

/// Concrete parameters of a trial, derived from its [`ParameterVector`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrialParameters {
    pub vector: ParameterVector,
    /// Sender node (1-based).
    pub sender: NodeId,
    pub message_size: u64,
    pub error_rate: f64,
    pub topology: String,
}

impl TrialParameters {
    /// The five lines of the `params` file.
    pub fn params_lines(&self) -> [String; 5] {
        [
            format!("Iteration: {}", self.vector.iteration() + 1),
            format!("Sender Node: {}", self.sender),
            format!("Msg Size: {}", self.message_size),
            format!("Error Rate: {}", self.error_rate),
            format!("Topology: {}", self.topology),
        ]
    }

    /// Write the `params` file into `dir`, creating the directory if necessary.
    pub fn write_params(&self, dir: impl AsRef<Path>) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(PARAMS_FILE);
        let mut content = self.params_lines().join("\n");
        content.push('\n');
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Display for TrialParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (sender: node{}, message size: {}B, error rate: {})",
            self.vector, self.sender, self.message_size, self.error_rate
        )
    }
}

const RECORD_SIZE: usize = 13;

/// One row of the trial log.
#[derive(Debug, Clone)]
pub struct TrialRecord<'a> {
    pub params: &'a TrialParameters,
    pub outcome: &'a TrialOutcome,
    pub timeout_seconds: f64,
    pub hop_time_validated: bool,
}

impl TrialRecord<'_> {
    pub fn record_title() -> [&'static str; RECORD_SIZE] {
        [
            "iteration",
            "source_node",
            "message_size_index",
            "error_rate_index",
            "trial_name",
            "sender",
            "message_size",
            "error_rate",
            "success",
            "elapsed_wait",
            "confirmed_nodes",
            "timeout",
            "hop_time_validated",
        ]
    }

    pub fn record(&self) -> [String; RECORD_SIZE] {
        let v = self.outcome.vector;
        let o = self.outcome;
        [
            v.iteration().to_string(),                                   // iteration
            v.source_node().to_string(),                                 // source_node
            v.message_size_index().to_string(),                          // message_size_index
            v.error_rate_index().to_string(),                            // error_rate_index
            o.trial_name.clone(),                                        // trial_name
            self.params.sender.to_string(),                              // sender
            self.params.message_size.to_string(),                        // message_size
            self.params.error_rate.to_string(),                          // error_rate
            o.success.to_string(),                                       // success
            format!("{:.3}", o.elapsed_wait_seconds),                    // elapsed_wait
            o.receipts.iter().filter(|(_, r)| **r).map(|(n, _)| n).join(";"), // confirmed_nodes
            format!("{:.3}", self.timeout_seconds),                      // timeout
            self.hop_time_validated.to_string(),                         // hop_time_validated
        ]
    }
}

/// CSV log with one row per trial attempt, flushed after every row.
pub struct TrialLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl TrialLog {
    /// Create `<dir>/trials_<timestamp>.csv` and write the header.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, csv::Error> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().then_ts("trials_{}.csv", &get_timestamp());
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(TrialRecord::record_title())?;
        writer.flush()?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, record: &TrialRecord<'_>) -> Result<(), csv::Error> {
        self.writer.write_record(record.record())?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> TrialParameters {
        TrialParameters {
            vector: ParameterVector::new([1, 0, 2, 1]),
            sender: 1,
            message_size: 1_000_000,
            error_rate: 0.25,
            topology: "line3".to_string(),
        }
    }

    #[test]
    fn params_file_has_five_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = params().write_params(dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            content.lines().collect_vec(),
            [
                "Iteration: 2",
                "Sender Node: 1",
                "Msg Size: 1000000",
                "Error Rate: 0.25",
                "Topology: line3"
            ]
        );
    }

    #[test]
    fn trial_log_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TrialLog::create(dir.path()).unwrap();
        let params = params();
        let outcome = TrialOutcome {
            vector: params.vector,
            trial_name: "autotestmsg_1_4".to_string(),
            success: true,
            elapsed_wait_seconds: 15.0,
            receipts: BTreeMap::from([(2, true), (3, true)]),
        };
        log.write(&TrialRecord {
            params: &params,
            outcome: &outcome,
            timeout_seconds: 25.0,
            hop_time_validated: true,
        })
        .unwrap();

        let mut reader = csv::Reader::from_path(log.path()).unwrap();
        assert_eq!(reader.headers().unwrap().len(), RECORD_SIZE);
        let rows = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][4], "autotestmsg_1_4");
        assert_eq!(&rows[0][10], "2;3");
        assert_eq!(&rows[0][11], "25.000");
    }
}
