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
//! The JSON configuration file of the remote application, edited locally and pushed to the fleet.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

const TX_RATE_KEY: &str = "TargetTxRateBps";
const FRAGMENT_SIZE_KEY: &str = "FragmentSize";

#[derive(Debug, Clone)]
pub struct AppConfigArtifact {
    path: PathBuf,
    values: Map<String, Value>,
}

impl AppConfigArtifact {
    /// Read the local configuration file. A missing file yields an empty configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("{path:?} does not exist, starting from an empty application config");
                Map::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tx_rate(&self) -> Option<f64> {
        self.values.get(TX_RATE_KEY).and_then(Value::as_f64)
    }

    pub fn fragment_size(&self) -> Option<u64> {
        self.values.get(FRAGMENT_SIZE_KEY).and_then(Value::as_u64)
    }

    /// Set the transmit rate. Returns `true` if the value changed.
    pub fn set_tx_rate(&mut self, tx_rate: f64) -> bool {
        if self.tx_rate() == Some(tx_rate) {
            return false;
        }
        // keep integral rates integral in the file
        let value = if tx_rate.fract() == 0.0 && tx_rate.abs() < u64::MAX as f64 {
            Value::from(tx_rate as u64)
        } else {
            Value::from(tx_rate)
        };
        self.values.insert(TX_RATE_KEY.to_string(), value);
        true
    }

    /// Set the fragment size. Returns `true` if the value changed.
    pub fn set_fragment_size(&mut self, fragment_size: u64) -> bool {
        if self.fragment_size() == Some(fragment_size) {
            return false;
        }
        self.values
            .insert(FRAGMENT_SIZE_KEY.to_string(), Value::from(fragment_size));
        true
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.values)?)
    }
}
