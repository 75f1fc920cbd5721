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
//! Library for running parameter sweeps on a fleet of emulated radio nodes, and for consolidating
//! the results they produce.

pub mod config;
pub mod consolidation;
pub mod experiments;
pub mod records;
pub mod remote;
pub mod time_series;
pub mod timing_model;
pub mod topology;
pub mod util;

#[cfg(test)]
mod test;

// pub use to keep the map helper reachable from the main crate
pub use radiosweep_utils::serde::generic_hashmap as serde_generic_hashmap;

pub mod prelude {
    pub use super::{
        config::SweepConfig,
        experiments::{
            FailureSupervisor, ParameterSweepEnumerator, ParameterVector, SweepContext, TrialRunner,
        },
        time_series::{CapturedFrame, Direction, FrameType, TimeBuckets},
        topology::{NodeId, SubnetId, TopologyGraph},
    };
}
