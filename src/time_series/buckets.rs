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
//! Fixed-width time buckets over classified frames, and read-only views on them.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{CapturedFrame, Direction, FrameType};
use crate::topology::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub direction: Direction,
    pub frame_type: FrameType,
    pub node: NodeId,
    pub bucket: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketValue {
    pub bytes: u64,
    pub frames: u64,
}

/// Identifies one time series: all buckets of a node for one direction and frame type.
pub type SeriesKey = (Direction, FrameType, NodeId);

/// Quantity of a bucket that a view is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    Bytes,
    Frames,
}

impl Metric {
    fn of(&self, value: &BucketValue) -> f64 {
        match self {
            Metric::Bytes => value.bytes as f64,
            Metric::Frames => value.frames as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum View {
    /// Bucket value divided by the bucket width.
    PerSecond,
    /// Sum of all buckets up to and including the current one.
    Cumulative,
    /// Cumulative sum divided by the number of buckets so far.
    RunningAverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBuckets {
    /// Timestamp of the earliest frame over all nodes.
    pub origin_millis: u64,
    pub width_seconds: f64,
    #[serde(with = "radiosweep_utils::serde::generic_hashmap")]
    pub buckets: BTreeMap<BucketKey, BucketValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("Bucket width must be a positive number of seconds, got {0}")]
pub struct InvalidBucketWidth(pub f64);

/// Accept only finite, positive bucket widths.
pub fn check_width(width_seconds: f64) -> Result<f64, InvalidBucketWidth> {
    if width_seconds.is_finite() && width_seconds > 0.0 {
        Ok(width_seconds)
    } else {
        Err(InvalidBucketWidth(width_seconds))
    }
}

/// Accumulate frames into buckets of `width_seconds`, relative to the earliest frame of all
/// nodes.
pub fn bucket(frames: &[CapturedFrame], width_seconds: f64) -> Result<TimeBuckets, InvalidBucketWidth> {
    let width_seconds = check_width(width_seconds)?;
    let origin_millis = frames
        .iter()
        .map(|f| f.timestamp_millis)
        .min()
        .unwrap_or_default();
    let mut buckets: BTreeMap<BucketKey, BucketValue> = BTreeMap::new();
    for frame in frames {
        let relative = (frame.timestamp_millis - origin_millis) as f64 / 1000.0;
        let key = BucketKey {
            direction: frame.direction,
            frame_type: frame.frame_type,
            node: frame.node,
            bucket: (relative / width_seconds).floor() as u64,
        };
        let value = buckets.entry(key).or_default();
        value.bytes += frame.byte_length as u64;
        value.frames += 1;
    }
    Ok(TimeBuckets {
        origin_millis,
        width_seconds,
        buckets,
    })
}

impl TimeBuckets {
    /// Number of buckets spanned by the trial, i.e., the last bucket index plus one.
    pub fn num_buckets(&self) -> usize {
        self.buckets
            .keys()
            .map(|k| k.bucket as usize + 1)
            .max()
            .unwrap_or_default()
    }

    pub fn series_keys(&self) -> BTreeSet<SeriesKey> {
        self.buckets
            .keys()
            .map(|k| (k.direction, k.frame_type, k.node))
            .collect()
    }

    /// Raw values of a series, one per bucket. Empty buckets are zero.
    fn raw(&self, key: SeriesKey, metric: Metric) -> Vec<f64> {
        let (direction, frame_type, node) = key;
        (0..self.num_buckets() as u64)
            .map(|bucket| {
                self.buckets
                    .get(&BucketKey {
                        direction,
                        frame_type,
                        node,
                        bucket,
                    })
                    .map(|v| metric.of(v))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Compute a view of one series.
    pub fn view(&self, key: SeriesKey, metric: Metric, view: View) -> Vec<f64> {
        let raw = self.raw(key, metric);
        match view {
            View::PerSecond => raw.into_iter().map(|x| x / self.width_seconds).collect(),
            View::Cumulative => raw
                .into_iter()
                .scan(0.0, |sum, x| {
                    *sum += x;
                    Some(*sum)
                })
                .collect(),
            View::RunningAverage => raw
                .into_iter()
                .enumerate()
                .scan(0.0, |sum, (i, x)| {
                    *sum += x;
                    Some(*sum / (i + 1) as f64)
                })
                .collect(),
        }
    }

    /// Write the buckets as JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Write one view of all series as CSV: one row per bucket, one column per series.
    pub fn write_view_csv(
        &self,
        path: impl AsRef<Path>,
        metric: Metric,
        view: View,
    ) -> Result<(), csv::Error> {
        let keys = self.series_keys().into_iter().collect_vec();
        let columns = keys
            .iter()
            .map(|k| self.view(*k, metric, view))
            .collect_vec();

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(
            std::iter::once("time".to_string()).chain(
                keys.iter()
                    .map(|(direction, frame_type, node)| format!("node{node}_{direction}_{frame_type}")),
            ),
        )?;
        for i in 0..self.num_buckets() {
            writer.write_record(
                std::iter::once(format!("{}", i as f64 * self.width_seconds))
                    .chain(columns.iter().map(|c| c[i].to_string())),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(node: NodeId, t: u64, len: u32, direction: Direction, frame_type: FrameType) -> CapturedFrame {
        CapturedFrame {
            node,
            timestamp_millis: t,
            byte_length: len,
            direction,
            frame_type,
        }
    }

    fn frames() -> Vec<CapturedFrame> {
        use Direction::*;
        use FrameType::*;
        vec![
            frame(1, 10_500, 100, Sent, Gvine),
            frame(1, 10_900, 50, Sent, Gvine),
            frame(2, 10_200, 70, Received, Beacon),
            frame(1, 12_300, 200, Sent, Gvine),
            frame(2, 13_100, 70, Received, Beacon),
        ]
    }

    #[test]
    fn shared_origin_across_nodes() {
        let b = bucket(&frames(), 1.0).unwrap();
        assert_eq!(b.origin_millis, 10_200);
        let key = |node, direction, frame_type, bucket| BucketKey {
            direction,
            frame_type,
            node,
            bucket,
        };
        assert_eq!(
            b.buckets[&key(1, Direction::Sent, FrameType::Gvine, 0)],
            BucketValue { bytes: 150, frames: 2 }
        );
        assert_eq!(
            b.buckets[&key(1, Direction::Sent, FrameType::Gvine, 2)],
            BucketValue { bytes: 200, frames: 1 }
        );
        assert!(b.buckets.contains_key(&key(2, Direction::Received, FrameType::Beacon, 2)));
        assert_eq!(b.num_buckets(), 3);
        assert_eq!(b.series_keys().len(), 2);
    }

    #[test]
    fn views_do_not_mutate() {
        let b = bucket(&frames(), 2.0).unwrap();
        let before = b.clone();
        let key = (Direction::Sent, FrameType::Gvine, 1);
        assert_eq!(b.view(key, Metric::Bytes, View::PerSecond), [75.0, 100.0]);
        assert_eq!(b.view(key, Metric::Bytes, View::Cumulative), [150.0, 350.0]);
        assert_eq!(b.view(key, Metric::Frames, View::RunningAverage), [2.0, 1.5]);
        assert_eq!(b, before);
    }

    #[test]
    fn empty_input() {
        let b = bucket(&[], 1.0).unwrap();
        assert!(b.buckets.is_empty());
        assert_eq!(b.num_buckets(), 0);
    }

    #[test]
    fn width_must_be_positive() {
        for width in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(bucket(&frames(), width).is_err(), "{width}");
        }
        assert_eq!(check_width(0.5), Ok(0.5));
    }

    #[test]
    fn json_and_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let b = bucket(&frames(), 1.0).unwrap();
        let json = dir.path().join("buckets.json");
        b.write_json(&json).unwrap();
        let back: TimeBuckets =
            serde_json::from_reader(std::fs::File::open(&json).unwrap()).unwrap();
        assert_eq!(back, b);

        let csv_path = dir.path().join("bytes_cumulative.csv");
        b.write_view_csv(&csv_path, Metric::Bytes, View::Cumulative).unwrap();
        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect_vec(),
            ["time", "node1_sent_gvine", "node2_received_beacon"]
        );
        let rows = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][1], "350");
    }
}
