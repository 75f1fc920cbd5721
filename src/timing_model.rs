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
//! Empirical timing model for the per-hop delivery time of a message.
//!
//! The model was fit on measurements with transmit rates between [`VALIDATED_TX_RATE_MIN`] and
//! [`VALIDATED_TX_RATE_MAX`] bytes per second. Outside of that band, the estimate is extrapolated
//! and marked as unvalidated.

/// Lower end of the transmit-rate band in which the model was fit (bytes/s).
pub const VALIDATED_TX_RATE_MIN: f64 = 10_000.0;
/// Upper end of the transmit-rate band in which the model was fit (bytes/s).
pub const VALIDATED_TX_RATE_MAX: f64 = 50_000.0;

/// Slope applied to the pure transmission time `msg / tx_rate`.
const TRANSMISSION_SLOPE: f64 = 1.25;
/// Fixed per-fragment overhead in seconds.
const FRAGMENT_OVERHEAD: f64 = 0.5;

/// Estimated time for a message to traverse one hop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HopTimeEstimate {
    pub seconds: f64,
    /// `false` if `tx_rate` lies outside the band the model was fit on.
    pub validated: bool,
}

fn linear_model(tx_rate: f64, msg_size: u64, fragment_size: u64) -> f64 {
    let fragments = msg_size.div_ceil(fragment_size.max(1)) as f64;
    TRANSMISSION_SLOPE * msg_size as f64 / tx_rate + FRAGMENT_OVERHEAD * fragments
}

/// Estimate the time (in seconds) a message of `msg_size` bytes needs to traverse one hop, if
/// sent with `tx_rate` bytes per second and split into fragments of `fragment_size` bytes.
pub fn estimate_hop_time(tx_rate: f64, msg_size: u64, fragment_size: u64) -> HopTimeEstimate {
    if (VALIDATED_TX_RATE_MIN..=VALIDATED_TX_RATE_MAX).contains(&tx_rate) {
        return HopTimeEstimate {
            seconds: linear_model(tx_rate, msg_size, fragment_size),
            validated: true,
        };
    }

    let edge = tx_rate.clamp(VALIDATED_TX_RATE_MIN, VALIDATED_TX_RATE_MAX);
    let seconds = linear_model(edge, msg_size, fragment_size) * edge / tx_rate.max(f64::EPSILON);
    log::warn!(
        "tx rate {tx_rate} B/s is outside of [{VALIDATED_TX_RATE_MIN}, {VALIDATED_TX_RATE_MAX}]. \
         Using the unvalidated estimate of {seconds:.2}s per hop"
    );
    HopTimeEstimate {
        seconds,
        validated: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inside_band() {
        let est = estimate_hop_time(20_000.0, 100_000, 50_000);
        assert!(est.validated);
        // 1.25 * 5s + 0.5 * 2 fragments
        assert!((est.seconds - 7.25).abs() < 1e-9);

        let est = estimate_hop_time(10_000.0, 1, 500_000);
        assert!(est.validated);
        assert!((est.seconds - (1.25e-4 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn outside_band_is_flagged() {
        let slow = estimate_hop_time(5_000.0, 100_000, 500_000);
        assert!(!slow.validated);
        // evaluated at 10k and scaled by 2
        assert!((slow.seconds - 2.0 * (12.5 + 0.5)).abs() < 1e-9);

        let fast = estimate_hop_time(100_000.0, 100_000, 500_000);
        assert!(!fast.validated);
        assert!((fast.seconds - 0.5 * (2.5 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn monotone_in_message_size() {
        let small = estimate_hop_time(30_000.0, 1_000, 500_000).seconds;
        let large = estimate_hop_time(30_000.0, 1_000_000, 500_000).seconds;
        assert!(small < large);
    }
}
