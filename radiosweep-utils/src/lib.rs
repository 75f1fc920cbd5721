//! Utility library for the radiosweep project

pub mod other;
pub mod pcap_utils;
pub mod serde;
