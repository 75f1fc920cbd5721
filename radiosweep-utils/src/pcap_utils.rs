//! Module to handle PCAP files captured on the emulated radio interfaces of the fleet.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use flate2::read::GzDecoder;
use pcap_file::{pcap::PcapReader, DataLink};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("IO error on {1:?}: {0}")]
    Io(std::io::Error, PathBuf),
    #[error("Pcap error on {1:?}: {0}")]
    Pcap(pcap_file::PcapError, PathBuf),
}

/// A single packet as stored in the capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Capture timestamp, relative to the UNIX epoch.
    pub timestamp: Duration,
    /// Length of the packet on the wire (may exceed `data.len()` if the snaplen cut it).
    pub orig_len: u32,
    /// The captured bytes, starting at the link layer given by `Capture::datalink`.
    pub data: Vec<u8>,
}

impl RawPacket {
    /// Timestamp in milliseconds since the UNIX epoch.
    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp.as_millis() as u64
    }
}

/// All packets of a capture file together with the link type they were captured on.
#[derive(Debug, Clone)]
pub struct Capture {
    pub datalink: DataLink,
    pub packets: Vec<RawPacket>,
}

/// Returns whether the path points to a gzip-compressed capture (`*.gz`).
pub fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Read a whole capture file into memory. Files ending in `.gz` are decompressed on the fly.
pub fn read_capture(path: impl AsRef<Path>) -> Result<Capture, CaptureError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| CaptureError::Io(e, path.to_path_buf()))?;
    let reader: Box<dyn Read> = if is_gzipped(path) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut pcap =
        PcapReader::new(reader).map_err(|e| CaptureError::Pcap(e, path.to_path_buf()))?;
    let datalink = pcap.header().datalink;

    let mut packets = Vec::new();
    while let Some(packet) = pcap.next_packet() {
        let packet = match packet {
            Ok(packet) => packet,
            // tcpdump killed mid-write leaves a truncated last record behind
            Err(pcap_file::PcapError::IncompleteBuffer) => {
                log::debug!("{path:?} ends with a truncated packet, ignoring it");
                break;
            }
            Err(e) => return Err(CaptureError::Pcap(e, path.to_path_buf())),
        };
        packets.push(RawPacket {
            timestamp: packet.timestamp,
            orig_len: packet.orig_len,
            data: packet.data.into_owned(),
        });
    }
    log::trace!("read {} packets from {path:?}", packets.len());

    Ok(Capture { datalink, packets })
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};
    use pcap_file::pcap::{PcapPacket, PcapWriter};

    use super::*;

    fn write_packets<W: Write>(writer: W) -> W {
        let mut pcap = PcapWriter::new(writer).unwrap();
        for (i, len) in [(1u64, 60u32), (2, 1400)] {
            let data = vec![0xab; 16];
            pcap.write_packet(&PcapPacket::new(Duration::from_millis(1000 * i), len, &data))
                .unwrap();
        }
        pcap.into_writer()
    }

    #[test]
    fn read_plain_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node1.pcap");
        write_packets(File::create(&path).unwrap());

        let capture = read_capture(&path).unwrap();
        assert_eq!(capture.datalink, DataLink::ETHERNET);
        assert_eq!(capture.packets.len(), 2);
        assert_eq!(capture.packets[0].timestamp_millis(), 1000);
        assert_eq!(capture.packets[1].orig_len, 1400);
        assert_eq!(capture.packets[1].data, vec![0xab; 16]);
    }

    #[test]
    fn read_gzipped_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node2.pcap.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        write_packets(encoder).finish().unwrap();

        assert!(is_gzipped(&path));
        let capture = read_capture(&path).unwrap();
        assert_eq!(capture.packets.len(), 2);
        assert_eq!(capture.packets[1].timestamp_millis(), 2000);
    }

    #[test]
    fn missing_capture_is_an_error() {
        assert!(matches!(
            read_capture("/this/path/does/not/exist.pcap"),
            Err(CaptureError::Io(..))
        ));
    }
}
