//! Capture frame source.
//!
//! Reads a legacy pcap file and yields TCP segments in capture order.
//! Only Ethernet/IPv4/IPv6/TCP records become segments; everything
//! else is skipped. This is the only component that touches the
//! capture format.

use std::fs::File;
use std::io::{BufReader, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::segment::{Segment, TcpFlags};

// Must hold a complete maximum-snaplen record: a 65535-byte frame plus
// the 16-byte record header. Anything smaller makes the reader give up
// with BufferTooSmall partway through the capture.
const READER_BUFFER_SIZE: usize = 128 * 1024;

pub struct CaptureSource<R: Read> {
    reader: LegacyPcapReader<R>,
    finished: bool,
    warned_pcapng: bool,
}

impl<R: Read> std::fmt::Debug for CaptureSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("finished", &self.finished)
            .field("warned_pcapng", &self.warned_pcapng)
            .finish_non_exhaustive()
    }
}

impl CaptureSource<BufReader<File>> {
    /// Open a legacy pcap capture file.
    ///
    /// Failure here is the one fatal error of a run: with no source
    /// there is nothing to analyze.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| PipelineError::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|err| match err {
            PipelineError::Capture(detail) => PipelineError::NotACapture {
                path: path.to_path_buf(),
                detail,
            },
            other => other,
        })
    }
}

impl<R: Read> CaptureSource<R> {
    /// Wrap an already-open reader producing legacy pcap bytes.
    pub fn from_reader(reader: R) -> Result<Self> {
        let reader = LegacyPcapReader::new(READER_BUFFER_SIZE, reader)
            .map_err(|err| PipelineError::Capture(format!("{err:?}")))?;
        Ok(Self {
            reader,
            finished: false,
            warned_pcapng: false,
        })
    }
}

impl<R: Read> Iterator for CaptureSource<R> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let record = match block {
                        PcapBlockOwned::Legacy(ref pkt) => {
                            let ts = SystemTime::UNIX_EPOCH
                                + Duration::from_secs(u64::from(pkt.ts_sec))
                                + Duration::from_micros(u64::from(pkt.ts_usec));
                            Some((ts, pkt.data.to_vec()))
                        }
                        PcapBlockOwned::LegacyHeader(_) => None,
                        PcapBlockOwned::NG(_) => {
                            if !self.warned_pcapng {
                                warn!("pcapng block encountered, only legacy pcap is supported");
                                self.warned_pcapng = true;
                            }
                            None
                        }
                    };
                    drop(block);
                    self.reader.consume(offset);
                    if let Some((ts, data)) = record {
                        if let Some(segment) = decode_segment(ts, &data) {
                            return Some(Ok(segment));
                        }
                    }
                }
                Err(PcapError::Eof) => {
                    self.finished = true;
                    return None;
                }
                Err(PcapError::Incomplete(_)) => {
                    if let Err(err) = self.reader.refill() {
                        let detail = format!("{err:?}");
                        self.finished = true;
                        return Some(Err(PipelineError::Capture(detail)));
                    }
                }
                Err(err) => {
                    let detail = format!("{err:?}");
                    self.finished = true;
                    return Some(Err(PipelineError::Capture(detail)));
                }
            }
        }
    }
}

/// Decode one captured Ethernet frame into a TCP segment, if it is one.
fn decode_segment(ts: SystemTime, data: &[u8]) -> Option<Segment> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;
    let (src_ip, dst_ip): (IpAddr, IpAddr) = match sliced.net {
        Some(NetSlice::Ipv4(ref v4)) => (
            IpAddr::V4(v4.header().source_addr()),
            IpAddr::V4(v4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ref v6)) => (
            IpAddr::V6(v6.header().source_addr()),
            IpAddr::V6(v6.header().destination_addr()),
        ),
        _ => return None,
    };
    let Some(TransportSlice::Tcp(tcp)) = sliced.transport else {
        return None;
    };
    let flags = TcpFlags {
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
    };
    let payload = Bytes::copy_from_slice(tcp.payload());
    Some(Segment {
        ts,
        src: SocketAddr::new(src_ip, tcp.source_port()),
        dst: SocketAddr::new(dst_ip, tcp.destination_port()),
        flags,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use etherparse::PacketBuilder;

    use super::*;

    /// Minimal legacy pcap writer for synthetic captures.
    pub(crate) struct PcapWriter {
        bytes: Vec<u8>,
    }

    impl PcapWriter {
        pub(crate) fn new() -> Self {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
            bytes.extend_from_slice(&2u16.to_le_bytes()); // version major
            bytes.extend_from_slice(&4u16.to_le_bytes()); // version minor
            bytes.extend_from_slice(&0i32.to_le_bytes()); // thiszone
            bytes.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
            bytes.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
            bytes.extend_from_slice(&1u32.to_le_bytes()); // ethernet
            Self { bytes }
        }

        pub(crate) fn record(&mut self, ts_sec: u32, ts_usec: u32, frame: &[u8]) {
            self.bytes.extend_from_slice(&ts_sec.to_le_bytes());
            self.bytes.extend_from_slice(&ts_usec.to_le_bytes());
            self.bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            self.bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            self.bytes.extend_from_slice(frame);
        }

        pub(crate) fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }

    fn tcp_frame(payload: &[u8], syn: bool) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([2; 6], [4; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(51000, 11211, 1000, 64240);
        let builder = if syn { builder.syn() } else { builder };
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn yields_tcp_segments_with_timestamps() {
        let mut writer = PcapWriter::new();
        writer.record(1, 500_000, &tcp_frame(b"", true));
        writer.record(2, 0, &tcp_frame(b"hello", false));
        let capture = writer.finish();

        let source = CaptureSource::from_reader(Cursor::new(capture)).unwrap();
        let segments: Vec<Segment> = source.map(|s| s.unwrap()).collect();

        assert_eq!(segments.len(), 2);

        let syn = &segments[0];
        assert!(syn.flags.connect());
        assert!(syn.payload.is_empty());
        assert_eq!(syn.src, "10.0.0.1:51000".parse().unwrap());
        assert_eq!(syn.dst, "10.0.0.2:11211".parse().unwrap());
        assert_eq!(
            syn.ts,
            SystemTime::UNIX_EPOCH + Duration::from_millis(1500)
        );

        let data = &segments[1];
        assert_eq!(data.payload.as_ref(), b"hello");
        assert_eq!(data.ts, SystemTime::UNIX_EPOCH + Duration::from_secs(2));
    }

    #[test]
    fn non_tcp_records_are_skipped() {
        let builder = PacketBuilder::ethernet2([2; 6], [4; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(5353, 5353);
        let mut frame = Vec::with_capacity(builder.size(4));
        builder.write(&mut frame, b"data").unwrap();

        let mut writer = PcapWriter::new();
        writer.record(1, 0, &frame);
        writer.record(2, 0, &tcp_frame(b"tcp", false));
        let capture = writer.finish();

        let source = CaptureSource::from_reader(Cursor::new(capture)).unwrap();
        let segments: Vec<Segment> = source.map(|s| s.unwrap()).collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].payload.as_ref(), b"tcp");
    }

    #[test]
    fn maximum_snaplen_record_is_not_fatal() {
        // 14-byte ethernet + 65521-byte ipv4 = a 65535-byte frame, the
        // largest the capture header's snaplen admits.
        let payload = vec![0x55u8; 65481];
        let builder = PacketBuilder::ethernet2([2; 6], [4; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(51000, 11211, 1000, 64240);
        let mut big = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut big, &payload).unwrap();
        assert_eq!(big.len(), 65535);

        let mut writer = PcapWriter::new();
        writer.record(1, 0, &big);
        writer.record(2, 0, &tcp_frame(b"after", false));
        let capture = writer.finish();

        let source = CaptureSource::from_reader(Cursor::new(capture)).unwrap();
        let segments: Vec<Segment> = source.map(|s| s.unwrap()).collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].payload.len(), 65481);
        assert_eq!(segments[1].payload.as_ref(), b"after");
    }

    #[test]
    fn open_missing_file_is_source_open_failure() {
        let err = CaptureSource::open("/nonexistent/capture.pcap").unwrap_err();
        assert!(matches!(err, PipelineError::SourceOpen { .. }));
    }

    #[test]
    fn garbage_input_is_not_a_capture() {
        let result = CaptureSource::from_reader(Cursor::new(vec![0u8; 64]));
        assert!(matches!(result, Err(PipelineError::Capture(_))));
    }
}
