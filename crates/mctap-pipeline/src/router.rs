//! Flow router: demultiplexes the capture's segment sequence into
//! per-flow byte streams and owns the parser task lifecycle.
//!
//! Flow identity is the client endpoint of the connection plus the
//! direction role. Both directions of one connection therefore share a
//! name, which is what lets the correlator pair requests with
//! responses. Identity deliberately ignores the server side of the
//! four-tuple; if a client endpoint is reused without an observed
//! teardown, events from the new connection land on the old flow. That
//! is a limitation of the capture's signals, not something the router
//! tries to out-guess.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use mctap_proto::Role;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::event::{FlowSummary, TapEvent};
use crate::pacer::Pacer;
use crate::parser::FlowParser;
use crate::segment::Segment;
use crate::stream::{flow_channel, FlowSender};

/// Ingestion totals for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// TCP segments routed.
    pub segments: u64,
    /// Flows opened over the whole run (re-opened flows count again).
    pub flows_opened: u64,
    /// Capture records that could not be decoded into segments.
    pub decode_errors: u64,
}

pub struct FlowRouter {
    cfg: Arc<AnalyzerConfig>,
    flows: HashMap<(SocketAddr, Role), FlowSender>,
    servers: HashSet<SocketAddr>,
    tasks: JoinSet<FlowSummary>,
    correlator: mpsc::Sender<TapEvent>,
    reporter: mpsc::Sender<TapEvent>,
    stats: RouterStats,
}

impl FlowRouter {
    pub fn new(
        cfg: Arc<AnalyzerConfig>,
        correlator: mpsc::Sender<TapEvent>,
        reporter: mpsc::Sender<TapEvent>,
    ) -> Self {
        Self {
            cfg,
            flows: HashMap::new(),
            servers: HashSet::new(),
            tasks: JoinSet::new(),
            correlator,
            reporter,
            stats: RouterStats::default(),
        }
    }

    /// Route every segment, then close all flows and wait for their
    /// parsers to finish. Returns once the whole pipeline upstream of
    /// the correlator has drained.
    pub async fn run<I>(mut self, segments: I) -> RouterStats
    where
        I: IntoIterator<Item = crate::error::Result<Segment>>,
    {
        let mut pacer = self.cfg.time_scale.map(Pacer::new);
        for item in segments {
            let segment = match item {
                Ok(segment) => segment,
                Err(err) => {
                    warn!(%err, "skipping undecodable capture record");
                    self.stats.decode_errors += 1;
                    continue;
                }
            };
            if let Some(pacer) = pacer.as_mut() {
                pacer.pace(segment.ts).await;
            }
            self.route(segment).await;
        }
        self.shutdown().await
    }

    async fn route(&mut self, segment: Segment) {
        self.stats.segments += 1;

        let sender_is_server = self.servers.contains(&segment.src)
            || segment.flags.connect_ack()
            || segment.src.port() == self.cfg.server_port;
        if sender_is_server {
            self.servers.insert(segment.src);
        }

        // Both directions are filed under the connection's client
        // endpoint so role-paired flows share a name.
        let (client_endpoint, role) = if sender_is_server {
            (segment.dst, Role::Server)
        } else {
            (segment.src, Role::Client)
        };
        let key = (client_endpoint, role);

        if !segment.payload.is_empty() {
            if !self.flows.contains_key(&key) {
                self.open_flow(key);
            }
            if let Some(sender) = self.flows.get(&key) {
                sender.push(segment.ts, segment.payload).await;
            }
        } else if segment.flags.connect() && !self.flows.contains_key(&key) {
            self.open_flow(key);
        }

        if segment.flags.teardown() {
            if let Some(sender) = self.flows.remove(&key) {
                debug!(flow = %key.0, role = role.as_str(), "flow torn down");
                sender.close();
            }
        }
    }

    fn open_flow(&mut self, key: (SocketAddr, Role)) {
        let (endpoint, role) = key;
        let name: Arc<str> = Arc::from(endpoint.to_string());
        debug!(flow = %name, role = role.as_str(), "opening flow");
        let (sender, stream) = flow_channel(self.cfg.flow_queue_capacity);
        let parser = FlowParser::new(
            name,
            role,
            self.cfg.clone(),
            self.correlator.clone(),
            self.reporter.clone(),
        );
        self.tasks.spawn(parser.run(stream));
        self.flows.insert(key, sender);
        self.stats.flows_opened += 1;
    }

    async fn shutdown(mut self) -> RouterStats {
        // Dropping the senders signals end-of-input to every parser.
        self.flows.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "flow parser task failed");
            }
        }
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use bytes::{Bytes, BytesMut};
    use mctap_proto::{encode_packet, opcode, Packet};

    use super::*;
    use crate::segment::TcpFlags;

    const CLIENT: &str = "10.1.1.1:51000";
    const SERVER: &str = "10.2.2.2:11211";

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn ts(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn seg(src: &str, dst: &str, at: u64, flags: TcpFlags, payload: Bytes) -> Segment {
        Segment {
            ts: ts(at),
            src: addr(src),
            dst: addr(dst),
            flags,
            payload,
        }
    }

    fn get_wire(key: &'static [u8], opaque: u32) -> Bytes {
        let mut pkt = Packet::request(opcode::GET);
        pkt.key = Bytes::from_static(key);
        pkt.opaque = opaque;
        let mut buf = BytesMut::new();
        encode_packet(&pkt, &mut buf).unwrap();
        buf.freeze()
    }

    fn get_response_wire(opaque: u32) -> Bytes {
        let mut pkt = Packet::response(opcode::GET);
        pkt.value = Bytes::from_static(b"value");
        pkt.opaque = opaque;
        let mut buf = BytesMut::new();
        encode_packet(&pkt, &mut buf).unwrap();
        buf.freeze()
    }

    async fn run_router(
        cfg: AnalyzerConfig,
        segments: Vec<Segment>,
    ) -> (RouterStats, Vec<TapEvent>) {
        let (corr_tx, corr_rx) = mpsc::channel(1024);
        let (rep_tx, mut rep_rx) = mpsc::channel(1024);
        let router = FlowRouter::new(Arc::new(cfg), corr_tx, rep_tx);
        let stats = router.run(segments.into_iter().map(Ok)).await;
        drop(corr_rx);
        let mut events = Vec::new();
        while let Ok(event) = rep_rx.try_recv() {
            events.push(event);
        }
        (stats, events)
    }

    fn summaries(events: &[TapEvent]) -> Vec<&FlowSummary> {
        events
            .iter()
            .filter_map(|e| match e {
                TapEvent::FlowClosed(s) => Some(s),
                TapEvent::Message(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn payload_creates_client_flow_and_parses() {
        let segments = vec![seg(
            CLIENT,
            SERVER,
            0,
            TcpFlags::default(),
            get_wire(b"foo", 1),
        )];
        let (stats, events) = run_router(AnalyzerConfig::default(), segments).await;

        assert_eq!(stats.segments, 1);
        assert_eq!(stats.flows_opened, 1);
        let msgs: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TapEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::Client);
        assert_eq!(&*msgs[0].flow, CLIENT);
    }

    #[tokio::test]
    async fn syn_ack_marks_sender_as_server() {
        let synack = TcpFlags {
            syn: true,
            ack: true,
            ..TcpFlags::default()
        };
        // The server endpoint here is not on the well-known port, so
        // only the SYN+ACK identifies it.
        let odd_server = "10.2.2.2:4711";
        let segments = vec![
            seg(odd_server, CLIENT, 0, synack, Bytes::new()),
            seg(odd_server, CLIENT, 1, TcpFlags::default(), get_response_wire(1)),
        ];
        let (_, events) = run_router(AnalyzerConfig::default(), segments).await;

        let msg = events
            .iter()
            .find_map(|e| match e {
                TapEvent::Message(m) => Some(m),
                _ => None,
            })
            .expect("response should parse");
        assert_eq!(msg.role, Role::Server);
        // Server flow is filed under the client endpoint.
        assert_eq!(&*msg.flow, CLIENT);
    }

    #[tokio::test]
    async fn well_known_port_marks_sender_as_server() {
        let segments = vec![seg(
            SERVER,
            CLIENT,
            0,
            TcpFlags::default(),
            get_response_wire(3),
        )];
        let (_, events) = run_router(AnalyzerConfig::default(), segments).await;

        let msg = events
            .iter()
            .find_map(|e| match e {
                TapEvent::Message(m) => Some(m),
                _ => None,
            })
            .expect("response should parse");
        assert_eq!(msg.role, Role::Server);
        assert_eq!(&*msg.flow, CLIENT);
    }

    #[tokio::test]
    async fn teardown_then_reuse_creates_fresh_flow() {
        let fin = TcpFlags {
            fin: true,
            ..TcpFlags::default()
        };
        let segments = vec![
            seg(CLIENT, SERVER, 0, TcpFlags::default(), get_wire(b"a", 1)),
            seg(CLIENT, SERVER, 1, fin, Bytes::new()),
            seg(CLIENT, SERVER, 2, TcpFlags::default(), get_wire(b"b", 2)),
        ];
        let (stats, events) = run_router(AnalyzerConfig::default(), segments).await;

        assert_eq!(stats.flows_opened, 2);
        assert_eq!(summaries(&events).len(), 2);
    }

    #[tokio::test]
    async fn pure_control_frames_push_no_bytes() {
        let syn = TcpFlags {
            syn: true,
            ..TcpFlags::default()
        };
        let pure_ack = TcpFlags {
            ack: true,
            ..TcpFlags::default()
        };
        let segments = vec![
            seg(CLIENT, SERVER, 0, syn, Bytes::new()),
            seg(CLIENT, SERVER, 1, pure_ack, Bytes::new()),
        ];
        let (stats, events) = run_router(AnalyzerConfig::default(), segments).await;

        // The SYN opened a flow, but nothing was ever parsed from it.
        assert_eq!(stats.flows_opened, 1);
        let sums = summaries(&events);
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].messages, 0);
        assert_eq!(sums[0].skipped_bytes, 0);
    }

    #[tokio::test]
    async fn end_of_input_closes_all_flows() {
        let segments = vec![
            seg(CLIENT, SERVER, 0, TcpFlags::default(), get_wire(b"a", 1)),
            seg(SERVER, CLIENT, 1, TcpFlags::default(), get_response_wire(1)),
        ];
        let (stats, events) = run_router(AnalyzerConfig::default(), segments).await;

        assert_eq!(stats.flows_opened, 2);
        // Both parsers reported a summary without any explicit teardown.
        assert_eq!(summaries(&events).len(), 2);
    }

    #[tokio::test]
    async fn decode_errors_are_counted_and_skipped() {
        let items = vec![
            Err(crate::error::PipelineError::Capture("bad record".into())),
            Ok(seg(CLIENT, SERVER, 0, TcpFlags::default(), get_wire(b"k", 5))),
        ];
        let (corr_tx, _corr_rx) = mpsc::channel(16);
        let (rep_tx, _rep_rx) = mpsc::channel(16);
        let router = FlowRouter::new(Arc::new(AnalyzerConfig::default()), corr_tx, rep_tx);
        let stats = router.run(items).await;

        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.segments, 1);
    }
}
