//! Per-flow protocol parser task.
//!
//! Each flow gets exactly one parser. It frames packets off the flow's
//! byte stream, validates them against the opcode rule tables, and
//! forwards accepted packets to the correlator and reporter queues.
//! Corrupt framing does not end the flow when recovery is enabled: the
//! parser scans forward for the next magic byte and resumes.

use std::sync::Arc;

use bytes::Buf;
use mctap_proto::{decode_packet, looks_valid, Role};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AnalyzerConfig;
use crate::event::{FlowSummary, MessageEvent, TapEvent};
use crate::stream::ByteStream;

pub struct FlowParser {
    name: Arc<str>,
    role: Role,
    cfg: Arc<AnalyzerConfig>,
    correlator: mpsc::Sender<TapEvent>,
    reporter: mpsc::Sender<TapEvent>,
}

impl FlowParser {
    pub fn new(
        name: Arc<str>,
        role: Role,
        cfg: Arc<AnalyzerConfig>,
        correlator: mpsc::Sender<TapEvent>,
        reporter: mpsc::Sender<TapEvent>,
    ) -> Self {
        Self {
            name,
            role,
            cfg,
            correlator,
            reporter,
        }
    }

    /// Run the parser to end-of-stream and return the flow summary.
    pub async fn run(self, mut stream: ByteStream) -> FlowSummary {
        let magic = self.role.magic();
        let mut messages = 0u64;
        let mut skipped = 0u64;

        'flow: loop {
            let pkt = loop {
                match decode_packet(stream.buf_mut(), magic, self.cfg.max_body_len) {
                    Ok(Some(pkt)) => break pkt,
                    Ok(None) => {
                        if stream.fill().await.is_err() {
                            break 'flow;
                        }
                    }
                    Err(err) => {
                        if !self.cfg.recover {
                            warn!(flow = %self.name, %err, "framing failed, ending flow");
                            break 'flow;
                        }
                        debug!(flow = %self.name, %err, "framing failed, resynchronizing");
                        // The bad header may itself start with the magic
                        // byte; step past it before scanning.
                        stream.buf_mut().advance(1);
                        skipped += 1;
                        let (n, found) = stream.skip_until(magic).await;
                        skipped += n;
                        if !found {
                            break 'flow;
                        }
                    }
                }
            };

            messages += 1;
            if looks_valid(&pkt, self.role, &self.cfg.key_bounds) {
                let event = TapEvent::Message(MessageEvent {
                    flow: self.name.clone(),
                    role: self.role,
                    ts: stream.timestamp(),
                    packet: pkt,
                });
                let _ = self.correlator.send(event.clone()).await;
                let _ = self.reporter.send(event).await;
            } else {
                warn!(
                    flow = %self.name,
                    role = self.role.as_str(),
                    opcode = pkt.opcode,
                    key_len = pkt.key.len(),
                    body_len = pkt.value.len(),
                    "dropping packet that failed validation"
                );
            }
        }

        skipped += stream.drain().await;

        let summary = FlowSummary {
            flow: self.name.clone(),
            role: self.role,
            messages,
            skipped_bytes: skipped,
        };
        if self.cfg.verbose {
            info!(
                flow = %self.name,
                role = self.role.as_str(),
                messages,
                skipped_bytes = skipped,
                "flow complete"
            );
        }
        let _ = self
            .reporter
            .send(TapEvent::FlowClosed(summary.clone()))
            .await;
        if self.role == Role::Client {
            // Tells the correlator no more requests will arrive from
            // this flow.
            let _ = self
                .correlator
                .send(TapEvent::FlowClosed(summary.clone()))
                .await;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::{Bytes, BytesMut};
    use mctap_proto::{encode_packet, opcode, Packet};

    use super::*;
    use crate::stream::flow_channel;

    fn wire(packets: &[Packet]) -> Bytes {
        let mut buf = BytesMut::new();
        for pkt in packets {
            encode_packet(pkt, &mut buf).unwrap();
        }
        buf.freeze()
    }

    fn get_request(key: &'static [u8], opaque: u32) -> Packet {
        let mut pkt = Packet::request(opcode::GET);
        pkt.key = Bytes::from_static(key);
        pkt.opaque = opaque;
        pkt
    }

    async fn run_client_flow(
        cfg: AnalyzerConfig,
        chunks: Vec<Bytes>,
    ) -> (FlowSummary, Vec<TapEvent>) {
        let (corr_tx, mut corr_rx) = mpsc::channel(64);
        let (rep_tx, rep_rx) = mpsc::channel(64);
        let parser = FlowParser::new(
            Arc::from("10.0.0.1:4242"),
            Role::Client,
            Arc::new(cfg),
            corr_tx,
            rep_tx,
        );
        let (sender, stream) = flow_channel(64);
        let task = tokio::spawn(parser.run(stream));

        for chunk in chunks {
            sender.push(SystemTime::UNIX_EPOCH, chunk).await;
        }
        drop(sender);

        let summary = task.await.unwrap();
        drop(rep_rx);
        let mut events = Vec::new();
        while let Ok(event) = corr_rx.try_recv() {
            events.push(event);
        }
        (summary, events)
    }

    fn message_opaques(events: &[TapEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                TapEvent::Message(m) => Some(m.packet.opaque),
                TapEvent::FlowClosed(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn clean_stream_round_trips() {
        let bytes = wire(&[
            get_request(b"alpha", 1),
            get_request(b"beta", 2),
            get_request(b"gamma", 3),
        ]);
        let (summary, events) = run_client_flow(AnalyzerConfig::default(), vec![bytes]).await;

        assert_eq!(summary.messages, 3);
        assert_eq!(summary.skipped_bytes, 0);
        assert_eq!(message_opaques(&events), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn packets_straddling_chunks_are_reassembled() {
        let bytes = wire(&[get_request(b"straddle", 7)]);
        let chunks = bytes
            .chunks(5)
            .map(|c| Bytes::copy_from_slice(c))
            .collect::<Vec<_>>();

        let (summary, events) = run_client_flow(AnalyzerConfig::default(), chunks).await;
        assert_eq!(summary.messages, 1);
        assert_eq!(message_opaques(&events), vec![7]);
    }

    #[tokio::test]
    async fn resync_skips_exactly_the_garbage() {
        let garbage = Bytes::from_static(b"\x01\x02not-a-packet\x7f");
        let mut stitched = BytesMut::new();
        stitched.extend_from_slice(&wire(&[get_request(b"one", 1)]));
        stitched.extend_from_slice(&garbage);
        stitched.extend_from_slice(&wire(&[get_request(b"two", 2)]));

        let (summary, events) =
            run_client_flow(AnalyzerConfig::default(), vec![stitched.freeze()]).await;

        assert_eq!(summary.messages, 2);
        assert_eq!(summary.skipped_bytes, garbage.len() as u64);
        assert_eq!(message_opaques(&events), vec![1, 2]);
    }

    #[tokio::test]
    async fn recovery_disabled_ends_flow_at_corruption() {
        let mut stitched = BytesMut::new();
        stitched.extend_from_slice(&wire(&[get_request(b"one", 1)]));
        stitched.extend_from_slice(b"\x00garbage-that-never-ends");
        let tail = wire(&[get_request(b"two", 2)]);
        stitched.extend_from_slice(&tail);

        let cfg = AnalyzerConfig {
            recover: false,
            ..AnalyzerConfig::default()
        };
        let (summary, events) = run_client_flow(cfg, vec![stitched.freeze()]).await;

        assert_eq!(summary.messages, 1);
        assert_eq!(message_opaques(&events), vec![1]);
        // Everything after the corruption is drained, not parsed.
        assert_eq!(summary.skipped_bytes, 24 + tail.len() as u64);
    }

    #[tokio::test]
    async fn invalid_packets_are_counted_but_not_forwarded() {
        // A GET with a body fails the client rule set.
        let mut bad = get_request(b"key", 9);
        bad.value = Bytes::from_static(b"unexpected body");
        let bytes = wire(&[bad, get_request(b"ok", 10)]);

        let (summary, events) = run_client_flow(AnalyzerConfig::default(), vec![bytes]).await;
        assert_eq!(summary.messages, 2);
        assert_eq!(message_opaques(&events), vec![10]);
    }

    #[tokio::test]
    async fn truncated_final_packet_ends_stream_gracefully() {
        let mut all = BytesMut::from(&wire(&[get_request(b"whole", 1)])[..]);
        all.extend_from_slice(&wire(&[get_request(b"partial", 2)])[..10]);

        let (summary, events) = run_client_flow(AnalyzerConfig::default(), vec![all.freeze()]).await;
        assert_eq!(summary.messages, 1);
        assert_eq!(message_opaques(&events), vec![1]);
        assert_eq!(summary.skipped_bytes, 10);
    }

    #[tokio::test]
    async fn client_flow_sends_closing_sentinel() {
        let (summary, events) = run_client_flow(AnalyzerConfig::default(), vec![]).await;
        assert_eq!(summary.messages, 0);
        assert!(matches!(events.last(), Some(TapEvent::FlowClosed(_))));
    }
}
