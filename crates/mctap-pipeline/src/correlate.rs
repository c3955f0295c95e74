//! Request/response correlation.
//!
//! A single task consumes validated events from every flow and pairs
//! client requests with server responses by `(flow name, opaque)`. The
//! map is touched by nothing else, so no locking is involved. Within a
//! flow events arrive in parse order; no ordering across flows is
//! assumed, and none is needed because keys are flow-scoped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mctap_proto::{Packet, Role};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::{LatencyRecord, TapEvent};

/// Match totals for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorStats {
    /// Matches whose latency exceeded the reporting threshold.
    pub above: u64,
    /// Matches at or below the threshold (counted, never emitted).
    pub below: u64,
}

struct Pending {
    packet: Packet,
    ts: SystemTime,
}

pub struct Correlator {
    events: mpsc::Receiver<TapEvent>,
    threshold: Duration,
    records: mpsc::Sender<LatencyRecord>,
}

impl Correlator {
    pub fn new(
        events: mpsc::Receiver<TapEvent>,
        threshold: Duration,
        records: mpsc::Sender<LatencyRecord>,
    ) -> Self {
        Self {
            events,
            threshold,
            records,
        }
    }

    /// Consume events until every parser is done, emitting one record
    /// per above-threshold match. In-flight requests still unmatched at
    /// that point are dropped without being reported.
    pub async fn run(mut self) -> CorrelatorStats {
        let mut inflight: HashMap<(Arc<str>, u32), Pending> = HashMap::new();
        let mut stats = CorrelatorStats::default();

        while let Some(event) = self.events.recv().await {
            let TapEvent::Message(msg) = event else {
                continue;
            };
            let key = (msg.flow.clone(), msg.packet.opaque);
            match msg.role {
                Role::Client => {
                    // Last write wins: a duplicate opaque replaces the
                    // outstanding request, which is lost to correlation.
                    if let Some(prior) = inflight.insert(
                        key,
                        Pending {
                            packet: msg.packet,
                            ts: msg.ts,
                        },
                    ) {
                        trace!(
                            flow = %msg.flow,
                            opcode = prior.packet.opcode,
                            "duplicate opaque overwrote outstanding request"
                        );
                    }
                }
                Role::Server => {
                    let Some(req) = inflight.remove(&key) else {
                        // Capture started mid-connection; nothing to
                        // pair against.
                        continue;
                    };
                    let duration = msg.ts.duration_since(req.ts).unwrap_or_default();
                    if duration > self.threshold {
                        stats.above += 1;
                        let record = LatencyRecord {
                            ts: req.ts,
                            flow: msg.flow,
                            opcode: req.packet.opcode,
                            req_key_len: req.packet.key.len(),
                            req_body_len: req.packet.value.len(),
                            resp_key_len: msg.packet.key.len(),
                            resp_body_len: msg.packet.value.len(),
                            duration,
                        };
                        if self.records.send(record).await.is_err() {
                            debug!("latency sink closed, discarding record");
                        }
                    } else {
                        stats.below += 1;
                    }
                }
            }
        }

        if !inflight.is_empty() {
            debug!(
                outstanding = inflight.len(),
                "discarding requests unmatched at end of capture"
            );
        }
        stats
    }
}
