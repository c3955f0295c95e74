//! Aggregate reporting.
//!
//! A single task tallies per-opcode message counts, the distinct
//! vbuckets each opcode touched, and the bytes no parser understood.
//! The resulting summary is handed back to the caller for formatting;
//! this crate does no output of its own.

use std::collections::HashMap;

use mctap_proto::Role;
use tokio::sync::mpsc;

use crate::event::{FlowSummary, TapEvent};

/// Aggregate view of one capture run.
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    /// Message count per opcode, requests and responses combined.
    pub opcode_counts: [u64; 256],
    /// Distinct vbuckets seen per opcode, in first-seen order.
    /// Taken from requests only; the same wire field carries the
    /// status code in responses.
    pub vbuckets: HashMap<u8, Vec<u16>>,
    /// Total bytes skipped or never parsed, across all flows.
    pub unparsed_bytes: u64,
    /// Total validated messages.
    pub messages: u64,
    /// Per-flow accounting, in completion order.
    pub flows: Vec<FlowSummary>,
}

pub struct Reporter {
    events: mpsc::Receiver<TapEvent>,
}

impl Reporter {
    pub fn new(events: mpsc::Receiver<TapEvent>) -> Self {
        Self { events }
    }

    /// Tally events until every parser is done.
    pub async fn run(mut self) -> CaptureSummary {
        let mut summary = CaptureSummary {
            opcode_counts: [0; 256],
            vbuckets: HashMap::new(),
            unparsed_bytes: 0,
            messages: 0,
            flows: Vec::new(),
        };

        while let Some(event) = self.events.recv().await {
            match event {
                TapEvent::Message(msg) => {
                    summary.messages += 1;
                    summary.opcode_counts[msg.packet.opcode as usize] += 1;
                    if msg.role == Role::Client {
                        let seen = summary.vbuckets.entry(msg.packet.opcode).or_default();
                        if !seen.contains(&msg.packet.vbucket) {
                            seen.push(msg.packet.vbucket);
                        }
                    }
                }
                TapEvent::FlowClosed(flow) => {
                    summary.unparsed_bytes += flow.skipped_bytes;
                    summary.flows.push(flow);
                }
            }
        }
        summary
    }
}
