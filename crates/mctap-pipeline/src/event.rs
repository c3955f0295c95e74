use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mctap_proto::{Packet, Role};

/// A validated protocol event emitted by a flow parser.
#[derive(Debug, Clone)]
pub enum TapEvent {
    /// A framed, validated packet.
    Message(MessageEvent),
    /// A flow's parser finished; no more events will arrive from it.
    FlowClosed(FlowSummary),
}

#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Flow name: the client endpoint of the connection, shared by both
    /// directions so correlation keys line up.
    pub flow: Arc<str>,
    pub role: Role,
    /// Capture timestamp of the chunk that completed this packet.
    pub ts: SystemTime,
    pub packet: Packet,
}

/// End-of-flow accounting from one parser task.
#[derive(Debug, Clone)]
pub struct FlowSummary {
    pub flow: Arc<str>,
    pub role: Role,
    /// Packets successfully framed (valid or not).
    pub messages: u64,
    /// Bytes skipped during resync plus bytes never parsed.
    pub skipped_bytes: u64,
}

/// One correlated request/response pair that exceeded the reporting
/// threshold.
#[derive(Debug, Clone)]
pub struct LatencyRecord {
    /// Capture timestamp of the request.
    pub ts: SystemTime,
    pub flow: Arc<str>,
    pub opcode: u8,
    pub req_key_len: usize,
    pub req_body_len: usize,
    pub resp_key_len: usize,
    pub resp_body_len: usize,
    pub duration: Duration,
}
