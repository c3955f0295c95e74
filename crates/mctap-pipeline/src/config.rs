use std::time::Duration;

use mctap_proto::{KeyBounds, DEFAULT_MAX_BODY};

/// Analyzer configuration, constructed once at startup and passed by
/// reference into the router, parsers, and correlator.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Resynchronize after corrupt framing instead of ending the flow.
    pub recover: bool,
    /// Acceptable key length bounds for request validation.
    pub key_bounds: KeyBounds,
    /// Maximum acceptable total body length per packet.
    pub max_body_len: usize,
    /// Minimum request/response latency worth reporting individually.
    pub threshold: Duration,
    /// Well-known server port used for role inference.
    pub server_port: u16,
    /// Log per-flow summaries as they complete.
    pub verbose: bool,
    /// Bounded capacity of each flow's chunk queue.
    pub flow_queue_capacity: usize,
    /// Bounded capacity of the correlator and reporter event queues.
    pub event_queue_capacity: usize,
    /// When set, pace ingestion so capture time elapses at this multiple
    /// of wall-clock time. `None` runs at full speed.
    pub time_scale: Option<f64>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            recover: true,
            key_bounds: KeyBounds::default(),
            max_body_len: DEFAULT_MAX_BODY,
            threshold: Duration::from_millis(1),
            server_port: 11211,
            verbose: false,
            flow_queue_capacity: 10_000,
            event_queue_capacity: 100_000,
            time_scale: None,
        }
    }
}
