//! Offline analysis pipeline for memcached binary-protocol captures.
//!
//! The pipeline mirrors the shape of the traffic it analyzes: a
//! capture source yields TCP segments, a router files them into
//! per-flow byte streams, one parser task per flow decodes and
//! validates messages, and two singleton tasks consume the resulting
//! event fan-in. The correlator pairs requests with responses and
//! emits a latency record per slow match; the reporter tallies the
//! aggregate summary. Channels are bounded end to end, so a slow
//! consumer backpressures ingestion instead of growing queues.

pub mod config;
pub mod correlate;
pub mod error;
pub mod event;
pub mod pacer;
pub mod parser;
pub mod report;
pub mod router;
pub mod segment;
pub mod source;
pub mod stream;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use config::AnalyzerConfig;
pub use correlate::{Correlator, CorrelatorStats};
pub use error::{PipelineError, Result};
pub use event::{FlowSummary, LatencyRecord, MessageEvent, TapEvent};
pub use report::{CaptureSummary, Reporter};
pub use router::{FlowRouter, RouterStats};
pub use segment::{Segment, TcpFlags};
pub use source::CaptureSource;

/// Everything one analysis run produces besides the latency records
/// streamed out while it ran.
#[derive(Debug)]
pub struct AnalysisReport {
    pub router: RouterStats,
    pub correlator: CorrelatorStats,
    pub summary: CaptureSummary,
}

/// Run the full pipeline over a segment sequence.
///
/// Latency records for above-threshold matches are streamed to
/// `records` as they are found; the report comes back once the source
/// is exhausted and every task has drained.
pub async fn run<I>(
    cfg: Arc<AnalyzerConfig>,
    segments: I,
    records: mpsc::Sender<LatencyRecord>,
) -> Result<AnalysisReport>
where
    I: IntoIterator<Item = Result<Segment>>,
{
    let (correlator_tx, correlator_rx) = mpsc::channel(cfg.event_queue_capacity);
    let (reporter_tx, reporter_rx) = mpsc::channel(cfg.event_queue_capacity);

    let correlator =
        tokio::spawn(Correlator::new(correlator_rx, cfg.threshold, records).run());
    let reporter = tokio::spawn(Reporter::new(reporter_rx).run());

    let router = FlowRouter::new(cfg, correlator_tx, reporter_tx);
    let router_stats = router.run(segments).await;

    // The router dropped the last event senders, so both tasks finish
    // once their queues drain.
    let correlator_stats = correlator.await?;
    let summary = reporter.await?;

    Ok(AnalysisReport {
        router: router_stats,
        correlator: correlator_stats,
        summary,
    })
}
