use std::time::{Instant, SystemTime};

/// Paces ingestion so capture time advances at a configured multiple of
/// wall-clock time. A scale of 1.0 replays the capture in real time;
/// 2.0 runs twice as fast.
#[derive(Debug)]
pub struct Pacer {
    scale: f64,
    started: Instant,
    first: Option<SystemTime>,
}

impl Pacer {
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            started: Instant::now(),
            first: None,
        }
    }

    /// Sleep long enough that the given capture timestamp does not run
    /// ahead of scaled wall-clock time.
    pub async fn pace(&mut self, pkt_ts: SystemTime) {
        if self.scale <= 0.0 {
            return;
        }
        let first = *self.first.get_or_insert(pkt_ts);
        let pkt_elapsed = pkt_ts.duration_since(first).unwrap_or_default();
        let local_elapsed = self.started.elapsed().mul_f64(self.scale);
        if let Some(ahead) = pkt_elapsed.checked_sub(local_elapsed) {
            tokio::time::sleep(ahead.div_f64(self.scale)).await;
        }
    }
}
