//! Per-flow ordered byte stream.
//!
//! The router pushes `(timestamp, chunk)` pairs on a bounded queue; the
//! flow's parser reads them back as one continuous byte sequence.
//! Chunk boundaries carry no meaning at the protocol layer, but each
//! chunk's capture timestamp is retained so protocol events can be
//! stamped with wire-clock time.

use std::time::SystemTime;

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::mpsc;

/// Signals that the flow's queue is closed and fully drained.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamEnded;

#[derive(Debug)]
struct Chunk {
    ts: SystemTime,
    bytes: Bytes,
}

/// Create a bounded flow channel: one producer handle for the router,
/// one byte stream for the parser.
pub fn flow_channel(capacity: usize) -> (FlowSender, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        FlowSender { tx },
        ByteStream {
            rx,
            buf: BytesMut::new(),
            ts: SystemTime::UNIX_EPOCH,
        },
    )
}

/// Producer side of a flow's byte stream. Held only by the router.
#[derive(Debug)]
pub struct FlowSender {
    tx: mpsc::Sender<Chunk>,
}

impl FlowSender {
    /// Enqueue a payload chunk, suspending while the queue is full.
    ///
    /// A closed receiver means the parser already ended; the chunk is
    /// silently discarded in that case.
    pub async fn push(&self, ts: SystemTime, bytes: Bytes) {
        let _ = self.tx.send(Chunk { ts, bytes }).await;
    }

    /// Close the stream, signaling end-of-input to the parser.
    pub fn close(self) {}
}

/// Consumer side of a flow's byte stream. Owned by exactly one parser.
#[derive(Debug)]
pub struct ByteStream {
    rx: mpsc::Receiver<Chunk>,
    buf: BytesMut,
    ts: SystemTime,
}

impl ByteStream {
    /// Pull one more chunk into the buffer, suspending until the
    /// producer queues one or closes the stream.
    pub async fn fill(&mut self) -> Result<(), StreamEnded> {
        match self.rx.recv().await {
            Some(chunk) => {
                self.ts = chunk.ts;
                self.buf.extend_from_slice(&chunk.bytes);
                Ok(())
            }
            None => Err(StreamEnded),
        }
    }

    /// The buffered-but-unparsed bytes.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Capture timestamp of the most recently consumed chunk.
    pub fn timestamp(&self) -> SystemTime {
        self.ts
    }

    /// Scan forward for `marker`, discarding everything before it.
    ///
    /// Returns the number of bytes skipped and whether the marker was
    /// found before end-of-stream. The marker byte itself is left in
    /// the buffer.
    pub async fn skip_until(&mut self, marker: u8) -> (u64, bool) {
        let mut skipped = 0u64;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == marker) {
                skipped += pos as u64;
                self.buf.advance(pos);
                return (skipped, true);
            }
            skipped += self.buf.len() as u64;
            self.buf.clear();
            if self.fill().await.is_err() {
                return (skipped, false);
            }
        }
    }

    /// Consume everything still buffered or queued, returning the byte
    /// count. Used at parser shutdown so the producer never blocks on a
    /// dead consumer.
    pub async fn drain(mut self) -> u64 {
        let mut drained = self.buf.len() as u64;
        self.buf.clear();
        while let Some(chunk) = self.rx.recv().await {
            drained += chunk.bytes.len() as u64;
        }
        drained
    }
}
