use std::net::SocketAddr;
use std::time::SystemTime;

use bytes::Bytes;

/// TCP control flags relevant to flow lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    /// The connect-acknowledgment pattern: only servers send SYN+ACK.
    pub fn connect_ack(self) -> bool {
        self.syn && self.ack
    }

    /// A connection-establishing frame (SYN without ACK).
    pub fn connect(self) -> bool {
        self.syn && !self.ack
    }

    /// A reset or unidirectional termination signal. A pure ACK is
    /// never a teardown.
    pub fn teardown(self) -> bool {
        self.rst || self.fin
    }
}

/// One raw transport-layer payload chunk from the capture, in capture
/// order. Transient: consumed immediately by the flow router.
#[derive(Debug, Clone)]
pub struct Segment {
    pub ts: SystemTime,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub flags: TcpFlags,
    pub payload: Bytes,
}
