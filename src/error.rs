use thiserror::Error;

/// Packet-level anomalies and internal window checks. None of these is fatal: the receive loops
///  log and drop whatever produced them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwpError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A permit release would push the send window beyond its capacity. This points to an ACK
    ///  being processed twice, and it is absorbed rather than propagated.
    #[error("window overflow: releasing permits beyond capacity {capacity}")]
    WindowOverflow { capacity: u32 },

    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
}
