use std::time::Duration;
use anyhow::bail;
use crate::packet::MAX_PAYLOAD_LEN;

/// Configuration shared by both ends of a connection. Sender and receiver must agree on
///  `window_size`: the receiver drops packets beyond its window without acknowledging them, so a
///  bigger send window only causes pointless retransmissions.
#[derive(Debug, Clone)]
pub struct SwpConfig {
    /// This is the maximum number of *packets* (not bytes) that are in flight, i.e. sent but not
    ///  acknowledged, on the sender side. On the receiver side, it is the number of packets
    ///  beyond the last in-order delivery that are buffered.
    pub window_size: u32,

    /// A packet is re-sent if it was not acknowledged for this long after its last transmission.
    ///  This should be configured to a value somewhat above the RTT.
    pub retransmit_timeout: Duration,

    /// Application data is sliced into packets carrying at most this many bytes. This can not be
    ///  bigger than [MAX_PAYLOAD_LEN], but it may be smaller for networks with a smaller MTU.
    pub max_payload_len: usize,
}

impl Default for SwpConfig {
    fn default() -> Self {
        SwpConfig {
            window_size: 5,
            retransmit_timeout: Duration::from_secs(1),
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }
}

impl SwpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        if self.retransmit_timeout.is_zero() {
            bail!("retransmit timeout must be positive");
        }
        if self.max_payload_len == 0 {
            bail!("max payload length must be at least 1");
        }
        if self.max_payload_len > MAX_PAYLOAD_LEN {
            bail!("max payload length {} exceeds the protocol maximum of {}", self.max_payload_len, MAX_PAYLOAD_LEN);
        }

        Ok(())
    }
}
