use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::mpsc;
use tracing::trace;
use crate::endpoint::DatagramEndpoint;

/// Decides which outgoing packets a [ChannelEndpoint] silently drops
#[derive(Debug, Clone)]
pub enum DropPolicy {
    Never,
    /// drops the n-th, 2n-th, 3n-th ... packet sent through the endpoint
    EveryNth(u64),
    /// drops each packet with a given probability, using a random sequence determined by `seed`
    Random { probability: f64, seed: u64 },
    /// drops packets whose (zero based) send attempt index is listed
    Indices(Vec<u64>),
}

impl DropPolicy {
    fn should_drop(&self, send_index: u64, rng: &mut impl RngCore) -> bool {
        match self {
            DropPolicy::Never => false,
            DropPolicy::EveryNth(n) => *n > 0 && (send_index + 1) % n == 0,
            DropPolicy::Random { probability, .. } => unit_interval(rng) < *probability,
            DropPolicy::Indices(indices) => indices.contains(&send_index),
        }
    }

    fn seed(&self) -> u64 {
        match self {
            DropPolicy::Random { seed, .. } => *seed,
            _ => 0,
        }
    }
}

/// uniformly distributed in [0, 1), from the upper 53 bits of a random u64
fn unit_interval(rng: &mut impl RngCore) -> f64 {
    (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// An in-memory [DatagramEndpoint], connected to exactly one peer endpoint. Packets arrive in the
///  order they were sent unless the policy drops them.
///
/// Send attempts are counted. The packets themselves are only kept if recording is switched on
///  with [ChannelEndpoint::with_recording], since a long running simulation with retransmissions
///  would otherwise accumulate them without bound.
pub struct ChannelEndpoint {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    drop_policy: DropPolicy,
    rng: Mutex<StdRng>,
    send_counter: AtomicU64,
    sent: Option<Mutex<Vec<Bytes>>>,
}

/// Creates two connected endpoints. `a_to_b` applies to packets sent by the first endpoint,
///  `b_to_a` to packets sent by the second.
pub fn channel_pair(a_to_b: DropPolicy, b_to_a: DropPolicy) -> (ChannelEndpoint, ChannelEndpoint) {
    let (tx_a, rx_b) = mpsc::unbounded_channel();
    let (tx_b, rx_a) = mpsc::unbounded_channel();

    (
        ChannelEndpoint::new(tx_a, rx_a, a_to_b),
        ChannelEndpoint::new(tx_b, rx_b, b_to_a),
    )
}

impl ChannelEndpoint {
    fn new(tx: mpsc::UnboundedSender<Bytes>, rx: mpsc::UnboundedReceiver<Bytes>, drop_policy: DropPolicy) -> ChannelEndpoint {
        ChannelEndpoint {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            rng: Mutex::new(StdRng::seed_from_u64(drop_policy.seed())),
            drop_policy,
            send_counter: AtomicU64::new(0),
            sent: None,
        }
    }

    /// keep a copy of every packet passed to `send` from now on, see [ChannelEndpoint::sent_packets]
    pub fn with_recording(mut self) -> ChannelEndpoint {
        self.sent = Some(Mutex::new(Vec::new()));
        self
    }

    /// all packets passed to `send` while recording, including those that were dropped
    pub fn sent_packets(&self) -> Vec<Bytes> {
        match &self.sent {
            None => Vec::new(),
            Some(sent) => match sent.lock() {
                Ok(sent) => sent.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
        }
    }

    fn should_drop(&self, send_index: u64) -> bool {
        match self.rng.lock() {
            Ok(mut rng) => self.drop_policy.should_drop(send_index, &mut *rng),
            Err(poisoned) => self.drop_policy.should_drop(send_index, &mut *poisoned.into_inner()),
        }
    }

    pub fn num_sent(&self) -> u64 {
        self.send_counter.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DatagramEndpoint for ChannelEndpoint {
    async fn send(&self, packet_buf: &[u8]) {
        let packet = Bytes::copy_from_slice(packet_buf);
        if let Some(sent) = &self.sent {
            match sent.lock() {
                Ok(mut sent) => sent.push(packet.clone()),
                Err(poisoned) => poisoned.into_inner().push(packet.clone()),
            }
        }

        let send_index = self.send_counter.fetch_add(1, Ordering::AcqRel);
        if self.should_drop(send_index) {
            trace!("channel endpoint: dropping packet #{} of {} bytes", send_index, packet.len());
            return;
        }

        // the peer going away is just another way of losing packets
        let _ = self.tx.send(packet);
    }

    async fn recv(&self) -> Option<Bytes> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(packet) => Some(packet),
            None => {
                // the peer is gone and nothing will ever arrive
                drop(rx);
                std::future::pending::<Option<Bytes>>().await
            }
        }
    }
}
