use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};
use crate::config::SwpConfig;
use crate::endpoint::DatagramEndpoint;
use crate::packet::{Packet, PacketKind};
use crate::send_window::SendWindow;

/// A packet that was sent but not acknowledged yet, together with the task that re-sends it
///  until it is acknowledged
struct OutstandingPacket {
    encoded: Bytes,
    num_transmissions: u32,
    retransmit_handle: JoinHandle<()>,
}

struct SenderInner {
    endpoint: Arc<dyn DatagramEndpoint>,

    /// the sequence number that the next DATA packet will get
    next_sequence_number: u32,

    /// All packets that are in flight, keyed by sequence number. An entry and its retransmission
    ///  timer are created together and dropped together.
    outstanding: BTreeMap<u32, OutstandingPacket>,
}

impl SenderInner {
    /// Removes all outstanding packets with sequence numbers up to and including
    ///  `sequence_number`, cancelling their retransmission timers. Returns the number of removed
    ///  packets, which is zero for a stale or duplicate ACK.
    fn acknowledge_up_to(&mut self, sequence_number: u32) -> usize {
        let acknowledged = self.outstanding.range(..=sequence_number)
            .map(|(&seq, _)| seq)
            .collect::<Vec<_>>();

        for seq in &acknowledged {
            if let Some(packet) = self.outstanding.remove(seq) {
                // aborting a finished task is a no-op
                packet.retransmit_handle.abort();
                trace!("packet #{} acknowledged after {} transmission(s)", seq, packet.num_transmissions);
            }
        }
        acknowledged.len()
    }
}

impl Drop for SenderInner {
    fn drop(&mut self) {
        for packet in self.outstanding.values() {
            packet.retransmit_handle.abort();
        }
    }
}

/// The sending side of a connection: application data passed to [Sender::send] is sliced into
///  DATA packets with increasing sequence numbers, and each packet is re-sent periodically until
///  a cumulative ACK covers it.
///
/// At most `window_size` packets are in flight at any given time; `send` waits for
///  acknowledgements when the window is full.
pub struct Sender {
    config: Arc<SwpConfig>,
    inner: Arc<Mutex<SenderInner>>,
    window: Arc<SendWindow>,
    endpoint: Arc<dyn DatagramEndpoint>,
    /// keeps the chunks of concurrent `send` calls from interleaving
    send_serializer: Mutex<()>,
    ack_loop_handle: Option<JoinHandle<()>>,
}

impl Drop for Sender {
    fn drop(&mut self) {
        if let Some(handle) = self.ack_loop_handle.take() {
            handle.abort();
        }
    }
}

impl Sender {
    /// Creates a sender without processing incoming ACKs - call [Sender::spawn_ack_loop] for
    ///  that, or use [Sender::spawn] to do both.
    pub fn new(config: Arc<SwpConfig>, endpoint: Arc<dyn DatagramEndpoint>) -> anyhow::Result<Sender> {
        config.validate()?;

        let inner = SenderInner {
            endpoint: endpoint.clone(),
            next_sequence_number: 0,
            outstanding: BTreeMap::default(),
        };

        Ok(Sender {
            window: Arc::new(SendWindow::new(config.window_size)),
            config,
            inner: Arc::new(Mutex::new(inner)),
            endpoint,
            send_serializer: Mutex::new(()),
            ack_loop_handle: None,
        })
    }

    /// Creates a sender and starts its ACK loop. This must be called from inside a tokio runtime.
    pub fn spawn(config: Arc<SwpConfig>, endpoint: Arc<dyn DatagramEndpoint>) -> anyhow::Result<Sender> {
        let mut sender = Sender::new(config, endpoint)?;
        sender.spawn_ack_loop();
        Ok(sender)
    }

    pub fn spawn_ack_loop(&mut self) {
        if self.ack_loop_handle.is_some() {
            warn!("ACK loop already spawned");
            return;
        }
        self.ack_loop_handle = Some(tokio::spawn(Self::ack_loop(self.inner.clone(), self.window.clone(), self.endpoint.clone())));
    }

    /// Sends `data` reliably, sliced into packets of at most `max_payload_len` bytes. This
    ///  returns once the last packet is handed to the endpoint, not when it is acknowledged.
    pub async fn send(&self, data: &[u8]) {
        let _serialized = self.send_serializer.lock().await;

        debug!("sending {} bytes", data.len());
        for chunk in data.chunks(self.config.max_payload_len) {
            self.transmit(Bytes::copy_from_slice(chunk)).await;
        }
    }

    async fn transmit(&self, chunk: Bytes) {
        self.window.acquire().await;

        let mut inner = self.inner.lock().await;

        let sequence_number = inner.next_sequence_number;
        inner.next_sequence_number = sequence_number.wrapping_add(1);

        let packet = Packet {
            kind: PacketKind::Data,
            sequence_number,
            payload: chunk,
        };
        let encoded = packet.encode();

        let retransmit_handle = tokio::spawn(Self::retransmit_loop(
            Arc::downgrade(&self.inner),
            sequence_number,
            self.config.retransmit_timeout,
        ));
        inner.outstanding.insert(sequence_number, OutstandingPacket {
            encoded: encoded.clone(),
            num_transmissions: 1,
            retransmit_handle,
        });

        trace!("sending {}", packet);
        inner.endpoint.send(&encoded).await;
    }

    /// Re-sends a packet every `timeout` for as long as it is outstanding
    async fn retransmit_loop(inner: Weak<Mutex<SenderInner>>, sequence_number: u32, timeout: Duration) {
        loop {
            time::sleep(timeout).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut inner = inner.lock().await;
            let endpoint = inner.endpoint.clone();

            let Some(packet) = inner.outstanding.get_mut(&sequence_number) else {
                trace!("retransmission timer for packet #{} fired after acknowledgement", sequence_number);
                return;
            };

            packet.num_transmissions += 1;
            debug!("no ACK for packet #{} - retransmitting (transmission #{})", sequence_number, packet.num_transmissions);
            let encoded = packet.encoded.clone();

            endpoint.send(&encoded).await;
        }
    }

    /// Processes a cumulative ACK for `sequence_number` as if it was received from the peer
    pub async fn on_ack(&self, sequence_number: u32) {
        Self::do_on_ack(&self.inner, &self.window, sequence_number).await
    }

    async fn do_on_ack(inner: &Mutex<SenderInner>, window: &SendWindow, sequence_number: u32) {
        let mut inner = inner.lock().await;

        let num_acknowledged = inner.acknowledge_up_to(sequence_number);
        if num_acknowledged == 0 {
            trace!("ACK #{} does not acknowledge any outstanding packets", sequence_number);
            return;
        }

        trace!("ACK #{} acknowledged {} packet(s), {} still in flight", sequence_number, num_acknowledged, inner.outstanding.len());
        if let Err(e) = window.release(num_acknowledged) {
            warn!("ACK #{}: {} - this points to a duplicate ACK race", sequence_number, e);
        }
    }

    /// Active loop - this function never returns, it runs until it is taken out of dispatch
    async fn ack_loop(inner: Arc<Mutex<SenderInner>>, window: Arc<SendWindow>, endpoint: Arc<dyn DatagramEndpoint>) {
        info!("starting ACK loop");

        loop {
            let Some(buf) = endpoint.recv().await else {
                trace!("receive attempt dropped");
                continue;
            };

            let packet = match Packet::decode(&buf) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("{} - dropping", e);
                    continue;
                }
            };
            trace!("received {}", packet);

            if packet.kind != PacketKind::Ack {
                debug!("sender received {} - ignoring", packet);
                continue;
            }

            Self::do_on_ack(&inner, &window, packet.sequence_number).await;
        }
    }

    /// Waits until every packet sent so far is acknowledged
    pub async fn flush(&self) {
        self.window.wait_until_idle().await;
    }

    pub async fn num_outstanding(&self) -> usize {
        self.inner.lock().await.outstanding.len()
    }

    pub async fn next_sequence_number(&self) -> u32 {
        self.inner.lock().await.next_sequence_number
    }

    /// how often an outstanding packet was sent so far, or `None` if it is not outstanding
    pub async fn transmission_count(&self, sequence_number: u32) -> Option<u32> {
        self.inner.lock().await
            .outstanding.get(&sequence_number)
            .map(|p| p.num_transmissions)
    }

    pub fn available_permits(&self) -> usize {
        self.window.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MockDatagramEndpoint;
    use crate::test_util::channel_endpoint::{channel_pair, DropPolicy};
    use rstest::rstest;
    use std::sync::Mutex as StdMutex;
    use tokio::runtime::Builder;
    use tokio::time::timeout;

    fn config(window_size: u32, max_payload_len: usize) -> Arc<SwpConfig> {
        Arc::new(SwpConfig {
            window_size,
            retransmit_timeout: Duration::from_secs(1),
            max_payload_len,
        })
    }

    /// a mock endpoint that records everything sent through it
    fn recording_endpoint() -> (MockDatagramEndpoint, Arc<StdMutex<Vec<Packet>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sent_clone = sent.clone();

        let mut endpoint = MockDatagramEndpoint::new();
        endpoint.expect_send()
            .returning(move |buf| {
                sent_clone.lock().unwrap().push(Packet::decode(buf).unwrap());
            });
        (endpoint, sent)
    }

    #[rstest]
    #[case::empty(0, 10, vec![])]
    #[case::single_byte(1, 10, vec![1])]
    #[case::exactly_one_packet(10, 10, vec![10])]
    #[case::one_byte_more(11, 10, vec![10, 1])]
    #[case::several(35, 10, vec![10, 10, 10, 5])]
    #[case::max_payload(3000, 1400, vec![1400, 1400, 200])]
    fn test_send_slices_data(#[case] data_len: usize, #[case] max_payload_len: usize, #[case] expected_chunk_lens: Vec<usize>) {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (endpoint, sent) = recording_endpoint();
            let sender = Sender::new(config(8, max_payload_len), Arc::new(endpoint)).unwrap();

            let data = (0..data_len).map(|i| i as u8).collect::<Vec<_>>();
            sender.send(&data).await;

            let sent = sent.lock().unwrap().clone();
            assert_eq!(sent.iter().map(|p| p.payload.len()).collect::<Vec<_>>(), expected_chunk_lens);
            assert!(sent.iter().all(|p| p.kind == PacketKind::Data));
            assert_eq!(sent.iter().map(|p| p.sequence_number).collect::<Vec<_>>(), (0..expected_chunk_lens.len() as u32).collect::<Vec<_>>());

            let reassembled = sent.iter()
                .flat_map(|p| p.payload.iter().cloned())
                .collect::<Vec<_>>();
            assert_eq!(reassembled, data);

            assert_eq!(sender.num_outstanding().await, expected_chunk_lens.len());
            assert_eq!(sender.next_sequence_number().await, expected_chunk_lens.len() as u32);
            assert_eq!(sender.available_permits(), 8 - expected_chunk_lens.len());
        });
    }

    #[rstest]
    #[case::first(5, 0, 4, 2)]
    #[case::cumulative(5, 2, 2, 4)]
    #[case::all(5, 4, 0, 6)]
    #[case::beyond_sent(5, 100, 0, 6)]
    fn test_on_ack(#[case] num_sent: u32, #[case] ack: u32, #[case] expected_outstanding: usize, #[case] expected_permits: usize) {
        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async {
            let (endpoint, _) = recording_endpoint();
            let sender = Sender::new(config(6, 10), Arc::new(endpoint)).unwrap();

            for i in 0..num_sent {
                sender.send(&[i as u8]).await;
            }
            sender.on_ack(ack).await;

            assert_eq!(sender.num_outstanding().await, expected_outstanding);
            assert_eq!(sender.available_permits(), expected_permits);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ack_releases_permits_once() {
        let (endpoint, _) = recording_endpoint();
        let sender = Sender::new(config(3, 10), Arc::new(endpoint)).unwrap();

        sender.send(b"a").await;
        sender.send(b"b").await;
        assert_eq!(sender.available_permits(), 1);

        sender.on_ack(0).await;
        assert_eq!(sender.available_permits(), 2);
        sender.on_ack(0).await;
        assert_eq!(sender.available_permits(), 2);

        sender.on_ack(1).await;
        sender.on_ack(1).await;
        sender.on_ack(0).await;
        assert_eq!(sender.available_permits(), 3);
        assert_eq!(sender.num_outstanding().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_blocks_on_full_window() {
        let (endpoint, sent) = recording_endpoint();
        let sender = Arc::new(Sender::new(config(2, 10), Arc::new(endpoint)).unwrap());

        let s = sender.clone();
        let send_task = tokio::spawn(async move {
            s.send(&[7u8; 40]).await;
        });

        // let retransmissions happen while the window is full
        time::sleep(Duration::from_millis(2500)).await;
        assert!(!send_task.is_finished());
        assert_eq!(sender.num_outstanding().await, 2);

        let distinct = sent.lock().unwrap().iter()
            .map(|p| p.sequence_number)
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(distinct.into_iter().collect::<Vec<_>>(), vec![0, 1]);

        sender.on_ack(0).await;
        sender.on_ack(1).await;
        timeout(Duration::from_millis(100), send_task).await.unwrap().unwrap();

        assert_eq!(sender.next_sequence_number().await, 4);
        assert_eq!(sender.num_outstanding().await, 2);

        sender.on_ack(3).await;
        assert_eq!(sender.num_outstanding().await, 0);
        assert_eq!(sender.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmits_until_acknowledged() {
        let (endpoint, sent) = recording_endpoint();
        let sender = Sender::new(config(5, 10), Arc::new(endpoint)).unwrap();

        sender.send(b"abc").await;
        sender.send(b"def").await;
        assert_eq!(sent.lock().unwrap().len(), 2);

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(sender.transmission_count(0).await, Some(4));
        assert_eq!(sender.transmission_count(1).await, Some(4));

        {
            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 8);
            for p in sent.iter() {
                let expected: &[u8] = if p.sequence_number == 0 { b"abc" } else { b"def" };
                assert_eq!(p.payload.as_ref(), expected);
            }
        }

        sender.on_ack(0).await;
        assert_eq!(sender.transmission_count(0).await, None);

        time::sleep(Duration::from_secs(2)).await;
        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 10);
        assert!(sent[8..].iter().all(|p| p.sequence_number == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_loop_processes_acks_from_peer() {
        let (local, peer) = channel_pair(DropPolicy::Never, DropPolicy::Never);
        let sender = Sender::spawn(config(4, 10), Arc::new(local)).unwrap();

        sender.send(&[1u8; 30]).await;
        assert_eq!(sender.num_outstanding().await, 3);

        // noise and non-ACK packets are ignored
        peer.send(&[1, 2]).await;
        peer.send(b"X0000").await;
        peer.send(&Packet::data(2, Bytes::from_static(b"x")).unwrap().encode()).await;
        peer.send(&Packet::ack(1).encode()).await;

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sender.num_outstanding().await, 1);
        assert_eq!(sender.available_permits(), 3);

        peer.send(&Packet::ack(2).encode()).await;
        timeout(Duration::from_millis(100), sender.flush()).await.unwrap();
        assert_eq!(sender.num_outstanding().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_do_not_interleave() {
        let (endpoint, sent) = recording_endpoint();
        let sender = Arc::new(Sender::new(config(16, 2), Arc::new(endpoint)).unwrap());

        let s1 = sender.clone();
        let s2 = sender.clone();
        let t1 = tokio::spawn(async move { s1.send(b"aaaaaa").await });
        let t2 = tokio::spawn(async move { s2.send(b"bbbbbb").await });
        t1.await.unwrap();
        t2.await.unwrap();

        let payloads = sent.lock().unwrap().iter()
            .map(|p| p.payload.clone())
            .collect::<Vec<_>>();
        assert_eq!(payloads.len(), 6);
        assert!(payloads[..3].iter().all(|p| p == &payloads[0]));
        assert!(payloads[3..].iter().all(|p| p == &payloads[3]));
        assert_ne!(payloads[0], payloads[3]);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let endpoint = MockDatagramEndpoint::new();
        assert!(Sender::new(config(0, 10), Arc::new(endpoint)).is_err());
    }
}
