use std::sync::Arc;
use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use crate::config::SwpConfig;
use crate::endpoint::DatagramEndpoint;
use crate::packet::{Packet, PacketKind};
use crate::receive_window::ReceiveWindow;

struct ReceiverInner {
    window: ReceiveWindow,
    endpoint: Arc<dyn DatagramEndpoint>,
    delivery_queue: mpsc::UnboundedSender<Bytes>,
}

impl ReceiverInner {
    async fn on_packet(&mut self, buf: &[u8]) {
        let packet = match Packet::decode(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("{} - dropping", e);
                return;
            }
        };
        trace!("received {}", packet);

        if packet.kind != PacketKind::Data {
            debug!("receiver received {} - ignoring", packet);
            return;
        }

        let outcome = self.window.on_data(packet.sequence_number, packet.payload);

        for payload in outcome.delivered {
            if self.delivery_queue.send(payload).is_err() {
                warn!("delivery queue is closed - discarding payload");
            }
        }

        match outcome.ack {
            Some(ack) => {
                trace!("sending ACK #{}", ack);
                self.endpoint.send(&Packet::ack(ack).encode()).await;
            }
            None => {
                trace!("no cumulative sequence number to acknowledge");
            }
        }
    }
}

/// The receiving side of a connection: DATA packets arriving at the endpoint are buffered and
///  reordered, and their payloads are made available through [Receiver::recv] in the order they
///  were sent. Each packet is answered with a cumulative ACK for the highest sequence number
///  delivered in order so far.
pub struct Receiver {
    inner: Arc<Mutex<ReceiverInner>>,
    endpoint: Arc<dyn DatagramEndpoint>,
    delivered: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    receive_loop_handle: Option<JoinHandle<()>>,
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Some(handle) = self.receive_loop_handle.take() {
            handle.abort();
        }
    }
}

impl Receiver {
    /// Creates a receiver that does not read from the endpoint on its own - call
    ///  [Receiver::spawn_receive_loop] for that, or use [Receiver::spawn] to do both.
    pub fn new(config: Arc<SwpConfig>, endpoint: Arc<dyn DatagramEndpoint>) -> anyhow::Result<Receiver> {
        config.validate()?;

        let (delivery_queue, delivered) = mpsc::unbounded_channel();
        let inner = ReceiverInner {
            window: ReceiveWindow::new(config.window_size)?,
            endpoint: endpoint.clone(),
            delivery_queue,
        };

        Ok(Receiver {
            inner: Arc::new(Mutex::new(inner)),
            endpoint,
            delivered: Mutex::new(delivered),
            receive_loop_handle: None,
        })
    }

    /// Creates a receiver and starts its receive loop. This must be called from inside a tokio
    ///  runtime.
    pub fn spawn(config: Arc<SwpConfig>, endpoint: Arc<dyn DatagramEndpoint>) -> anyhow::Result<Receiver> {
        let mut receiver = Receiver::new(config, endpoint)?;
        receiver.spawn_receive_loop();
        Ok(receiver)
    }

    pub fn spawn_receive_loop(&mut self) {
        if self.receive_loop_handle.is_some() {
            warn!("receive loop already spawned");
            return;
        }
        self.receive_loop_handle = Some(tokio::spawn(Self::receive_loop(self.inner.clone(), self.endpoint.clone())));
    }

    /// Waits for the next chunk of data delivered in order. Chunk boundaries are those of the
    ///  packets, not of the original `send` calls.
    pub async fn recv(&self) -> anyhow::Result<Bytes> {
        self.delivered.lock().await
            .recv().await
            .ok_or_else(|| anyhow!("delivery queue was closed"))
    }

    /// Returns the next delivered chunk if there is one, without waiting
    pub async fn try_recv(&self) -> Option<Bytes> {
        self.delivered.lock().await
            .try_recv()
            .ok()
    }

    /// Processes a raw packet as if it was received from the endpoint
    pub async fn on_packet(&self, buf: &[u8]) {
        self.inner.lock().await
            .on_packet(buf).await
    }

    pub async fn last_frame_received(&self) -> Option<u32> {
        self.inner.lock().await.window.last_frame_received()
    }

    pub async fn num_buffered(&self) -> usize {
        self.inner.lock().await.window.num_buffered()
    }

    /// Active loop - this function never returns, it runs until it is taken out of dispatch
    async fn receive_loop(inner: Arc<Mutex<ReceiverInner>>, endpoint: Arc<dyn DatagramEndpoint>) {
        info!("starting receive loop");

        loop {
            let Some(buf) = endpoint.recv().await else {
                trace!("receive attempt dropped");
                continue;
            };

            inner.lock().await
                .on_packet(&buf).await;
        }
    }
}
