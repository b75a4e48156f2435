use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace};

/// This is the abstraction of the unreliable, packet-oriented transport that the protocol runs
///  on. It is introduced to keep socket I/O out of the protocol state machines, and to
///  facilitate mocking and lossy simulation for testing.
///
/// Implementations may lose, reorder or duplicate packets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramEndpoint: Send + Sync + 'static {
    /// Best effort: failures and drops are not reported to the caller.
    async fn send(&self, packet_buf: &[u8]);

    /// Waits for the next packet. `None` means that a receive attempt was dropped, which is not a
    ///  connection event - callers should simply try again.
    async fn recv(&self) -> Option<Bytes>;
}

/// Datagram size that comfortably holds a maximum-size packet
const RECEIVE_BUFFER_LEN: usize = 2048;

/// A [DatagramEndpoint] on a UDP socket talking to a single peer, with optional simulated loss:
///  each outgoing datagram and each receive attempt is dropped with `loss_probability`.
pub struct UdpEndpoint {
    socket: UdpSocket,
    peer_addr: SocketAddr,
    loss_probability: f64,
}

impl UdpEndpoint {
    pub async fn bind(local_addr: SocketAddr, peer_addr: SocketAddr, loss_probability: f64) -> anyhow::Result<UdpEndpoint> {
        if !(0.0..1.0).contains(&loss_probability) {
            anyhow::bail!("loss probability must be in [0, 1), was {}", loss_probability);
        }

        let socket = UdpSocket::bind(local_addr).await?;
        info!("bound UDP endpoint to {:?}, peer is {:?}", socket.local_addr()?, peer_addr);

        Ok(UdpEndpoint {
            socket,
            peer_addr,
            loss_probability,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn is_dropped(&self) -> bool {
        self.loss_probability > 0.0 && rand::random::<f64>() < self.loss_probability
    }
}

#[async_trait]
impl DatagramEndpoint for UdpEndpoint {
    async fn send(&self, packet_buf: &[u8]) {
        if self.is_dropped() {
            debug!("simulated loss: dropping outgoing packet to {:?}", self.peer_addr);
            return;
        }

        trace!("UDP endpoint: sending packet to {:?}", self.peer_addr);
        if let Err(e) = self.socket.send_to(packet_buf, self.peer_addr).await {
            error!("error sending UDP packet to {:?}: {}", self.peer_addr, e);
        }
    }

    async fn recv(&self) -> Option<Bytes> {
        let mut buf = vec![0u8; RECEIVE_BUFFER_LEN];
        let (num_read, from) = match self.socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                return None;
            }
        };

        if from != self.peer_addr {
            debug!("received packet from unexpected address {:?} - dropping", from);
            return None;
        }
        if self.is_dropped() {
            debug!("simulated loss: dropping incoming packet from {:?}", from);
            return None;
        }

        buf.truncate(num_read);
        Some(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;
    use tokio::time::timeout;

    #[rstest]
    #[case::negative(-0.1)]
    #[case::one(1.0)]
    #[case::above_one(1.5)]
    #[tokio::test]
    async fn test_bind_rejects_invalid_loss_probability(#[case] loss_probability: f64) {
        let result = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), "127.0.0.1:9".parse().unwrap(), loss_probability).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_recv_between_peers() {
        let socket_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr_a = socket_a.local_addr().unwrap();
        drop(socket_a);

        let b = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), addr_a, 0.0).await.unwrap();
        let a = UdpEndpoint::bind(addr_a, b.local_addr().unwrap(), 0.0).await.unwrap();

        a.send(b"hello").await;
        let received = timeout(Duration::from_secs(5), b.recv()).await.unwrap();
        assert_eq!(received, Some(Bytes::from_static(b"hello")));

        b.send(b"world").await;
        let received = timeout(Duration::from_secs(5), a.recv()).await.unwrap();
        assert_eq!(received, Some(Bytes::from_static(b"world")));
    }

    #[tokio::test]
    async fn test_recv_drops_packets_from_strangers() {
        let endpoint = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), "127.0.0.1:9".parse().unwrap(), 0.0).await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stranger.send_to(b"noise", endpoint.local_addr().unwrap()).await.unwrap();

        let received = timeout(Duration::from_secs(5), endpoint.recv()).await.unwrap();
        assert_eq!(received, None);
    }
}
