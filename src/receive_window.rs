use std::collections::BTreeMap;
use anyhow::bail;
use bytes::Bytes;
use tracing::{debug, trace};

/// What the receiver has to do after processing a DATA packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataOutcome {
    /// payloads that became deliverable in order, oldest first
    pub delivered: Vec<Bytes>,
    /// the cumulative sequence number to acknowledge, if an ACK is to be sent
    pub ack: Option<u32>,
}

impl DataOutcome {
    fn dropped() -> DataOutcome {
        DataOutcome {
            delivered: Vec::new(),
            ack: None,
        }
    }
}

/// The receive window's bookkeeping, independent of I/O.
///
/// The window's position is determined by `last_frame_received`, the highest sequence number
///  that was delivered in order. Packets in `(last_frame_received, last_frame_received + N]`
///  are accepted and buffered until all packets before them arrived.
pub struct ReceiveWindow {
    window_size: u32,

    /// `None` until the first packet (sequence number 0) is delivered
    last_frame_received: Option<u32>,

    /// received packets that can not be delivered yet because of a gap before them
    receive_buffer: BTreeMap<u32, Bytes>,
}

impl ReceiveWindow {
    pub fn new(window_size: u32) -> anyhow::Result<ReceiveWindow> {
        if window_size == 0 {
            bail!("window size must be at least 1");
        }
        Ok(ReceiveWindow {
            window_size,
            last_frame_received: None,
            receive_buffer: BTreeMap::default(),
        })
    }

    pub fn last_frame_received(&self) -> Option<u32> {
        self.last_frame_received
    }

    pub fn num_buffered(&self) -> usize {
        self.receive_buffer.len()
    }

    /// the lowest sequence number that was not delivered yet
    fn next_expected(&self) -> u64 {
        self.last_frame_received
            .map(|seq| seq as u64 + 1)
            .unwrap_or(0)
    }

    /// the highest sequence number inside the window, i.e. `last_frame_received + N` with
    ///  `last_frame_received` starting at -1
    pub fn largest_acceptable_frame(&self) -> u64 {
        self.next_expected() + self.window_size as u64 - 1
    }

    pub fn on_data(&mut self, sequence_number: u32, payload: Bytes) -> DataOutcome {
        if sequence_number as u64 > self.largest_acceptable_frame() {
            debug!("packet #{} is beyond the receive window (largest acceptable #{}) - dropping", sequence_number, self.largest_acceptable_frame());
            return DataOutcome::dropped();
        }

        if (sequence_number as u64) < self.next_expected() {
            debug!("packet #{} was delivered before - re-acknowledging", sequence_number);
            return DataOutcome {
                delivered: Vec::new(),
                ack: self.last_frame_received,
            };
        }

        if self.receive_buffer.insert(sequence_number, payload).is_some() {
            trace!("replaced buffered duplicate of packet #{}", sequence_number);
        }

        let largest_acceptable_frame = self.largest_acceptable_frame();
        let mut ack_cursor = self.last_frame_received;
        let mut delivered = Vec::new();

        loop {
            let next = match ack_cursor {
                None => 0,
                Some(seq) => match seq.checked_add(1) {
                    Some(next) => next,
                    None => break,
                },
            };
            if next as u64 > largest_acceptable_frame {
                break;
            }

            match self.receive_buffer.remove(&next) {
                Some(payload) => {
                    delivered.push(payload);
                    ack_cursor = Some(next);
                }
                None => break,
            }
        }

        if delivered.is_empty() {
            trace!("packet #{} buffered, waiting for #{}", sequence_number, self.next_expected());
        }
        else {
            trace!("delivering {} packet(s) up to #{:?}", delivered.len(), ack_cursor);
        }

        self.last_frame_received = ack_cursor;
        DataOutcome {
            delivered,
            ack: self.last_frame_received,
        }
    }
}
