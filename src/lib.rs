//! A sliding window protocol for reliable, in-order delivery of a byte stream from one sender to
//!  one receiver over an unreliable datagram transport (typically UDP). Packets may be lost,
//!  duplicated or reordered in transit; the protocol hides all of that from the application.
//!
//! ## Design
//!
//! * There is exactly one sender and one receiver per pair of endpoints - no handshake, no
//!    connection setup or teardown, no multiplexing
//! * The sender slices application data into packets of at most `max_payload_len` bytes and
//!    numbers them consecutively, starting at 0
//! * Every packet is re-sent after a fixed timeout until it is acknowledged. There is no limit on
//!    the number of retransmissions
//! * The receiver buffers packets that arrive out of order and delivers payloads strictly in
//!    sequence number order, each exactly once
//! * Acknowledgements are cumulative: an ACK for `n` acknowledges all packets up to and
//!    including `n`
//! * There is no integrity check - the transport is trusted to deliver uncorrupted datagrams
//!
//! ## Packet format
//!
//! All numbers in network byte order (BE):
//! ```ascii
//! 0: kind (u8): 'D' (0x44) for DATA, 'A' (0x41) for ACK
//! 1: sequence number (u32)
//! 5: payload (DATA only) - everything up to the end of the datagram
//! ```
//!
//! An ACK packet is always exactly 5 bytes. A DATA packet may have an empty payload. Datagrams
//!  shorter than 5 bytes or with an unknown kind are dropped.
//!
//! ## Send and receive window
//!
//! The sender has at most `window_size` (N) packets in flight, i.e. sent but not acknowledged.
//!  When the window is full, `send` waits until an ACK frees a slot.
//!
//! The receive window's position is determined by the *last frame received* (LFR), the highest
//!  sequence number that was delivered in order. Packets up to `LFR + N` are accepted and
//!  buffered; packets beyond are dropped without an ACK, and packets at or below LFR are
//!  duplicates that are re-acknowledged. Before the first packet is delivered, LFR is undefined
//!  and no ACK is sent.
//!
//! ## Concurrency
//!
//! Sender and receiver each run a background task reading from the endpoint, and the sender
//!  has one retransmission timer task per packet in flight. All of these are aborted when the
//!  owning [sender::Sender] or [receiver::Receiver] is dropped. Packets received from the
//!  endpoint are processed one at a time.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod packet;
pub mod receive_window;
pub mod receiver;
pub mod send_window;
pub mod sender;
pub mod test_util;
