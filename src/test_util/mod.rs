//! This module contains utilities for testing code built on the protocol without real sockets.
//!  They are used for testing the protocol itself, but they are also exported for application
//!  testing, which is why they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod channel_endpoint;
