use tokio::sync::Semaphore;
use crate::error::SwpError;

/// Counting permits for the send window: one permit per packet that may be in flight. A permit
///  is taken before a packet gets its sequence number, and given back when a cumulative ACK
///  covers that packet.
///
/// Permits are not tied to a guard object because they are released from the ACK loop rather
///  than by the task that acquired them.
pub struct SendWindow {
    capacity: u32,
    permits: Semaphore,
}

impl SendWindow {
    pub fn new(capacity: u32) -> SendWindow {
        SendWindow {
            capacity,
            permits: Semaphore::new(capacity as usize),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits until a slot is free. The semaphore is owned by the window and never closed, so this
    ///  can not fail.
    pub async fn acquire(&self) {
        match self.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => unreachable!("send window semaphore is never closed"),
        }
    }

    /// Waits until all permits are available, i.e. until nothing is in flight. The permits are
    ///  handed back right away.
    pub async fn wait_until_idle(&self) {
        match self.permits.acquire_many(self.capacity).await {
            Ok(_all) => {}
            Err(_) => unreachable!("send window semaphore is never closed"),
        }
    }

    /// Give back `n` permits. If this would push the number of available permits above
    ///  capacity, only the permits up to capacity are released and [SwpError::WindowOverflow]
    ///  is returned so the caller can log it.
    pub fn release(&self, n: usize) -> Result<(), SwpError> {
        let available = self.available();
        let headroom = (self.capacity as usize).saturating_sub(available);

        if n > headroom {
            self.permits.add_permits(headroom);
            return Err(SwpError::WindowOverflow { capacity: self.capacity });
        }

        self.permits.add_permits(n);
        Ok(())
    }
}
