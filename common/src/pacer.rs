use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Global minimum spacing between outbound requests.
///
/// The slot lock is held across the sleep, so concurrent workers queue up
/// behind each other and the spacing holds for the whole pool.
pub struct RequestPacer {
    spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(spacing: Duration) -> Self {
        RequestPacer {
            spacing,
            next_slot: Mutex::new(None),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Resolves once the caller may start a request.
    pub async fn wait(&self) {
        if self.spacing.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            if slot > Instant::now() {
                sleep_until(slot).await;
            }
        }
        *next_slot = Some(Instant::now() + self.spacing);
    }
}
