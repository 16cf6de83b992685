//! Event fan-out to live dashboard sessions.

use std::time::Duration;

use tracing::{debug, warn};

use crate::event::Envelope;
use crate::registry::ConnectionRegistry;

/// Per-subscriber delivery budget. A session that cannot drain its channel
/// within this window is treated as dead so it cannot stall the fan-out for
/// everyone else.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Fans one envelope out to every registered subscriber.
///
/// Delivery is best-effort and fire-and-forget: no ack, no retry, no
/// persistence. A failed or timed-out send evicts that subscriber from the
/// registry; it never aborts the remaining sends and never surfaces to the
/// caller. Ordering holds within one call (registration order); concurrent
/// calls race in whatever order they are submitted.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            send_timeout: SEND_TIMEOUT,
        }
    }

    /// Override the per-subscriber send budget.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Deliver `envelope` to every subscriber active at the start of the
    /// call. Returns the number of subscribers targeted.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame = match serde_json::to_string(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast envelope");
                return 0;
            }
        };

        let snapshot = self.registry.snapshot().await;
        let targeted = snapshot.len();

        for subscriber in snapshot {
            match tokio::time::timeout(self.send_timeout, subscriber.tx.send(frame.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // Channel closed: the session task is gone.
                    warn!(subscriber = %subscriber.id, "subscriber channel closed, evicting");
                    self.registry.unregister(subscriber.id).await;
                }
                Err(_) => {
                    warn!(
                        subscriber = %subscriber.id,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "subscriber send timed out, evicting"
                    );
                    self.registry.unregister(subscriber.id).await;
                }
            }
        }

        debug!(targeted, "broadcast fan-out complete");
        targeted
    }
}
