use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecutionError, FenceError, FenceResult};

use super::Alert;

/// Identifier of one alert subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub(crate) type Subscribers = Mutex<HashMap<SubscriptionId, Sender<Alert>>>;

fn disconnected() -> FenceError {
    FenceError::Execution(ExecutionError::Disconnected {
        path: "alert_stream".to_string(),
    })
}

/// A live feed of emitted alerts.
///
/// Delivery is bounded and lossy: a subscriber that falls behind loses alerts
/// rather than stalling detection. Dropping the stream unsubscribes it.
#[derive(Debug)]
pub struct AlertStream {
    subscription_id: SubscriptionId,
    rx: Receiver<Alert>,
    registry: Weak<Subscribers>,
    unregistered: AtomicBool,
}

impl AlertStream {
    pub(crate) fn new(subscription_id: SubscriptionId, rx: Receiver<Alert>, registry: Weak<Subscribers>) -> Self {
        Self {
            subscription_id,
            rx,
            registry,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Stops delivery. Idempotent; alerts already buffered can still be read.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut subs) = registry.lock() {
                subs.remove(&self.subscription_id);
            }
        }
    }

    /// Receive the next alert (blocking).
    ///
    /// # Errors
    ///
    /// `Disconnected` once unsubscribed (or the emitter is gone) and the buffer is drained.
    pub fn recv(&self) -> FenceResult<Alert> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next alert with a timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` if nothing arrives in time; `Disconnected` as for [`recv`](Self::recv).
    pub fn recv_timeout(&self, timeout: Duration) -> FenceResult<Alert> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => FenceError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Non-blocking receive; `None` when nothing is buffered.
    #[must_use]
    pub fn try_recv(&self) -> Option<Alert> {
        match self.rx.try_recv() {
            Ok(alert) => Some(alert),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drains everything currently buffered.
    #[must_use]
    pub fn drain(&self) -> Vec<Alert> {
        self.rx.try_iter().collect()
    }
}

impl Drop for AlertStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
