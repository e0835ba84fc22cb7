//! Hand-off of the live chat client to the scheduler.
//!
//! The chat subsystem and the scheduler start from independent tasks, and the
//! chat client may not be ready when the scheduler is. The slot is the one
//! piece of state shared between them: the connector task writes it once, the
//! scheduler only ever reads.

use crate::delivery::Sender;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub struct SenderSlot {
    inner: RwLock<Option<Arc<dyn Sender>>>,
}

impl SenderSlot {
    pub fn new() -> SenderSlot {
        SenderSlot {
            inner: RwLock::new(None),
        }
    }

    /// Installs the sender. Returns false, leaving the slot untouched, if the
    /// sender is not fully configured or a sender is already installed.
    pub fn set(&self, sender: Arc<dyn Sender>) -> bool {
        if !sender.is_configured() {
            tracing::warn!("refusing to install an unconfigured sender");
            return false;
        }
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            tracing::warn!("a sender is already installed, ignoring the replacement");
            return false;
        }
        *slot = Some(sender);
        true
    }

    pub fn get(&self) -> Option<Arc<dyn Sender>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Polls until a sender appears: up to `attempts` checks spaced
    /// `interval` apart, the first one immediate. Returns None once the
    /// attempts are exhausted.
    pub async fn wait(&self, attempts: usize, interval: Duration) -> Option<Arc<dyn Sender>> {
        for attempt in 0..attempts {
            if let Some(sender) = self.get() {
                return Some(sender);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        None
    }
}
