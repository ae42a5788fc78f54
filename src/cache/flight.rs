//! Shared result of a running conversion.

use gifforge_common::Result;
use std::path::PathBuf;
use tokio::sync::{Notify, OnceCell};

pub(super) type FlightResult = Result<PathBuf>;

/// One running computation, awaited by every caller asking for its key.
pub(super) struct InFlight {
    result: OnceCell<FlightResult>,
    notify: Notify,
}

impl InFlight {
    pub(super) fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Publish the result and wake all waiters. Only the first call counts.
    pub(super) fn set_result(&self, result: FlightResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    pub(super) async fn wait(&self) -> FlightResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            // Register before re-checking so a result published in between
            // still wakes us.
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}
