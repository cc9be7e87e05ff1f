//! Batched release of sandbox heap entries
//!
//! Dropping a stub queues its address. A single task on the helper runtime
//! collects queued addresses until the debounce window passes quietly, then
//! sends one `FREE` for the whole batch.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::Bridge;

/// Address released by a dropped stub, tagged with the epoch it belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingFree {
    pub address: u64,
    pub epoch: u64,
}

pub(crate) struct FreeQueue {
    tx: mpsc::UnboundedSender<PendingFree>,
}

impl FreeQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingFree>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, entry: PendingFree) {
        // The flush task is gone once the helper runtime shuts down
        if self.tx.send(entry).is_err() {
            trace!(address = entry.address, "Free queue closed");
        }
    }
}

/// Runs until the owning bridge is dropped
pub(crate) async fn flush_loop(
    bridge: Weak<Bridge>,
    mut rx: mpsc::UnboundedReceiver<PendingFree>,
    debounce: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(entry)) => batch.push(entry),
                Ok(None) | Err(_) => break,
            }
        }

        let Some(bridge) = bridge.upgrade() else {
            return;
        };
        let addresses = live_addresses(batch, bridge.epoch());
        if addresses.is_empty() {
            trace!("Nothing to free in this batch");
            continue;
        }
        if let Err(e) = bridge.free(&addresses).await {
            debug!(error = %e, count = addresses.len(), "Failed to free heap addresses");
        }
    }
}

/// Addresses from the current epoch, deduplicated
fn live_addresses(batch: Vec<PendingFree>, epoch: u64) -> Vec<u64> {
    let mut addresses: Vec<u64> = batch
        .into_iter()
        .filter(|entry| entry.epoch == epoch)
        .map(|entry| entry.address)
        .collect();
    addresses.sort_unstable();
    addresses.dedup();
    addresses
}
