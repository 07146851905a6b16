//! Presentation sink
//!
//! The scheduler hands every tick's filtered and sorted snapshot to a
//! [`StatsSink`] by value. Sinks own rendering and must return promptly.

use crate::models::Stats;
use tokio::sync::mpsc;
use tracing::warn;

/// Receiver of one ordered snapshot per tick
pub trait StatsSink: Send + Sync {
    fn publish(&self, stats: Vec<Stats>);
}

/// Sink forwarding snapshots over a bounded channel.
///
/// A full or closed channel drops the snapshot rather than blocking the tick.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<Stats>>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Vec<Stats>>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (Self { tx }, rx)
    }
}

impl StatsSink for ChannelSink {
    fn publish(&self, stats: Vec<Stats>) {
        if let Err(e) = self.tx.try_send(stats) {
            warn!(error = %e, "Dropping stats snapshot");
        }
    }
}
