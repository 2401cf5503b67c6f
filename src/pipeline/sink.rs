//! Channel-backed output sink for handing capture output to a writer thread

use super::orchestrator::{CaptureOutput, OutputSink};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Forwards capture output into a bounded channel.
///
/// The capture loop never blocks on a slow consumer: when the channel is
/// full the output is dropped and counted.
pub struct ChannelSink {
    sender: Sender<CaptureOutput>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Create a sink and its receiving end
    pub fn bounded(capacity: usize) -> (Self, Receiver<CaptureOutput>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    pub fn send(&self, output: CaptureOutput) {
        match self.sender.try_send(output) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("Output consumer lagging, {} outputs dropped", dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("Output consumer gone");
            }
        }
    }

    /// Counter of outputs dropped because the channel was full
    pub fn dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Box this sink for [`CaptureOrchestratorBuilder::sink`](super::CaptureOrchestratorBuilder::sink)
    pub fn into_sink(self) -> OutputSink {
        Box::new(move |output| self.send(output))
    }
}
