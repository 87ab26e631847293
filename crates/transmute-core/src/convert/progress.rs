//! Progress reporting from converters back to the worker.

use std::sync::Arc;

use tokio::sync::watch;

/// Handle a converter uses to publish how far along it is.
///
/// Values are percentages, clamped to 99 and never decreasing. The worker
/// watches the paired receiver and forwards changes to the job store, so
/// reporting is cheap and never blocks the conversion.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<u8>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<u8>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// A reporter nobody listens to.
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn report(&self, percent: u8) {
        let percent = percent.min(99);
        self.tx.send_if_modified(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        });
    }

    /// Report `done / total` as a percentage. A zero total reports nothing.
    pub fn report_fraction(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (done.min(total) as u128 * 100 / total as u128) as u8;
        self.report(percent);
    }

    pub fn current(&self) -> u8 {
        *self.tx.borrow()
    }
}
