//! Channel helpers

use tokio::sync::mpsc;

/// Outcome of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    /// Channel is full, message was dropped.
    Full,
    /// Receiver is gone.
    Closed,
}

impl SendResult {
    #[inline]
    pub fn is_sent(self) -> bool {
        matches!(self, SendResult::Sent)
    }

    #[inline]
    pub fn is_closed(self) -> bool {
        matches!(self, SendResult::Closed)
    }
}

/// Send without waiting, logging whenever the message is lost.
pub fn try_send_log<T>(tx: &mpsc::Sender<T>, value: T, context: &str) -> SendResult {
    match tx.try_send(value) {
        Ok(()) => SendResult::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => {
            log::warn!("{}: channel full, message dropped", context);
            SendResult::Full
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            log::debug!("{}: channel closed", context);
            SendResult::Closed
        }
    }
}
