//! Transient user-facing notices.
//!
//! Stores publish a notice when a write fails so the shell can show a toast.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A notice to display for `duration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: String,
    pub kind: NoticeKind,
    pub message: String,
    pub duration: Duration,
}

/// Broadcasts notices to any number of subscribers.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a notice and return its id. Notices sent with no subscriber
    /// are dropped.
    pub fn add(&self, message: impl Into<String>, kind: NoticeKind, duration: Duration) -> String {
        let notice = Notice {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            message: message.into(),
            duration,
        };
        let id = notice.id.clone();
        let _ = self.tx.send(notice);
        id
    }

    pub fn info(&self, message: impl Into<String>) -> String {
        self.add(message, NoticeKind::Info, Duration::from_secs(5))
    }

    pub fn success(&self, message: impl Into<String>) -> String {
        self.add(message, NoticeKind::Success, Duration::from_secs(5))
    }

    pub fn warn(&self, message: impl Into<String>) -> String {
        self.add(message, NoticeKind::Warning, Duration::from_secs(5))
    }

    pub fn error(&self, message: impl Into<String>) -> String {
        self.add(message, NoticeKind::Error, Duration::from_secs(8))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_notices() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        let id = notifier.error("Could not save task");
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.id, id);
        assert_eq!(notice.kind, NoticeKind::Error);
        assert_eq!(notice.duration, Duration::from_secs(8));
    }

    #[test]
    fn sending_without_subscribers_is_fine() {
        let notifier = Notifier::new();
        notifier.info("nobody listening");
    }
}
