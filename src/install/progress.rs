//! Installation progress events with best-effort delivery

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use serde::Serialize;
use tokio::sync::mpsc;

/// Per-package progress status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Starting,
    Extracting,
    Installing,
    Configuring,
    Testing,
    Completed,
    Failed,
    Error,
}

/// Ephemeral progress update, never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub name: String,
    pub status: ProgressStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>, // 0 to 100
}

impl ProgressEvent {
    pub fn new(name: &str, status: ProgressStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress = Some(percent.min(100));
        self
    }
}

/// Everything pushed to the presentation side while a batch runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InstallEvent {
    Progress(ProgressEvent),
    /// Side channel for immediate "nothing to do" feedback
    AlreadyInstalled { name: String, location: String },
}

/// Injected event sink. Delivery is best effort: a full channel drops the
/// update, a closed channel disables the sink for the rest of the batch.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<InstallEvent>>,
    disabled: Arc<AtomicBool>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<InstallEvent>) -> Self {
        Self {
            tx: Some(tx),
            disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.send(InstallEvent::Progress(event));
    }

    pub fn already_installed(&self, name: &str, location: &str) {
        self.send(InstallEvent::AlreadyInstalled {
            name: name.to_string(),
            location: location.to_string(),
        });
    }

    fn send(&self, event: InstallEvent) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }

        if let Some(ref tx) = self.tx
            && let Err(e) = tx.try_send(event)
        {
            match e {
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("Progress channel closed. Installation will continue without progress updates.");
                    self.disabled.store(true, Ordering::Relaxed);
                }
                mpsc::error::TrySendError::Full(_) => {
                    // bounded channel, skip this update
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_the_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = ProgressSink::new(tx);
        sink.progress(ProgressEvent::new("git", ProgressStatus::Starting, "Launching installer..."));
        sink.already_installed("jdk", "C:/apps/jdk");

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, InstallEvent::Progress(ref e) if e.status == ProgressStatus::Starting));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second,
            InstallEvent::AlreadyInstalled { name: "jdk".into(), location: "C:/apps/jdk".into() }
        );
    }

    #[test]
    fn closed_channel_disables_sink() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ProgressSink::new(tx);
        sink.progress(ProgressEvent::new("a", ProgressStatus::Installing, "x"));
        assert!(sink.disabled.load(Ordering::Relaxed));
    }

    #[test]
    fn progress_is_clamped() {
        let e = ProgressEvent::new("a", ProgressStatus::Installing, "x").with_progress(250);
        assert_eq!(e.progress, Some(100));
    }
}
