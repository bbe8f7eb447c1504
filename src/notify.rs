//! Fire-and-forget notification dispatch
use std::sync::Mutex;
use tracing::info;

/// Push/local notification hook for counterparty actions.
///
/// Dispatch is fire-and-forget: implementations swallow transport failures
/// themselves, and the engine never lets a notification outcome affect a
/// trade operation.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, user_id: &str, title: &str, body: &str);
}

/// Dispatcher that only writes to the log. The default for embedders that
/// have no push transport wired in.
#[derive(Default)]
pub struct LogNotifier;

impl NotificationDispatcher for LogNotifier {
    fn notify(&self, user_id: &str, title: &str, body: &str) {
        info!(user_id, title, body, "notification dispatched");
    }
}

/// Dispatcher that records every notification, for assertions in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().expect("notifier lock poisoned").clone()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn notify(&self, user_id: &str, title: &str, body: &str) {
        let mut sent = self.sent.lock().expect("notifier lock poisoned");
        sent.push((user_id.to_string(), title.to_string(), body.to_string()));
    }
}
