//! User-facing collaborators: status messages and confirmation prompts

use parking_lot::Mutex;
use std::sync::Arc;

/// Receives one human-readable message per operation outcome
pub trait StatusSink: Send + Sync {
    fn publish(&self, message: &str);
}

/// Asked before destructive operations; `false` cancels them
pub type Confirm = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub fn always_confirm() -> Confirm {
    Arc::new(|_| true)
}

/// In-memory status history
#[derive(Default)]
pub struct StatusLog {
    messages: Mutex<Vec<String>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<String> {
        self.messages.lock().last().cloned()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl StatusSink for StatusLog {
    fn publish(&self, message: &str) {
        tracing::debug!(status = %message, "status");
        self.messages.lock().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_messages_in_order() {
        let log = StatusLog::new();
        assert_eq!(log.latest(), None);
        log.publish("loading");
        log.publish("loaded");
        assert_eq!(log.messages(), vec!["loading", "loaded"]);
        assert_eq!(log.latest().as_deref(), Some("loaded"));
    }
}
