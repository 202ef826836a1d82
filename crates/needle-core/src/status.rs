//! Operator-facing status line
//!
//! Control-path failures (a track that would not import, a command that
//! named an unknown record) end up here instead of being returned to
//! whoever triggered them. The board keeps the latest message, mirrors it
//! to the log and forwards it to any subscribers.

use std::sync::Mutex;

use flume::{Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusLevel {
    Info,
    Verbose,
    Alert,
    Error,
}

impl StatusLevel {
    fn log_level(self) -> log::Level {
        match self {
            StatusLevel::Info => log::Level::Info,
            StatusLevel::Verbose => log::Level::Debug,
            StatusLevel::Alert => log::Level::Warn,
            StatusLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    latest: Mutex<Option<StatusMessage>>,
    subscribers: Mutex<Vec<Sender<StatusMessage>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, level: StatusLevel, text: impl Into<String>) {
        let message = StatusMessage {
            level,
            text: text.into(),
        };
        log::log!(level.log_level(), "{}", message.text);

        // Drop subscribers whose receiver has gone away
        lock(&self.subscribers).retain(|tx| tx.send(message.clone()).is_ok());
        *lock(&self.latest) = Some(message);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.post(StatusLevel::Info, text);
    }

    pub fn alert(&self, text: impl Into<String>) {
        self.post(StatusLevel::Alert, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.post(StatusLevel::Error, text);
    }

    pub fn latest(&self) -> Option<StatusMessage> {
        lock(&self.latest).clone()
    }

    /// Receive every message posted from now on
    pub fn subscribe(&self) -> Receiver<StatusMessage> {
        let (tx, rx) = flume::unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::error!("Status board lock poisoned, recovering");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_and_fan_out() {
        let board = StatusBoard::new();
        assert!(board.latest().is_none());

        let a = board.subscribe();
        let b = board.subscribe();
        board.error("import failed");

        let latest = board.latest().unwrap();
        assert_eq!(latest.level, StatusLevel::Error);
        assert_eq!(latest.text, "import failed");
        assert_eq!(a.try_recv().unwrap(), latest);
        assert_eq!(b.try_recv().unwrap(), latest);
    }

    #[test]
    fn test_prunes_dropped_subscribers() {
        let board = StatusBoard::new();
        let kept = board.subscribe();
        drop(board.subscribe());

        board.info("one");
        board.alert("two");
        assert_eq!(board.subscribers.lock().unwrap().len(), 1);
        assert_eq!(kept.try_iter().count(), 2);
    }
}
