//! Player status notifications

use std::{fmt, sync::Mutex};
use tokio::sync::mpsc;

/// Buffered notifications per subscriber before new ones are dropped
pub const STATUS_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Playing(String),
    Added(String),
    Stopped,
    Paused,
    Resumed,
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Playing(title) => write!(f, "Now playing: **{}**", title),
            Status::Added(title) => write!(f, "Added to the queue: **{}**", title),
            Status::Stopped => write!(f, "Stopped."),
            Status::Paused => write!(f, "Paused."),
            Status::Resumed => write!(f, "Resumed."),
            Status::Error(reason) => write!(f, "Playback error: {}", reason),
        }
    }
}

/// Fan-out of statuses to any number of subscribers.  Never blocks the publisher: a full
/// subscriber misses the notification.
#[derive(Default)]
pub struct StatusChannel {
    subscribers: Mutex<Vec<mpsc::Sender<Status>>>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<Status> {
        let (tx, rx) = mpsc::channel(STATUS_CAPACITY);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, status: Status) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(status.clone()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}
