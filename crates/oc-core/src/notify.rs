//! On-screen notification sink

use std::cell::RefCell;
use std::rc::Rc;

/// Receives user-facing messages
pub trait Notifier {
    /// Queue a message. `duration_frames` is how long it stays visible.
    fn push(&mut self, message: &str, priority: u32, duration_frames: u32);
}

/// Forwards notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn push(&mut self, message: &str, priority: u32, duration_frames: u32) {
        tracing::info!(priority, duration_frames, "{}", message);
    }
}

/// Collects notifications for a frontend to display
#[derive(Debug, Default)]
pub struct QueueNotifier {
    messages: Vec<Notification>,
}

/// A queued notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub priority: u32,
    pub duration_frames: u32,
}

impl QueueNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages pushed so far
    pub fn messages(&self) -> &[Notification] {
        &self.messages
    }

    /// Take all pending messages
    pub fn drain(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.messages)
    }
}

impl Notifier for QueueNotifier {
    fn push(&mut self, message: &str, priority: u32, duration_frames: u32) {
        self.messages.push(Notification {
            message: message.to_string(),
            priority,
            duration_frames,
        });
    }
}

/// Lets the owner of a shared sink keep reading it
impl<N: Notifier + ?Sized> Notifier for Rc<RefCell<N>> {
    fn push(&mut self, message: &str, priority: u32, duration_frames: u32) {
        self.borrow_mut().push(message, priority, duration_frames);
    }
}
