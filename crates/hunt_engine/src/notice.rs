use std::cell::RefCell;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Inline message shown to the user after an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Bounded FIFO; the oldest notice is dropped once capacity is reached.
#[derive(Debug)]
pub struct NoticeQueue {
    entries: RefCell<VecDeque<UserNotice>>,
    capacity: usize,
}

impl NoticeQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RefCell::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn info(&self, message: impl Into<String>, at: DateTime<Utc>) {
        self.push(NoticeLevel::Info, message.into(), at);
    }

    pub fn error(&self, message: impl Into<String>, at: DateTime<Utc>) {
        self.push(NoticeLevel::Error, message.into(), at);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn latest(&self) -> Option<UserNotice> {
        self.entries.borrow().back().cloned()
    }

    pub fn drain(&self) -> Vec<UserNotice> {
        self.entries.borrow_mut().drain(..).collect()
    }

    fn push(&self, level: NoticeLevel, message: String, at: DateTime<Utc>) {
        let mut entries = self.entries.borrow_mut();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(UserNotice { level, message, at });
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn queue_drops_oldest_past_capacity() {
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        let queue = NoticeQueue::new(2);
        queue.info("one", at);
        queue.error("two", at);
        queue.info("three", at);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.latest().map(|notice| notice.message), Some("three".to_string()));

        let drained = queue.drain();
        assert_eq!(drained[0].message, "two");
        assert_eq!(drained[0].level, NoticeLevel::Error);
        assert!(queue.is_empty());
    }
}
