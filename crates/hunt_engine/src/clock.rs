use std::cell::Cell;

use chrono::{DateTime, Duration, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Every `now()` call advances by `tick`
/// so consecutive records never share a timestamp.
#[derive(Debug)]
pub struct ManualClock {
    current: Cell<DateTime<Utc>>,
    tick: Duration,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Cell::new(start),
            tick: Duration::seconds(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn advance(&self, by: Duration) {
        self.current.set(self.current.get() + by);
    }

    pub fn peek(&self) -> DateTime<Utc> {
        self.current.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.current.get();
        self.current.set(now + self.tick);
        now
    }
}
