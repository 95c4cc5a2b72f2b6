use std::cell::Cell;

/// One generation at a time. The ticket releases the guard when dropped,
/// on every exit path.
#[derive(Debug, Default)]
pub struct InFlightGuard {
    busy: Cell<bool>,
}

#[derive(Debug)]
pub struct InFlightTicket<'a> {
    busy: &'a Cell<bool>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn try_acquire(&self) -> Option<InFlightTicket<'_>> {
        if self.busy.replace(true) {
            return None;
        }
        Some(InFlightTicket { busy: &self.busy })
    }
}

impl Drop for InFlightTicket<'_> {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_ticket_drops() {
        let guard = InFlightGuard::new();
        let ticket = guard.try_acquire().expect("first");
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());

        drop(ticket);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }
}
