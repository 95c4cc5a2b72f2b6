use std::cell::Cell;
use std::rc::Rc;

/// Shared flag that flips once when the owning view is torn down. Work that
/// finishes after teardown checks it instead of touching unmounted state.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Rc<Cell<bool>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    pub fn tear_down(&self) {
        self.alive.set(false);
    }
}
