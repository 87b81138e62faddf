use std::cell::RefCell;
use std::rc::Rc;

/// Removal capability returned by `watch`, `watch_group`, `on` and friends.
#[derive(Clone)]
pub struct Deregister(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Deregister {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    /// A capability that does nothing.
    pub fn noop() -> Self {
        Self(Rc::new(RefCell::new(None)))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.borrow_mut().take();
        if let Some(f) = f {
            f()
        }
    }

    pub fn is_spent(&self) -> bool {
        self.0.borrow().is_none()
    }
}

impl std::fmt::Debug for Deregister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Deregister").field(&!self.is_spent()).finish()
    }
}
