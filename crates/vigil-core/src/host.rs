use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Handle for a task handed to a [`Host`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub type HostTask = Box<dyn FnOnce()>;

/// Deferred execution: "run this after the current execution context yields".
///
/// The engine never assumes a real event loop. An embedder wires this to
/// its own loop; tests use [`ManualHost`] and pump it explicitly.
pub trait Host: 'static {
    fn schedule(&self, task: HostTask) -> TimerId;
    /// Cancelling an id that already ran (or was never issued) is a no-op.
    fn cancel(&self, id: TimerId);
}

/// A host you drive by hand.
#[derive(Default)]
pub struct ManualHost {
    next_id: Cell<u64>,
    queue: RefCell<VecDeque<(TimerId, HostTask)>>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Runs every task scheduled before this call. Tasks scheduled while
    /// pumping wait for the next call.
    pub fn run_pending(&self) -> usize {
        let Some(horizon) = self.queue.borrow().back().map(|(id, _)| *id) else {
            return 0;
        };
        let mut ran = 0;
        loop {
            let next = {
                let mut q = self.queue.borrow_mut();
                match q.front() {
                    Some((id, _)) if *id <= horizon => q.pop_front(),
                    _ => None,
                }
            };
            let Some((_, task)) = next else { break };
            task();
            ran += 1;
        }
        ran
    }

    /// Pumps until nothing is left, up to `max_rounds` rounds.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut ran = 0;
        for _ in 0..max_rounds {
            let n = self.run_pending();
            if n == 0 {
                break;
            }
            ran += n;
        }
        ran
    }
}

impl Host for ManualHost {
    fn schedule(&self, task: HostTask) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.queue.borrow_mut().push_back((id, task));
        id
    }

    fn cancel(&self, id: TimerId) {
        self.queue.borrow_mut().retain(|(queued, _)| *queued != id);
    }
}
