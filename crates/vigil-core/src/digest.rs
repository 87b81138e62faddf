//! Watcher registration, the convergence loop and its scheduling queues.

use std::rc::Rc;

use slotmap::new_key_type;

use crate::effects::Deregister;
use crate::error::{DigestError, Phase, isolate};
use crate::scope::Scope;
use crate::value::{Equality, Value};

new_key_type! {
    pub struct WatcherKey;
}

pub type WatchFn = Rc<dyn Fn(&Scope) -> Value>;
pub type ListenerFn = Rc<dyn Fn(&Value, &Value, &Scope)>;

pub(crate) struct Watcher {
    watch: WatchFn,
    listener: Option<ListenerFn>,
    eq: Equality,
    /// `None` until the first evaluation.
    last: Option<Value>,
}

/// Counters for the most recent digest, plus running totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DigestStats {
    /// Digests started on this tree.
    pub digests: u64,
    /// Passes taken by the most recent digest.
    pub passes: usize,
    /// Watch-function calls made by the most recent digest.
    pub evaluations: usize,
    /// Panics contained in user code, tree-wide.
    pub faults: u64,
}

impl Scope {
    /// Registers a watcher compared by identity.
    ///
    /// The listener runs on the first digest after registration (with the
    /// new value passed as the old one) and then whenever the watched value
    /// changes.
    pub fn watch(
        &self,
        watch: impl Fn(&Scope) -> Value + 'static,
        listener: impl Fn(&Value, &Value, &Scope) + 'static,
    ) -> Deregister {
        self.register(Rc::new(watch), Some(Rc::new(listener)), Equality::Reference)
    }

    /// Registers a watcher compared structurally. The stored value is a
    /// deep copy, so in-place mutation of the watched value is detected.
    pub fn watch_deep(
        &self,
        watch: impl Fn(&Scope) -> Value + 'static,
        listener: impl Fn(&Value, &Value, &Scope) + 'static,
    ) -> Deregister {
        self.register(Rc::new(watch), Some(Rc::new(listener)), Equality::Structural)
    }

    /// Registers a watch function with no listener.
    pub fn watch_only(&self, watch: impl Fn(&Scope) -> Value + 'static) -> Deregister {
        self.register(Rc::new(watch), None, Equality::Reference)
    }

    pub fn watch_with(
        &self,
        watch: WatchFn,
        listener: Option<ListenerFn>,
        eq: Equality,
    ) -> Deregister {
        self.register(watch, listener, eq)
    }

    fn register(&self, watch: WatchFn, listener: Option<ListenerFn>, eq: Equality) -> Deregister {
        let tree = self.tree();
        if self.is_destroyed() {
            log::warn!("watch registered on destroyed scope {}; ignoring", self.id());
            return Deregister::noop();
        }
        let key = tree.watchers.borrow_mut().insert(Watcher {
            watch,
            listener,
            eq,
            last: None,
        });
        let seq = tree.next_watcher_seq.get();
        tree.next_watcher_seq.set(seq + 1);
        if let Some(list) = self.inner.watchers.borrow_mut().as_mut() {
            list.push((seq, key));
        }
        tree.last_dirty.set(None);

        let weak = Rc::downgrade(&self.inner);
        Deregister::new(move || {
            if let Some(inner) = weak.upgrade() {
                Scope::from_inner(inner).remove_watcher(key);
            }
        })
    }

    fn remove_watcher(&self, key: WatcherKey) {
        if let Some(list) = self.inner.watchers.borrow_mut().as_mut() {
            list.retain(|(_, k)| *k != key);
        }
        self.tree().release_watchers([key]);
    }

    /// The first watcher in this scope registered after `seq`.
    fn next_watcher_after(&self, seq: Option<u64>) -> Option<(u64, WatcherKey)> {
        let watchers = self.inner.watchers.borrow();
        let list = watchers.as_ref()?;
        let start = match seq {
            Some(seq) => list.partition_point(|(s, _)| *s <= seq),
            None => 0,
        };
        list.get(start).copied()
    }

    /// One pass over this scope and its subtree. Returns whether any
    /// watcher was dirty.
    ///
    /// Watchers run in registration order. Those added during the pass run
    /// later in the same pass; those removed are skipped. Reaching the
    /// tree's last dirty watcher clean again ends the pass early.
    pub(crate) fn digest_once(&self, evaluations: &mut usize) -> bool {
        let tree = self.tree().clone();
        let mut dirty = false;
        self.every_scope(&mut |scope| {
            let mut cursor = None;
            while let Some((seq, key)) = scope.next_watcher_after(cursor) {
                cursor = Some(seq);
                let snapshot = tree
                    .watchers
                    .borrow()
                    .get(key)
                    .map(|w| (w.watch.clone(), w.eq, w.last.clone()));
                let Some((watch, eq, last)) = snapshot else {
                    continue;
                };

                *evaluations += 1;
                let Ok(new_value) = isolate("watch", || watch(scope)) else {
                    tree.record_fault();
                    continue;
                };

                let unchanged = last.as_ref().is_some_and(|last| eq.eq(&new_value, last));
                if unchanged {
                    if tree.last_dirty.get() == Some(key) {
                        return false;
                    }
                    continue;
                }

                let stored = match eq {
                    Equality::Structural => new_value.deep_clone(),
                    Equality::Reference => new_value.clone(),
                };
                let listener = {
                    let mut watchers = tree.watchers.borrow_mut();
                    // The watch function may have deregistered its own watcher.
                    let Some(w) = watchers.get_mut(key) else {
                        continue;
                    };
                    w.last = Some(stored);
                    w.listener.clone()
                };
                tree.last_dirty.set(Some(key));
                let old_value = last.unwrap_or_else(|| new_value.clone());
                match listener {
                    Some(listener) => {
                        match isolate("listener", || listener(&new_value, &old_value, scope)) {
                            Ok(()) => dirty = true,
                            Err(_) => tree.record_fault(),
                        }
                    }
                    None => dirty = true,
                }
            }
            true
        });
        dirty
    }

    /// Runs passes over this scope's subtree until no watcher is dirty and
    /// the immediate queue is empty, then drains the post-digest queue.
    pub fn digest(&self) -> Result<(), DigestError> {
        let tree = self.tree().clone();
        tree.last_dirty.set(None);
        self.begin_phase(Phase::Digest)?;
        log::debug!("digest started on scope {}", self.id());

        if let Some(id) = tree.apply_async_id.get() {
            tree.host.cancel(id);
            self.flush_apply_async();
        }

        let mut stats = tree.stats.get();
        stats.digests += 1;
        stats.passes = 0;
        stats.evaluations = 0;
        tree.stats.set(stats);

        let mut passes = 0;
        let mut evaluations = 0;
        let outcome = loop {
            loop {
                let next = tree.async_queue.borrow_mut().pop_front();
                let Some((origin, task)) = next else { break };
                if isolate("async task", || origin.eval(task)).is_err() {
                    tree.record_fault();
                }
            }

            let dirty = self.digest_once(&mut evaluations);
            passes += 1;
            log::trace!("digest pass {passes} (dirty: {dirty})");

            let pending = !tree.async_queue.borrow().is_empty();
            if !dirty && !pending {
                break Ok(());
            }
            if passes >= tree.ttl {
                log::warn!("digest did not converge after {passes} passes");
                break Err(DigestError::Diverged { ttl: tree.ttl });
            }
        };

        let mut stats = tree.stats.get();
        stats.passes = passes;
        stats.evaluations = evaluations;
        tree.stats.set(stats);
        self.clear_phase();
        outcome?;

        loop {
            let next = tree.post_digest_queue.borrow_mut().pop_front();
            let Some(task) = next else { break };
            if isolate("post-digest task", task).is_err() {
                tree.record_fault();
            }
        }
        log::debug!("digest finished in {passes} passes ({evaluations} evaluations)");
        Ok(())
    }

    pub fn stats(&self) -> DigestStats {
        self.tree().stats.get()
    }

    /// The phase currently active on this tree, if any.
    pub fn phase(&self) -> Option<Phase> {
        self.tree().phase.get()
    }

    pub(crate) fn begin_phase(&self, phase: Phase) -> Result<(), DigestError> {
        let tree = self.tree();
        if let Some(active) = tree.phase.get() {
            return Err(DigestError::PhaseInProgress(active));
        }
        tree.phase.set(Some(phase));
        Ok(())
    }

    pub(crate) fn clear_phase(&self) {
        self.tree().phase.set(None);
    }

    // ---- entry points -----------------------------------------------------

    /// Calls `f` with this scope, synchronously.
    pub fn eval<R>(&self, f: impl FnOnce(&Scope) -> R) -> R {
        f(self)
    }

    /// Calls `f` with this scope and a locals value.
    pub fn eval_with<R>(&self, locals: &Value, f: impl FnOnce(&Scope, &Value) -> R) -> R {
        f(self, locals)
    }

    /// Runs `f`, then digests from the root. A panic in `f` still gets the
    /// digest and is resumed afterwards.
    pub fn apply<R>(&self, f: impl FnOnce(&Scope) -> R) -> Result<R, DigestError> {
        self.begin_phase(Phase::Apply)?;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.eval(f)));
        self.clear_phase();
        let digested = self.root().digest();
        match result {
            Ok(value) => digested.map(|()| value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Queues `f` to run inside the current digest, or inside one scheduled
    /// on the host if none is running.
    pub fn eval_async(&self, f: impl FnOnce(&Scope) + 'static) {
        let tree = self.tree();
        if tree.phase.get().is_none() && tree.async_queue.borrow().is_empty() {
            let weak = Rc::downgrade(&self.inner);
            tree.host.schedule(Box::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                let scope = Scope::from_inner(inner);
                if scope.tree().async_queue.borrow().is_empty() {
                    return;
                }
                if let Err(err) = scope.root().digest() {
                    log::error!("deferred digest failed: {err}");
                }
            }));
        }
        tree.async_queue
            .borrow_mut()
            .push_back((self.clone(), Box::new(f)));
    }

    /// Queues `f` for a single coalesced `apply` on the host. Any digest
    /// that starts first runs the queued work instead.
    pub fn apply_async(&self, f: impl FnOnce(&Scope) + 'static) {
        let tree = self.tree();
        tree.apply_async_queue
            .borrow_mut()
            .push_back((self.clone(), Box::new(f)));
        if tree.apply_async_id.get().is_some() {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let id = tree.host.schedule(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let scope = Scope::from_inner(inner);
            if let Err(err) = scope.apply(|s| s.flush_apply_async()) {
                log::error!("coalesced apply failed: {err}");
            }
        }));
        tree.apply_async_id.set(Some(id));
    }

    fn flush_apply_async(&self) {
        let tree = self.tree().clone();
        loop {
            let next = tree.apply_async_queue.borrow_mut().pop_front();
            let Some((origin, task)) = next else { break };
            if isolate("apply_async task", || origin.eval(task)).is_err() {
                tree.record_fault();
            }
        }
        tree.apply_async_id.set(None);
    }

    /// Queues `f` to run once after the next digest converges.
    pub fn post_digest(&self, f: impl FnOnce() + 'static) {
        self.tree()
            .post_digest_queue
            .borrow_mut()
            .push_back(Box::new(f));
    }
}
