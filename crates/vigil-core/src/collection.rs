//! Shallow change detection for arrays and objects.
//!
//! Instead of deep-comparing the watched value every pass, the wrapper
//! keeps a one-level shadow copy and bumps a counter whenever an element
//! or key differs. The outer watcher only observes the counter.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::effects::Deregister;
use crate::scope::Scope;
use crate::value::Value;

#[derive(Default)]
enum Shadow {
    #[default]
    Unset,
    Scalar(Value),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

#[derive(Default)]
struct Tracker {
    shadow: Shadow,
    changes: u64,
    new_value: Value,
    very_old: Value,
    first_run: bool,
}

impl Tracker {
    fn bump(&mut self) {
        self.changes += 1;
    }

    /// Compares `new_value` with the shadow, updating the shadow in place.
    fn observe(&mut self, new_value: Value) -> u64 {
        match &new_value {
            Value::Array(items) => {
                let items = items.borrow();
                if !matches!(self.shadow, Shadow::Array(_)) {
                    self.shadow = Shadow::Array(Vec::new());
                    self.bump();
                }
                let mut changed = 0;
                if let Shadow::Array(shadow) = &mut self.shadow {
                    if shadow.len() != items.len() {
                        changed += 1;
                        shadow.resize(items.len(), Value::Undefined);
                    }
                    for (slot, item) in shadow.iter_mut().zip(items.iter()) {
                        if !slot.same(item) {
                            changed += 1;
                            *slot = item.clone();
                        }
                    }
                }
                self.changes += changed;
            }
            Value::Object(map) => {
                let map = map.borrow();
                if !matches!(self.shadow, Shadow::Map(_)) {
                    self.shadow = Shadow::Map(BTreeMap::new());
                    self.bump();
                }
                let mut changed = 0;
                if let Shadow::Map(shadow) = &mut self.shadow {
                    for (key, value) in map.iter() {
                        match shadow.get_mut(key) {
                            Some(slot) if slot.same(value) => {}
                            Some(slot) => {
                                changed += 1;
                                *slot = value.clone();
                            }
                            None => {
                                changed += 1;
                                shadow.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    if shadow.len() > map.len() {
                        changed += 1;
                        shadow.retain(|key, _| map.contains_key(key));
                    }
                }
                self.changes += changed;
            }
            scalar => {
                let same = match &self.shadow {
                    Shadow::Scalar(old) => old.same(scalar),
                    // Fresh trackers start out as `undefined`.
                    Shadow::Unset => scalar.is_undefined(),
                    Shadow::Array(_) | Shadow::Map(_) => false,
                };
                if !same {
                    self.bump();
                }
                self.shadow = Shadow::Scalar(scalar.clone());
            }
        }
        self.new_value = new_value;
        self.changes
    }
}

impl Scope {
    /// Watches an array or object shallowly. The listener receives the
    /// current collection and a copy of the one seen on the previous call
    /// (the current one on the first call).
    pub fn watch_collection(
        &self,
        watch: impl Fn(&Scope) -> Value + 'static,
        listener: impl Fn(&Value, &Value, &Scope) + 'static,
    ) -> Deregister {
        self.collection_watcher(watch, true, move |new, old, scope| listener(new, old, scope))
    }

    /// Like [`Scope::watch_collection`] for listeners that never look at the
    /// previous value, so no copy of it is kept.
    pub fn watch_collection_new(
        &self,
        watch: impl Fn(&Scope) -> Value + 'static,
        listener: impl Fn(&Value, &Scope) + 'static,
    ) -> Deregister {
        self.collection_watcher(watch, false, move |new, _, scope| listener(new, scope))
    }

    fn collection_watcher(
        &self,
        watch: impl Fn(&Scope) -> Value + 'static,
        track_old: bool,
        listener: impl Fn(&Value, &Value, &Scope) + 'static,
    ) -> Deregister {
        let tracker = Rc::new(RefCell::new(Tracker {
            first_run: true,
            ..Tracker::default()
        }));

        let counting = tracker.clone();
        let internal_watch = move |scope: &Scope| {
            let new_value = watch(scope);
            let changes = counting.borrow_mut().observe(new_value);
            Value::Number(changes as f64)
        };

        let internal_listener = move |_: &Value, _: &Value, scope: &Scope| {
            let (new_value, old_value) = {
                let mut t = tracker.borrow_mut();
                let new_value = t.new_value.clone();
                let old_value = if t.first_run {
                    t.first_run = false;
                    new_value.clone()
                } else if track_old {
                    t.very_old.clone()
                } else {
                    new_value.clone()
                };
                if track_old {
                    t.very_old = new_value.shallow_clone();
                }
                (new_value, old_value)
            };
            listener(&new_value, &old_value, scope);
        };

        self.watch(internal_watch, internal_listener)
    }
}
