use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::effects::Deregister;
use crate::scope::Scope;
use crate::value::Value;

pub type GroupListener = dyn Fn(&[Value], &[Value], &Scope);

struct Group {
    new_values: RefCell<Vec<Value>>,
    old_values: RefCell<Vec<Value>>,
    scheduled: Cell<bool>,
    first_run: Cell<bool>,
    listener: Rc<GroupListener>,
}

impl Group {
    fn fire(&self, scope: &Scope) {
        // Cleared before the listener runs, which may panic.
        self.scheduled.set(false);
        let new_values = self.new_values.borrow().clone();
        let old_values = if self.first_run.replace(false) {
            new_values.clone()
        } else {
            self.old_values.borrow().clone()
        };
        (self.listener)(&new_values, &old_values, scope);
    }
}

impl Scope {
    /// Watches several values with one listener. Changes seen during a
    /// digest are batched and the listener is called once, from the
    /// immediate queue, with the values in the order of `watches`.
    pub fn watch_group(
        &self,
        watches: Vec<Box<dyn Fn(&Scope) -> Value>>,
        listener: impl Fn(&[Value], &[Value], &Scope) + 'static,
    ) -> Deregister {
        if watches.is_empty() {
            let should_call = Rc::new(Cell::new(true));
            let flag = should_call.clone();
            self.eval_async(move |scope| {
                if flag.get() {
                    listener(&[], &[], scope);
                }
            });
            return Deregister::new(move || should_call.set(false));
        }

        let group = Rc::new(Group {
            new_values: RefCell::new(vec![Value::Undefined; watches.len()]),
            old_values: RefCell::new(vec![Value::Undefined; watches.len()]),
            scheduled: Cell::new(false),
            first_run: Cell::new(true),
            listener: Rc::new(listener),
        });

        let removals: Vec<Deregister> = watches
            .into_iter()
            .enumerate()
            .map(|(i, watch)| {
                let group = group.clone();
                self.watch(
                    move |scope| watch(scope),
                    move |new, old, scope| {
                        group.new_values.borrow_mut()[i] = new.clone();
                        group.old_values.borrow_mut()[i] = old.clone();
                        if !group.scheduled.replace(true) {
                            let group = group.clone();
                            scope.eval_async(move |scope| group.fire(scope));
                        }
                    },
                )
            })
            .collect();

        Deregister::new(move || {
            for removal in &removals {
                removal.run();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &'static str) -> Box<dyn Fn(&Scope) -> Value> {
        Box::new(move |s: &Scope| s.get(name))
    }

    #[test]
    fn test_values_arrive_in_order() {
        let scope = Scope::new();
        scope.set("a", 1);
        scope.set("b", 2);
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        scope.watch_group(vec![key("a"), key("b")], move |new, _, _| {
            *g.borrow_mut() = new.to_vec();
        });

        scope.digest().unwrap();
        assert_eq!(*got.borrow(), vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_listener_called_once_per_digest() {
        let scope = Scope::new();
        scope.set("a", 1);
        scope.set("b", 2);
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        scope.watch_group(vec![key("a"), key("b")], move |_, _, _| c.set(c.get() + 1));

        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);

        scope.set("a", 3);
        scope.set("b", 4);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_old_values_on_later_calls() {
        let scope = Scope::new();
        scope.set("a", 1);
        scope.set("b", 2);
        let olds = Rc::new(RefCell::new(Vec::new()));
        let o = olds.clone();
        scope.watch_group(vec![key("a"), key("b")], move |_, old, _| {
            o.borrow_mut().push(old.to_vec());
        });

        scope.digest().unwrap();
        scope.set("b", 3);
        scope.digest().unwrap();

        let olds = olds.borrow();
        assert_eq!(olds[0], vec![Value::from(1), Value::from(2)]);
        assert_eq!(olds[1], vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_empty_group_fires_once() {
        let scope = Scope::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        scope.watch_group(Vec::new(), move |new, old, _| {
            assert!(new.is_empty() && old.is_empty());
            c.set(c.get() + 1);
        });
        scope.digest().unwrap();
        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_empty_group_deregistered_before_digest() {
        let scope = Scope::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let stop = scope.watch_group(Vec::new(), move |_, _, _| c.set(c.get() + 1));
        stop.run();
        scope.digest().unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_listener_fires_again_after_panic() {
        let scope = Scope::new();
        scope.set("a", 1);
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        scope.watch_group(vec![key("a")], move |_, _, _| {
            c.set(c.get() + 1);
            if c.get() == 1 {
                panic!("first call fails");
            }
        });

        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(scope.stats().faults, 1);

        scope.set("a", 2);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_deregister_removes_every_watch() {
        let scope = Scope::new();
        scope.set("a", 1);
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let stop = scope.watch_group(vec![key("a"), key("a")], move |_, _, _| c.set(c.get() + 1));
        assert_eq!(scope.watcher_count(), 2);
        stop.run();
        assert_eq!(scope.watcher_count(), 0);

        scope.set("a", 2);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 0);
    }
}
