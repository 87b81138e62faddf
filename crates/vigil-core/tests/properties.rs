use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vigil_core::prelude::*;

fn bump(scope: &Scope, key: &str) {
    let n = scope.get(key).as_f64().unwrap_or(0.0);
    scope.set(key, n + 1.0);
}

#[test]
fn test_mutually_dirtying_watchers_diverge() {
    let scope = Scope::new();
    scope.set("a", 0);
    scope.set("b", 0);
    scope.watch(|s| s.get("a"), |_, _, s| bump(s, "b"));
    let feedback = scope.watch(|s| s.get("b"), |_, _, s| bump(s, "a"));

    assert_eq!(scope.digest(), Err(DigestError::Diverged { ttl: 10 }));
    assert_eq!(scope.stats().passes, 10);
    assert_eq!(scope.phase(), None);

    // the tree stays usable after a divergence
    assert_eq!(scope.apply(|_| ()), Err(DigestError::Diverged { ttl: 10 }));
    feedback.run();
    assert_eq!(scope.apply(|_| ()), Ok(()));
}

#[test]
fn test_clean_watchers_short_circuit() {
    let scope = Scope::new();
    let n = 100;
    for i in 0..n {
        scope.set(format!("k{i}"), i);
        scope.watch(move |s| s.get(&format!("k{i}")), |_, _, _| {});
    }
    scope.digest().unwrap();

    scope.digest().unwrap();
    assert_eq!(scope.stats().evaluations, n);

    scope.set("k50", -1);
    scope.digest().unwrap();
    // one full pass, then a second one that stops at the dirty watcher
    assert_eq!(scope.stats().evaluations, n + 51);
    assert_eq!(scope.stats().passes, 2);
}

#[test]
fn test_nan_transitions() {
    let scope = Scope::new();
    scope.set("n", f64::NAN);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    scope.watch(|s| s.get("n"), move |new, _, _| s.borrow_mut().push(new.clone()));

    scope.digest().unwrap();
    scope.digest().unwrap();
    assert_eq!(seen.borrow().len(), 1);

    scope.set("n", 3);
    scope.digest().unwrap();
    scope.set("n", f64::NAN);
    scope.digest().unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[1], Value::from(3));
    assert!(seen[2].is_nan());
}

#[test]
fn test_apply_async_twice_is_one_digest() {
    let host = Rc::new(ManualHost::new());
    let scope = Scope::with_config(ScopeConfig::default().with_host(host.clone()));
    let ran = Rc::new(Cell::new(0));
    for _ in 0..2 {
        let ran = ran.clone();
        scope.apply_async(move |_| ran.set(ran.get() + 1));
    }
    assert_eq!(host.pending(), 1);
    assert_eq!(ran.get(), 0);

    host.run_until_idle(4);
    assert_eq!(ran.get(), 2);
    assert_eq!(scope.stats().digests, 1);
}

#[test]
fn test_child_shares_parent_reference_until_shadowed() {
    let root = Scope::new();
    root.set("x", Value::array([1, 2, 3]));
    let child = root.new_child();
    let isolated = root.new_isolated();

    assert!(child.get("x").same(&root.get("x")));
    assert!(isolated.get("x").is_undefined());

    child.set("x", Value::array([1, 2, 3]));
    assert!(!child.get("x").same(&root.get("x")));
    assert!(child.get("x").deep_eq(&root.get("x")));
}

#[test]
fn test_collection_watch_over_object_keys() {
    let scope = Scope::new();
    let obj = Value::object([("a", 1)]);
    scope.set("obj", obj.clone());
    let olds = Rc::new(RefCell::new(Vec::new()));
    let o = olds.clone();
    scope.watch_collection(|s| s.get("obj"), move |_, old, _| {
        o.borrow_mut().push(old.to_json());
    });

    scope.digest().unwrap();
    obj.set_key("b", 2);
    scope.digest().unwrap();
    scope.digest().unwrap();
    obj.remove_key("a");
    scope.digest().unwrap();

    assert_eq!(
        *olds.borrow(),
        vec![
            serde_json::json!({"a": 1.0}),
            serde_json::json!({"a": 1.0}),
            serde_json::json!({"a": 1.0, "b": 2.0}),
        ]
    );
}
