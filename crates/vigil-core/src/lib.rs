//! # Scopes, Watchers, and the Digest
//!
//! Vigil is a dirty-checking reactivity core. Instead of emitting change
//! notifications, callers mutate plain state and then run a *digest*: every
//! registered watcher is re-evaluated, and listeners fire for the ones whose
//! value changed, pass after pass, until nothing changes any more.
//!
//! There are four main pieces:
//!
//! - [`Scope`]: a node in a tree, holding a key/value state bag and its own
//!   watchers.
//! - `watch` / `watch_deep` / `watch_collection` / `watch_group`: ways of
//!   registering interest in a value.
//! - `digest` / `apply`: the convergence loop and its usual entry point.
//! - `eval_async` / `apply_async` / `post_digest`: three queues with
//!   different timing guarantees.
//!
//! ## Watching
//!
//! ```rust
//! use std::rc::Rc;
//! use std::cell::Cell;
//! use vigil_core::*;
//!
//! let scope = Scope::new();
//! scope.set("name", "Jane");
//!
//! let calls = Rc::new(Cell::new(0));
//! let seen = calls.clone();
//! scope.watch(
//!     |s| s.get("name"),
//!     move |_new, _old, _scope| seen.set(seen.get() + 1),
//! );
//!
//! scope.digest().unwrap();
//! assert_eq!(calls.get(), 1);
//!
//! scope.digest().unwrap(); // unchanged
//! assert_eq!(calls.get(), 1);
//!
//! scope.set("name", "Bob");
//! scope.digest().unwrap();
//! assert_eq!(calls.get(), 2);
//! ```
//!
//! Listeners may write state that other watchers observe; the digest keeps
//! going until the graph settles. A graph that never settles fails with
//! [`DigestError::Diverged`] after the configured number of passes (10 by
//! default).
//!
//! ## Scope trees
//!
//! `new_child` creates a scope that reads through to its parent's state;
//! `new_isolated` creates one that does not. Both share the root's queues
//! and are digested whenever an ancestor is. `apply` always digests from the
//! root, so a mutation anywhere reaches every watcher.
//!
//! ```rust
//! use vigil_core::*;
//!
//! let root = Scope::new();
//! root.set("x", Value::array([1, 2, 3]));
//!
//! let child = root.new_child();
//! assert!(child.get("x").same(&root.get("x")));
//!
//! let isolated = root.new_isolated();
//! assert!(isolated.get("x").is_undefined());
//! ```
//!
//! ## Deferred work
//!
//! - `eval_async` runs a task inside the current digest, or schedules one
//!   on the [`Host`] if none is running.
//! - `apply_async` coalesces calls into a single future `apply`.
//! - `post_digest` runs once after the next digest converges.
//!
//! Panics raised by watch functions, listeners and queued tasks are caught
//! and logged; they never abort the digest for other watchers.

pub mod collection;
pub mod config;
pub mod digest;
pub mod effects;
pub mod error;
pub mod group;
pub mod host;
pub mod prelude;
pub mod scope;
pub mod value;

pub use config::*;
pub use digest::{DigestStats, ListenerFn, WatchFn, WatcherKey};
pub use effects::*;
pub use error::*;
pub use group::GroupListener;
pub use host::*;
pub use scope::*;
pub use value::*;
