use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::config::ScopeConfig;
use crate::digest::{DigestStats, Watcher, WatcherKey};
use crate::effects::Deregister;
use crate::error::{Phase, isolate};
use crate::host::{Host, TimerId};
use crate::value::Value;

pub type ScopeId = usize;

pub(crate) type Task = Box<dyn FnOnce(&Scope)>;
pub(crate) type PostTask = Box<dyn FnOnce()>;
type EventListener = Rc<dyn Fn()>;

/// State owned by the root and referenced by every scope in the tree.
pub(crate) struct Tree {
    pub(crate) watchers: RefCell<SlotMap<WatcherKey, Watcher>>,
    pub(crate) next_watcher_seq: Cell<u64>,
    pub(crate) last_dirty: Cell<Option<WatcherKey>>,
    pub(crate) phase: Cell<Option<Phase>>,
    pub(crate) async_queue: RefCell<VecDeque<(Scope, Task)>>,
    pub(crate) apply_async_queue: RefCell<VecDeque<(Scope, Task)>>,
    pub(crate) apply_async_id: Cell<Option<TimerId>>,
    pub(crate) post_digest_queue: RefCell<VecDeque<PostTask>>,
    pub(crate) host: Rc<dyn Host>,
    pub(crate) ttl: usize,
    pub(crate) stats: Cell<DigestStats>,
    next_scope_id: Cell<ScopeId>,
}

impl Tree {
    fn new(config: ScopeConfig) -> Self {
        Self {
            watchers: RefCell::new(SlotMap::with_key()),
            next_watcher_seq: Cell::new(0),
            last_dirty: Cell::new(None),
            phase: Cell::new(None),
            async_queue: RefCell::new(VecDeque::new()),
            apply_async_queue: RefCell::new(VecDeque::new()),
            apply_async_id: Cell::new(None),
            post_digest_queue: RefCell::new(VecDeque::new()),
            host: config.host,
            ttl: config.digest_ttl,
            stats: Cell::new(DigestStats::default()),
            next_scope_id: Cell::new(0),
        }
    }

    fn next_scope_id(&self) -> ScopeId {
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        id
    }

    /// Frees watcher slots. Removed closures are dropped after the map
    /// borrow ends.
    pub(crate) fn release_watchers(&self, keys: impl IntoIterator<Item = WatcherKey>) {
        let removed: Vec<Watcher> = {
            let mut watchers = self.watchers.borrow_mut();
            keys.into_iter()
                .filter_map(|key| watchers.remove(key))
                .collect()
        };
        if !removed.is_empty() {
            self.last_dirty.set(None);
        }
        drop(removed);
    }

    pub(crate) fn record_fault(&self) {
        let mut stats = self.stats.get();
        stats.faults += 1;
        self.stats.set(stats);
    }
}

/// A node in the scope tree.
///
/// `Scope` is a cheap, cloneable handle. Parents own their children; a
/// child only holds weak links upward, so dropping the root handle (and
/// every clone of it) releases the whole tree.
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Rc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    pub(crate) tree: Rc<Tree>,
    state: RefCell<HashMap<String, Value>>,
    /// Where reads fall through to. `None` for roots and isolated scopes.
    proto: Option<Weak<ScopeInner>>,
    parent: Option<Weak<ScopeInner>>,
    root: Weak<ScopeInner>,
    children: RefCell<SmallVec<[Scope; 4]>>,
    /// `(registration seq, key)`, ascending by seq. `None` once destroyed.
    pub(crate) watchers: RefCell<Option<Vec<(u64, WatcherKey)>>>,
    listeners: RefCell<HashMap<String, Vec<(u64, EventListener)>>>,
    next_listener_id: Cell<u64>,
    isolated: bool,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Some(keys) = self.watchers.get_mut().take() {
            self.tree.release_watchers(keys.into_iter().map(|(_, key)| key));
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("isolated", &self.inner.isolated)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Scope {
    /// Creates a root scope with default settings.
    pub fn new() -> Self {
        Self::with_config(ScopeConfig::default())
    }

    pub fn with_config(config: ScopeConfig) -> Self {
        let tree = Rc::new(Tree::new(config));
        let id = tree.next_scope_id();
        let inner = Rc::new_cyclic(|me| ScopeInner {
            id,
            tree,
            state: RefCell::new(HashMap::new()),
            proto: None,
            parent: None,
            root: me.clone(),
            children: RefCell::new(SmallVec::new()),
            watchers: RefCell::new(Some(Vec::new())),
            listeners: RefCell::new(HashMap::new()),
            next_listener_id: Cell::new(0),
            isolated: false,
        });
        log::debug!("created root scope {id}");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<ScopeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn tree(&self) -> &Rc<Tree> {
        &self.inner.tree
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn host(&self) -> Rc<dyn Host> {
        self.inner.tree.host.clone()
    }

    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.watchers.borrow().is_none()
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Scope::from_inner)
    }

    /// The tree's root. Falls back to `self` if the root has been dropped.
    pub fn root(&self) -> Scope {
        self.inner
            .root
            .upgrade()
            .map(Scope::from_inner)
            .unwrap_or_else(|| self.clone())
    }

    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.borrow().to_vec()
    }

    pub fn watcher_count(&self) -> usize {
        self.inner
            .watchers
            .borrow()
            .as_ref()
            .map_or(0, |w| w.len())
    }

    // ---- state ------------------------------------------------------------

    /// Reads `key`, falling through to the creating scope chain when the
    /// key is not set locally. Missing keys read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        if let Some(v) = self.inner.state.borrow().get(key) {
            return v.clone();
        }
        match self.inner.proto.as_ref().and_then(Weak::upgrade) {
            Some(proto) => Scope::from_inner(proto).get(key),
            None => Value::Undefined,
        }
    }

    /// Writes locally. Never touches an ancestor's state.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .state
            .borrow_mut()
            .insert(key.into(), value.into());
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.inner.state.borrow().contains_key(key)
    }

    /// Removes a local key, uncovering any inherited value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.state.borrow_mut().remove(key)
    }

    /// Locally set keys and values, sorted by key.
    pub fn own_state(&self) -> BTreeMap<String, Value> {
        self.inner
            .state
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ---- hierarchy --------------------------------------------------------

    /// Child that inherits this scope's state.
    pub fn new_child(&self) -> Scope {
        self.new_child_of(false, self)
    }

    /// Child with an empty state bag of its own.
    pub fn new_isolated(&self) -> Scope {
        self.new_child_of(true, self)
    }

    /// Creates a child attached under `parent`. A non-isolated child
    /// inherits state from `self`; either kind digests as part of
    /// `parent`'s subtree and shares its queues.
    pub fn new_child_of(&self, isolated: bool, parent: &Scope) -> Scope {
        let tree = parent.inner.tree.clone();
        let id = tree.next_scope_id();
        let child = Scope::from_inner(Rc::new(ScopeInner {
            id,
            tree,
            state: RefCell::new(HashMap::new()),
            proto: (!isolated).then(|| Rc::downgrade(&self.inner)),
            parent: Some(Rc::downgrade(&parent.inner)),
            root: parent.inner.root.clone(),
            children: RefCell::new(SmallVec::new()),
            watchers: RefCell::new(Some(Vec::new())),
            listeners: RefCell::new(HashMap::new()),
            next_listener_id: Cell::new(0),
            isolated,
        }));
        parent.inner.children.borrow_mut().push(child.clone());
        log::trace!(
            "scope {id} created under {} (isolated: {isolated})",
            parent.id()
        );
        child
    }

    /// Depth-first, pre-order. Descends into a scope's children only if
    /// `visit` returned true for it; returns false as soon as any visit did.
    pub fn every_scope(&self, visit: &mut dyn FnMut(&Scope) -> bool) -> bool {
        if !visit(self) {
            return false;
        }
        let children = self.inner.children.borrow().clone();
        for child in children.iter() {
            if !child.every_scope(visit) {
                return false;
            }
        }
        true
    }

    /// Detaches this scope from its parent and drops its watchers and
    /// event listeners. Listeners registered for `$destroy` fire first.
    /// Children are not destroyed, but they are no longer reachable from
    /// the root and so stop taking part in its digests.
    pub fn destroy(&self) {
        if self.is_destroyed() {
            return;
        }
        self.broadcast("$destroy");

        if let Some(parent) = self.parent() {
            parent
                .inner
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(&c.inner, &self.inner));
        }

        let keys = self.inner.watchers.borrow_mut().take().unwrap_or_default();
        self.inner
            .tree
            .release_watchers(keys.into_iter().map(|(_, key)| key));
        self.inner.listeners.borrow_mut().clear();
        log::debug!("scope {} destroyed", self.id());
    }

    // ---- events -----------------------------------------------------------

    /// Registers `listener` under `name` on this scope.
    pub fn on(&self, name: impl Into<String>, listener: impl Fn() + 'static) -> Deregister {
        let name = name.into();
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .entry(name.clone())
            .or_default()
            .push((id, Rc::new(listener)));

        let weak = Rc::downgrade(&self.inner);
        Deregister::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut listeners = inner.listeners.borrow_mut();
            if let Some(list) = listeners.get_mut(&name) {
                list.retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Fires the listeners registered under `name` on this scope only.
    pub fn emit(&self, name: &str) {
        self.fire(name);
    }

    /// Same as [`Scope::emit`]: listeners on this scope only, no payload.
    pub fn broadcast(&self, name: &str) {
        self.fire(name);
    }

    fn fire(&self, name: &str) {
        let listeners: Vec<EventListener> = match self.inner.listeners.borrow().get(name) {
            Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
            None => return,
        };
        for listener in listeners {
            if isolate("event listener", || listener()).is_err() {
                self.inner.tree.record_fault();
            }
        }
    }
}
