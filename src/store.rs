//! Observable state container.
//!
//! `Store<S>` owns one state value and hands out immutable snapshots. Every mutation goes
//! through [`Store::update`], after which subscribers are called with the new state.
//! Single-threaded: shared as `Rc<Store<S>>`, no locking.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<S> = Rc<dyn Fn(&S)>;

pub struct Store<S> {
    state: RefCell<Rc<S>>,
    listeners: RefCell<Vec<(ListenerId, Listener<S>)>>,
    next_listener: Cell<u64>,
    version: Cell<u64>,
}

impl<S: Clone> Store<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: RefCell::new(Rc::new(state)),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            version: Cell::new(0),
        }
    }

    /// Current state. Cheap; the snapshot never changes after it is taken.
    pub fn snapshot(&self) -> Rc<S> {
        Rc::clone(&self.state.borrow())
    }

    /// Incremented on every update.
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub fn subscribe(&self, listener: impl Fn(&S) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Apply `f` to the state, then notify subscribers.
    ///
    /// Snapshots taken earlier keep the old value (copy-on-write). Listeners may read or
    /// update the store themselves.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.borrow_mut();
            let result = f(Rc::make_mut(&mut *state));
            (result, Rc::clone(&*state))
        };
        self.version.set(self.version.get() + 1);

        let listeners: Vec<Listener<S>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
        result
    }
}

impl<S: Clone + Default> Default for Store<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_immutable() {
        let store = Store::new(vec![1]);
        let before = store.snapshot();
        store.update(|v| v.push(2));
        assert_eq!(*before, vec![1]);
        assert_eq!(*store.snapshot(), vec![1, 2]);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_listeners_see_new_state() {
        let store = Store::new(0u32);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(move |v| sink.borrow_mut().push(*v));

        store.update(|v| *v = 5);
        store.update(|v| *v += 1);
        assert_eq!(*seen.borrow(), vec![5, 6]);
    }

    #[test]
    fn test_unsubscribe() {
        let store = Store::new(0u32);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let id = store.subscribe(move |_| c.set(c.get() + 1));

        store.update(|v| *v = 1);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.update(|v| *v = 2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_listener_can_read_store() {
        let store = Rc::new(Store::new(String::new()));
        let seen = Rc::new(RefCell::new(String::new()));
        let weak = Rc::downgrade(&store);
        let sink = Rc::clone(&seen);
        store.subscribe(move |_| {
            if let Some(store) = weak.upgrade() {
                *sink.borrow_mut() = (*store.snapshot()).clone();
            }
        });

        store.update(|s| s.push_str("hello"));
        assert_eq!(*seen.borrow(), "hello");
    }

    #[test]
    fn test_update_returns_value() {
        let store = Store::new(vec![1, 2, 3]);
        let popped = store.update(|v| v.pop());
        assert_eq!(popped, Some(3));
    }
}
