//! Publish/subscribe plumbing shared by the store, undo manager and session.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Listener<E> = Rc<dyn Fn(&E)>;

/// A list of listeners for one kind of event.
///
/// Listeners are cloned out before dispatch, so a listener may subscribe,
/// unsubscribe or trigger further events while it runs.
pub(crate) struct Registry<E> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(u64, Listener<E>)>>,
}

impl<E: 'static> Registry<E> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            next_id: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn subscribe(self: &Rc<Self>, listener: impl Fn(&E) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));

        let registry: Weak<Self> = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
            }
        })
    }

    pub(crate) fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

/// Handle returned by every `subscribe`/`watch` call.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] may be
/// called any number of times; only the first call has an effect.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving events.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let registry = Registry::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s1 = seen.clone();
        let _a = registry.subscribe(move |v| s1.borrow_mut().push(("a", *v)));
        let s2 = seen.clone();
        let _b = registry.subscribe(move |v| s2.borrow_mut().push(("b", *v)));

        registry.emit(&7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = Registry::<()>::new();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let mut sub = registry.subscribe(move |_| c.set(c.get() + 1));
        let c = count.clone();
        let _other = registry.subscribe(move |_| c.set(c.get() + 10));

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        registry.emit(&());
        assert_eq!(count.get(), 10);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Registry::<()>::new();
        {
            let _sub = registry.subscribe(|_| {});
            assert!(!registry.is_empty());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let registry = Registry::<()>::new();
        let mut sub = registry.subscribe(|_| {});
        drop(registry);
        sub.unsubscribe();
    }
}
