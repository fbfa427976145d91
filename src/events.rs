//! Explicit listener registries.
//!
//! There is no ambient reactive system: components that announce changes
//! own a registry, subscribers get an id back, and callbacks run
//! synchronously on the engine thread after state commits.

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A list of callbacks for one event type.
pub struct ListenerRegistry<T> {
    next_id: u64,
    listeners: Vec<(u64, Box<dyn FnMut(&T)>)>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    /// Registers a callback; returns the handle that removes it.
    pub fn subscribe(&mut self, listener: impl FnMut(&T) + 'static) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        SubscriptionId(id)
    }

    /// Removes a callback. Returns false when the handle was already gone.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != subscription.0);
        self.listeners.len() != before
    }

    /// Invokes every callback with `event`, in subscription order.
    pub fn emit(&mut self, event: &T) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<T> std::fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ListenerRegistry::new();

        let sink = Rc::clone(&seen);
        let sub = registry.subscribe(move |event: &u32| sink.borrow_mut().push(*event));
        registry.emit(&1);
        registry.emit(&2);
        assert!(registry.unsubscribe(sub));
        registry.emit(&3);

        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(!registry.unsubscribe(sub), "double unsubscribe is a no-op");
    }

    #[test]
    fn test_listeners_fire_in_subscription_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        for tag in ["first", "second", "third"] {
            let sink = Rc::clone(&order);
            registry.subscribe(move |_: &()| sink.borrow_mut().push(tag));
        }
        registry.emit(&());
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }
}
