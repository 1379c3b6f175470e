//! Push-style change feeds.
//!
//! A listener receives the full current result set once when it subscribes and
//! again after every committed write that touches its scope. The returned
//! [`Subscription`] guard owns the registration: dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{LedgerError, Result};

type ChangeFn<T> = Box<dyn FnMut(&[T])>;
type ErrorFn = Box<dyn FnMut(&LedgerError)>;

struct Callbacks<T> {
    on_change: ChangeFn<T>,
    on_error: ErrorFn,
}

struct Listener<T> {
    callbacks: RefCell<Callbacks<T>>,
    /// Set when a publish reached the listener while its callback was running.
    stale: Cell<bool>,
    active: Cell<bool>,
}

struct Registry<T, S> {
    next_id: u64,
    listeners: Vec<(u64, S, Rc<Listener<T>>)>,
}

pub struct Feed<T, S> {
    registry: Rc<RefCell<Registry<T, S>>>,
}

impl<T: 'static, S: Clone + 'static> Feed<T, S> {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry { next_id: 1, listeners: Vec::new() })),
        }
    }

    pub fn subscribe<L>(
        &self,
        scope: S,
        on_change: impl FnMut(&[T]) + 'static,
        on_error: impl FnMut(&LedgerError) + 'static,
        mut load: L,
    ) -> Subscription
    where
        L: FnMut(&S) -> Result<Vec<T>>,
    {
        let listener = Rc::new(Listener {
            callbacks: RefCell::new(Callbacks {
                on_change: Box::new(on_change),
                on_error: Box::new(on_error),
            }),
            stale: Cell::new(false),
            active: Cell::new(true),
        });
        let id = {
            let mut reg = self.registry.borrow_mut();
            let id = reg.next_id;
            reg.next_id += 1;
            reg.listeners.push((id, scope.clone(), Rc::clone(&listener)));
            id
        };
        debug!(listener = id, "subscribed");

        deliver(&listener, &scope, &mut load);

        let weak: Weak<RefCell<Registry<T, S>>> = Rc::downgrade(&self.registry);
        Subscription {
            release: Some(Box::new(move || {
                let Some(registry) = weak.upgrade() else { return };
                let removed = {
                    let mut reg = registry.borrow_mut();
                    let pos = reg.listeners.iter().position(|(lid, _, _)| *lid == id);
                    pos.map(|pos| reg.listeners.remove(pos))
                };
                // Dropped outside the borrow: its closures may own other subscriptions.
                if let Some((_, _, listener)) = removed {
                    listener.active.set(false);
                    debug!(listener = id, "unsubscribed");
                }
            })),
        }
    }

    /// Re-run `load` for every listener whose scope satisfies `matches` and deliver the result.
    pub fn publish<M, L>(&self, matches: M, mut load: L)
    where
        M: Fn(&S) -> bool,
        L: FnMut(&S) -> Result<Vec<T>>,
    {
        let targets: Vec<(S, Rc<Listener<T>>)> = self
            .registry
            .borrow()
            .listeners
            .iter()
            .filter(|(_, scope, _)| matches(scope))
            .map(|(_, scope, l)| (scope.clone(), Rc::clone(l)))
            .collect();

        for (scope, listener) in targets {
            // An earlier callback in this round may have unsubscribed it.
            if !listener.active.get() {
                continue;
            }
            deliver(&listener, &scope, &mut load);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.borrow().listeners.len()
    }
}

impl<T: 'static, S: Clone + 'static> Default for Feed<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and hand the result to the listener, repeating while writes made from
/// inside the callback left it stale.
fn deliver<T, S, L>(listener: &Listener<T>, scope: &S, load: &mut L)
where
    L: FnMut(&S) -> Result<Vec<T>>,
{
    let Ok(mut callbacks) = listener.callbacks.try_borrow_mut() else {
        // The outer delivery for this listener reloads once the callback returns.
        listener.stale.set(true);
        return;
    };
    loop {
        listener.stale.set(false);
        match load(scope) {
            Ok(items) => (callbacks.on_change)(&items),
            Err(e) => (callbacks.on_error)(&e),
        }
        if !listener.stale.get() || !listener.active.get() {
            break;
        }
    }
}

/// Registration handle returned by every `subscribe*` call.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}
