//! A minimal, executor-agnostic promise.
//!
//! Nothing in this crate's dependency stack pulls in `tokio` or
//! `futures` — IC canisters bring their own executor, and this engine
//! doesn't commit to one either. `Deferred<T>` is a resolve-once cell
//! any `std::future::Future` executor can poll, used wherever a
//! caller needs to await completion of something that resolves
//! asynchronously, such as a transaction's persistence.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

/// The resolving half. Dropping it without calling `resolve` leaves
/// every `Deferred` waiting forever, same as an unresolved `Promise`.
pub struct Resolver<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Resolver<T> {
    pub fn resolve(self, value: T) {
        let mut inner = self.inner.borrow_mut();
        inner.value = Some(value);
        for waker in inner.wakers.drain(..) {
            waker.wake();
        }
    }
}

/// The awaiting half; cheap to clone, every clone observes the same
/// resolution.
#[derive(Clone)]
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone> Deferred<T> {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().value.is_some()
    }

    /// Non-blocking read of the resolution, if any has happened yet.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.inner.borrow().value.clone()
    }
}

/// Create a linked `(Resolver, Deferred)` pair.
#[must_use]
pub fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let inner = Rc::new(RefCell::new(Inner {
        value: None,
        wakers: Vec::new(),
    }));
    (
        Resolver {
            inner: Rc::clone(&inner),
        },
        Deferred { inner },
    )
}

impl<T: Clone> Future for Deferred<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        if let Some(value) = &inner.value {
            Poll::Ready(value.clone())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::deferred;

    #[test]
    fn peek_before_resolve_is_none() {
        let (_resolver, d) = deferred::<i32>();
        assert_eq!(d.peek(), None);
    }

    #[test]
    fn resolve_is_observable_from_every_clone() {
        let (resolver, d) = deferred::<i32>();
        let d2 = d.clone();
        resolver.resolve(42);
        assert_eq!(d.peek(), Some(42));
        assert_eq!(d2.peek(), Some(42));
    }
}
