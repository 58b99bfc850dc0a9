//! The ambient-transaction stack: mutations issued while a
//! transaction is "pushed" attach to it instead of spawning an
//! autocommit transaction. `thread_local!` keeps this state per OS
//! thread — a multi-threaded embedder runs one engine instance (and
//! one stack) per thread.

use super::tx::Transaction;
use std::any::Any;
use std::cell::RefCell;

thread_local! {
    static AMBIENT: RefCell<Vec<Box<dyn Any>>> = RefCell::new(Vec::new());
}

pub fn push_ambient<T: 'static, K: 'static>(transaction: Transaction<T, K>) {
    AMBIENT.with(|stack| stack.borrow_mut().push(Box::new(transaction)));
}

pub fn pop_ambient() {
    AMBIENT.with(|stack| {
        stack.borrow_mut().pop();
    });
}

/// The innermost ambient transaction matching `(T, K)`, if any. A
/// stack holding transactions over unrelated collection types simply
/// doesn't match — collection mutations only ever look for their own
/// `(T, K)` at the top of a *logical* per-type stack, which is why
/// `mutate` pushes/pops around exactly the callback that cares.
#[must_use]
pub fn current_ambient<T: 'static, K: 'static>() -> Option<Transaction<T, K>> {
    AMBIENT.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find_map(|entry| entry.downcast_ref::<Transaction<T, K>>())
            .cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_clears_ambient() {
        let tx: Transaction<String, u32> = Transaction::new(false);
        push_ambient(tx.clone());
        assert!(current_ambient::<String, u32>().is_some());
        pop_ambient();
        assert!(current_ambient::<String, u32>().is_none());
    }

    #[test]
    fn unrelated_types_do_not_match() {
        let tx: Transaction<String, u32> = Transaction::new(false);
        push_ambient(tx);
        assert!(current_ambient::<i64, u32>().is_none());
    }
}
