//! Thread-local tracking of callback nesting.
//!
//! Every inbound middleware handler enters a [`CallbackScope`] before running
//! user code. Synchronous entry points that would block on a middleware
//! response check [`is_within_callback`] and refuse to run, since the response
//! could only be delivered by the very thread that is blocking.

use core::cell::Cell;

thread_local! {
    static CALLBACK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// `true` while the current thread is executing a user callback.
pub fn is_within_callback() -> bool {
    CALLBACK_DEPTH.with(|depth| depth.get() > 0)
}

/// Scope guard incrementing the callback depth of the current thread for its
/// lifetime.
pub(crate) struct CallbackScope;

impl CallbackScope {
    pub(crate) fn enter() -> Self {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}
