use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::CallState;
use crate::error::{AdapterError, Result};
use crate::thread_context;
use crate::value::{ValueDeserializer, ValueEntity, ValueSerializer};

/// Invoked exactly once when the call reaches a terminal state.
pub type ResponseCallback = Box<dyn FnOnce() + Send>;

pub(crate) type OnCall = Box<dyn Fn(&Weak<ConsumerCallContext>, bool) + Send + Sync>;

/// Context of one consumer-side method invocation.
///
/// The host serializes the input parameters, dispatches via
/// [`call_async`](Self::call_async) (or [`call_blocking`](Self::call_blocking))
/// and reads the output parameters once the state is [`CallState::Returned`].
/// Dropping the last reference before the response arrives cancels the call:
/// the owning method evicts its pending entry through the on-destroy hook, and
/// a late response is logged and dropped.
pub struct ConsumerCallContext {
    weak_self: Weak<ConsumerCallContext>,
    input_parameters: ValueEntity,
    output_parameters: ValueEntity,
    state: AtomicU8,
    callback: Mutex<Option<ResponseCallback>>,
    on_call: OnCall,
    on_destroy: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    finished: Mutex<bool>,
    finished_signal: Condvar,
}

impl ConsumerCallContext {
    pub(crate) fn new(on_call: OnCall) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            input_parameters: ValueEntity::new(),
            output_parameters: ValueEntity::new(),
            state: AtomicU8::new(CallState::Initial as u8),
            callback: Mutex::new(None),
            on_call,
            on_destroy: Mutex::new(None),
            finished: Mutex::new(false),
            finished_signal: Condvar::new(),
        })
    }

    pub fn call_state(&self) -> CallState {
        CallState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Serializer for the input parameters; commit with `end()` before
    /// dispatching.
    pub fn input_serializer(&self) -> ValueSerializer<'_> {
        self.input_parameters.serializer()
    }

    pub fn input_deserializer(&self) -> ValueDeserializer<'_> {
        self.input_parameters.deserializer()
    }

    /// Deserializer over the response: the return value first, then any
    /// output parameters.
    pub fn output_deserializer(&self) -> ValueDeserializer<'_> {
        self.output_parameters.deserializer()
    }

    /// Dispatches the call. Passing no callback makes this a one-way call:
    /// nothing is retained after dispatch and no response is awaited.
    ///
    /// Fails with `InvalidState` unless the context is still
    /// [`CallState::Initial`].
    pub fn call_async(&self, callback: Option<ResponseCallback>) -> Result<()> {
        self.state
            .compare_exchange(
                CallState::Initial as u8,
                CallState::Called as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| {
                AdapterError::InvalidState(
                    "cannot dispatch a call context that is not in the Initial state".to_owned(),
                )
            })?;
        let one_way = callback.is_none();
        *self.callback.lock() = callback;
        (self.on_call)(&self.weak_self, one_way);
        Ok(())
    }

    /// Dispatches the call and blocks until it terminates or `timeout`
    /// expires; a timeout discards the call. Returns the terminal state.
    ///
    /// Fails with `InvalidUsage` when invoked from inside a callback, since
    /// the response could never be delivered to a blocked handler thread.
    pub fn call_blocking(&self, timeout: Duration) -> Result<CallState> {
        if thread_context::is_within_callback() {
            return Err(AdapterError::InvalidUsage(
                "cannot call a method synchronously from inside a callback".to_owned(),
            ));
        }
        self.call_async(Some(Box::new(|| {})))?;

        let deadline = Instant::now() + timeout;
        let mut finished = self.finished.lock();
        while !*finished {
            let now = Instant::now();
            if now >= deadline {
                drop(finished);
                self.on_timeout();
                return Ok(self.call_state());
            }
            self.finished_signal.wait_for(&mut finished, deadline - now);
        }
        Ok(self.call_state())
    }

    /// Registers the hook run when the context is dropped.
    pub(crate) fn set_on_destroy(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.on_destroy.lock() = Some(hook);
    }

    /// Owned copy of the serialized input parameters.
    pub(crate) fn input_data(&self) -> Vec<u8> {
        self.input_parameters.copy_data()
    }

    /// Response arrived: `Called → Returned`, store the payload, fire the
    /// callback. Returns `false` (and does nothing) if the call already
    /// reached a terminal state.
    pub(crate) fn on_return(&self, response: Vec<u8>) -> bool {
        if !self.transition(CallState::Returned) {
            return false;
        }
        self.output_parameters.set_data(response);
        self.finish();
        true
    }

    /// The call is abandoned: `Called → Discarded`, fire the callback with no
    /// output. Returns `false` if the call already reached a terminal state.
    pub(crate) fn on_timeout(&self) -> bool {
        if !self.transition(CallState::Discarded) {
            return false;
        }
        self.finish();
        true
    }

    fn transition(&self, to: CallState) -> bool {
        self.state
            .compare_exchange(
                CallState::Called as u8,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn finish(&self) {
        // The CAS in `transition` admits exactly one caller, so the callback
        // fires at most once.
        if let Some(callback) = self.callback.lock().take() {
            callback();
        }
        let mut finished = self.finished.lock();
        *finished = true;
        self.finished_signal.notify_all();
    }
}

impl Drop for ConsumerCallContext {
    fn drop(&mut self) {
        if let Some(hook) = self.on_destroy.lock().take() {
            hook();
        }
    }
}
