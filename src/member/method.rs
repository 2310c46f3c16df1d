use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::{Direction, MemberBase, MemberKind};
use crate::call::{ConsumerCallContext, ProviderCallContext};
use crate::error::Result;
use crate::thread_context::CallbackScope;
use crate::transport::{
    Participant, RpcCallEvent, RpcCallResultEvent, RpcCallStatus, RpcClient, RpcRequestHandler,
    RpcResultHandler, RpcServer,
};
use crate::value::ValueEntity;
use crate::worker::WorkerThreadService;

/// Outcome of one dispatch attempt of a consumer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    Success,
    ServerNotReachable,
    NotConnected,
    /// The call context was dropped (or already terminal); the attempt is
    /// drained without dispatching.
    ContextDestroyed,
}

type RetryCall = Box<dyn Fn() -> CallResult + Send>;

/// Method member calling a procedure served by the peer.
///
/// Calls are dispatched through [`ConsumerCallContext`]s created by
/// [`create_call_context`](Self::create_call_context). While the server is
/// unreachable, dispatch closures queue up and a worker task retries them in
/// dispatch order every second until the server answers again.
pub struct ConsumedMethod {
    weak_self: Weak<ConsumedMethod>,
    base: MemberBase,
    worker: Arc<WorkerThreadService>,
    /// A field getter/setter mirrors successful responses into the field's
    /// value entity.
    mirror: Option<Arc<ValueEntity>>,
    rpc_client: Mutex<Option<Arc<dyn RpcClient>>>,
    pending_calls: Mutex<HashMap<u64, Weak<ConsumerCallContext>>>,
    retry_queue: Mutex<Vec<RetryCall>>,
    server_reachable: AtomicBool,
    next_call_handle: AtomicU64,
}

impl ConsumedMethod {
    pub(crate) fn new(full_path: &str, worker: Arc<WorkerThreadService>) -> Result<Arc<Self>> {
        Self::build(full_path, worker, None)
    }

    pub(crate) fn with_mirror(
        full_path: &str,
        worker: Arc<WorkerThreadService>,
        mirror: Arc<ValueEntity>,
    ) -> Result<Arc<Self>> {
        Self::build(full_path, worker, Some(mirror))
    }

    fn build(
        full_path: &str,
        worker: Arc<WorkerThreadService>,
        mirror: Option<Arc<ValueEntity>>,
    ) -> Result<Arc<Self>> {
        let base = MemberBase::new(full_path, MemberKind::Method, Direction::Consumed)?;
        Ok(Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            base,
            worker,
            mirror,
            rpc_client: Mutex::new(None),
            pending_calls: Mutex::new(HashMap::new()),
            retry_queue: Mutex::new(Vec::new()),
            server_reachable: AtomicBool::new(true),
            next_call_handle: AtomicU64::new(1),
        }))
    }

    pub fn full_path(&self) -> &str {
        self.base.full_path()
    }

    pub fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    pub fn kind(&self) -> MemberKind {
        self.base.kind()
    }

    pub fn direction(&self) -> Direction {
        self.base.direction()
    }

    /// Creates a call context for one invocation. The caller owns its
    /// lifetime; dropping it before the response cancels the call.
    pub fn create_call_context(&self) -> Arc<ConsumerCallContext> {
        let method = self.weak_self.clone();
        ConsumerCallContext::new(Box::new(move |context, one_way| {
            if let Some(method) = method.upgrade() {
                method.send_request(context, one_way);
            }
        }))
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        let _queue = self.retry_queue.lock();
        let method = self.weak_self.clone();
        let handler: RpcResultHandler = Arc::new(move |event: RpcCallResultEvent| {
            let Some(method) = method.upgrade() else {
                return;
            };
            match event.status {
                RpcCallStatus::Success => {
                    method.on_receive_response(event.data.to_vec(), event.call_handle);
                }
                RpcCallStatus::ServerNotReachable => {
                    method.pending_calls.lock().remove(&event.call_handle);
                }
                RpcCallStatus::InternalServerError | RpcCallStatus::UndefinedError => {
                    error!(
                        "method call on {} failed: {:?}",
                        method.full_path(),
                        event.status
                    );
                    if let Some(context) = method.pop_call_context(event.call_handle) {
                        let _scope = CallbackScope::enter();
                        context.on_timeout();
                    }
                }
            }
        });
        let client =
            participant.create_rpc_client(self.base.full_path(), &self.base.rpc_spec(), handler);
        *self.rpc_client.lock() = Some(client);
        self.base.set_connected(true);
        debug!("member connected: {}", self.full_path());
    }

    pub(crate) fn disconnect(&self) {
        let mut queue = self.retry_queue.lock();
        queue.clear();
        self.base.set_connected(false);
        *self.rpc_client.lock() = None;
        debug!("member disconnected: {}", self.full_path());
    }

    fn send_request(&self, context: &Weak<ConsumerCallContext>, one_way: bool) {
        let method = self.weak_self.clone();
        let context = context.clone();
        let call: RetryCall = Box::new(move || Self::attempt(&method, &context, one_way));
        self.dispatch_call(call);
    }

    /// One dispatch attempt of one call. Re-invoked by the retry sweep until
    /// it stops returning `ServerNotReachable`/`NotConnected`.
    fn attempt(
        method: &Weak<ConsumedMethod>,
        context: &Weak<ConsumerCallContext>,
        one_way: bool,
    ) -> CallResult {
        let Some(method) = method.upgrade() else {
            return CallResult::ContextDestroyed;
        };
        let Some(context) = context.upgrade() else {
            return CallResult::ContextDestroyed;
        };
        if context.call_state().is_terminal() {
            return CallResult::ContextDestroyed;
        }
        if !method.base.is_connected() {
            return CallResult::NotConnected;
        }
        let Some(client) = method.rpc_client.lock().clone() else {
            return CallResult::NotConnected;
        };

        let call_handle = method.next_call_handle.fetch_add(1, Ordering::Relaxed);
        method
            .pending_calls
            .lock()
            .insert(call_handle, Arc::downgrade(&context));
        client.call(context.input_data(), call_handle);

        // An unreachable server is signalled synchronously from within
        // `call` by clearing the pending entry again.
        let mut pending = method.pending_calls.lock();
        if !pending.contains_key(&call_handle) {
            return CallResult::ServerNotReachable;
        }
        if one_way {
            pending.remove(&call_handle);
        } else {
            drop(pending);
            let method = Arc::downgrade(&method);
            context.set_on_destroy(Box::new(move || {
                if let Some(method) = method.upgrade() {
                    method.pop_call_context(call_handle);
                }
            }));
        }
        CallResult::Success
    }

    fn dispatch_call(&self, call: RetryCall) {
        let mut queue = self.retry_queue.lock();
        if !self.server_reachable.load(Ordering::SeqCst) {
            queue.push(call);
            return;
        }
        let result = call();
        if matches!(
            result,
            CallResult::ServerNotReachable | CallResult::NotConnected
        ) {
            self.server_reachable.store(false, Ordering::SeqCst);
            if queue.is_empty() {
                // Start retrying on the worker thread.
                let method = self.weak_self.clone();
                self.worker.push_task(Box::new(move || match method.upgrade() {
                    Some(method) => method.retry_calls(),
                    None => true,
                }));
            }
            queue.push(call);
        }
    }

    /// Walks the retry queue front to back, preserving dispatch order:
    /// a failed attempt stops the walk, drained entries leave the queue.
    /// Returns `true` (task done) once the server is reachable again.
    ///
    /// While `server_reachable` is `false` this retry task is the only thing
    /// that can flip it back, so the task keeps running even when the queue
    /// drains to empty through destroyed contexts; `dispatch_call` relies on
    /// it being alive to pick up calls queued in the meantime.
    fn retry_calls(&self) -> bool {
        let mut queue = self.retry_queue.lock();
        let mut processed = 0;
        for call in queue.iter() {
            match call() {
                CallResult::ServerNotReachable | CallResult::NotConnected => {
                    debug!("server for {} is still not reachable", self.full_path());
                    self.server_reachable.store(false, Ordering::SeqCst);
                    break;
                }
                CallResult::ContextDestroyed => {
                    processed += 1;
                }
                CallResult::Success => {
                    debug!(
                        "server is now reachable, call on {} succeeded",
                        self.full_path()
                    );
                    self.server_reachable.store(true, Ordering::SeqCst);
                    processed += 1;
                }
            }
        }
        queue.drain(..processed);
        self.server_reachable.load(Ordering::SeqCst)
    }

    fn on_receive_response(&self, payload: Vec<u8>, call_handle: u64) -> bool {
        let Some(context) = self.pop_call_context(call_handle) else {
            warn!(
                "received response on {} for a call context that no longer exists",
                self.full_path()
            );
            return false;
        };
        let _scope = CallbackScope::enter();
        if let Some(mirror) = &self.mirror {
            mirror.set_data(payload.clone());
        }
        context.on_return(payload)
    }

    fn pop_call_context(&self, call_handle: u64) -> Option<Arc<ConsumerCallContext>> {
        self.pending_calls
            .lock()
            .remove(&call_handle)
            .and_then(|weak| weak.upgrade())
    }
}

/// Callback servicing inbound calls of a provided method.
pub type ProviderCallback = Arc<dyn Fn(&ProviderCallContext) + Send + Sync>;

/// Method member serving calls issued by the peer.
pub struct ProvidedMethod {
    weak_self: Weak<ProvidedMethod>,
    base: MemberBase,
    callback: Mutex<Option<ProviderCallback>>,
    /// Field getters/setters fall back to this when no user callback is set.
    default_callback: Option<ProviderCallback>,
    rpc_server: Mutex<Option<Arc<dyn RpcServer>>>,
}

impl ProvidedMethod {
    pub(crate) fn new(full_path: &str) -> Result<Arc<Self>> {
        Self::build(full_path, None)
    }

    pub(crate) fn with_default(full_path: &str, default: ProviderCallback) -> Result<Arc<Self>> {
        Self::build(full_path, Some(default))
    }

    fn build(full_path: &str, default_callback: Option<ProviderCallback>) -> Result<Arc<Self>> {
        let base = MemberBase::new(full_path, MemberKind::Method, Direction::Provided)?;
        Ok(Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            base,
            callback: Mutex::new(default_callback.clone()),
            default_callback,
            rpc_server: Mutex::new(None),
        }))
    }

    pub fn full_path(&self) -> &str {
        self.base.full_path()
    }

    pub fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    pub fn kind(&self) -> MemberKind {
        self.base.kind()
    }

    pub fn direction(&self) -> Direction {
        self.base.direction()
    }

    /// Replaces the provider callback. `None` clears it, or restores the
    /// default for a field getter/setter. Replacement is serialized against
    /// running callbacks.
    pub fn set_callback(&self, callback: Option<ProviderCallback>) {
        *self.callback.lock() = callback.or_else(|| self.default_callback.clone());
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        let method = self.weak_self.clone();
        let handler: RpcRequestHandler = Arc::new(move |event: RpcCallEvent| {
            if let Some(method) = method.upgrade() {
                method.on_receive_request(event.data.to_vec(), event.call_token);
            }
        });
        let server =
            participant.create_rpc_server(self.base.full_path(), &self.base.rpc_spec(), handler);
        *self.rpc_server.lock() = Some(server);
        self.base.set_connected(true);
        debug!("member connected: {}", self.full_path());
    }

    pub(crate) fn disconnect(&self) {
        self.base.set_connected(false);
        *self.rpc_server.lock() = None;
        debug!("member disconnected: {}", self.full_path());
    }

    fn on_receive_request(&self, request: Vec<u8>, call_token: u64) {
        // The slot stays locked across the callback so replacement cannot
        // race a running invocation.
        let callback = self.callback.lock();
        let Some(callback) = callback.as_ref() else {
            warn!("no callback registered for method {}", self.full_path());
            return;
        };
        let context = ProviderCallContext::new(request);
        {
            let _scope = CallbackScope::enter();
            callback(&context);
        }
        let response = if context.outputs_serialized() {
            context.output_data()
        } else {
            Vec::new()
        };
        self.send_response(call_token, response);
    }

    fn send_response(&self, call_token: u64, data: Vec<u8>) {
        if !self.base.is_connected() {
            return;
        }
        if let Some(server) = self.rpc_server.lock().as_ref() {
            server.submit_result(call_token, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::local::LocalBroker;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn wait_until(predicate: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !predicate() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn echo_provider(broker: &LocalBroker) -> Arc<ProvidedMethod> {
        let participant = broker.participant("provider");
        let provided = ProvidedMethod::new("Ns::Do.Echo").unwrap();
        provided.set_callback(Some(Arc::new(|context: &ProviderCallContext| {
            let payload = {
                let mut de = context.input_deserializer();
                de.read_i32(32).unwrap_or_default()
            };
            let mut ser = context.output_serializer();
            ser.write_i32(payload, 32);
            ser.end();
        })));
        provided.connect(&participant);
        provided
    }

    #[test]
    fn call_round_trips_through_the_provider() {
        let broker = LocalBroker::new();
        let _provided = echo_provider(&broker);

        let worker = Arc::new(WorkerThreadService::new());
        let consumed = ConsumedMethod::new("Ns::Do.Echo", worker).unwrap();
        consumed.connect(&broker.participant("consumer"));

        let context = consumed.create_call_context();
        let mut ser = context.input_serializer();
        ser.write_i32(41, 32);
        ser.end();

        let state = context.call_blocking(Duration::from_secs(5)).unwrap();
        assert_eq!(state, crate::call::CallState::Returned);
        assert_eq!(context.output_deserializer().read_i32(32).unwrap(), 41);
    }

    #[test]
    fn unreachable_server_queues_and_retries_in_order() {
        let broker = LocalBroker::new();
        let worker = Arc::new(WorkerThreadService::new());
        let consumed = ConsumedMethod::new("Ns::Do.Echo", worker).unwrap();
        consumed.connect(&broker.participant("consumer"));

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut contexts = Vec::new();
        for tag in [1, 2, 3] {
            let context = consumed.create_call_context();
            let mut ser = context.input_serializer();
            ser.write_i32(tag, 32);
            ser.end();
            let o = Arc::clone(&order);
            let c = Arc::clone(&context);
            context
                .call_async(Some(Box::new(move || {
                    let echoed = c.output_deserializer().read_i32(32).unwrap();
                    o.lock().push(echoed);
                })))
                .unwrap();
            contexts.push(context);
        }
        assert!(!consumed.server_reachable.load(Ordering::SeqCst));

        // Server comes up; the worker sweep must dispatch 1, 2, 3 in order.
        let _provided = echo_provider(&broker);
        wait_until(|| order.lock().len() == 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn drained_queue_still_retries_calls_dispatched_while_unreachable() {
        let broker = LocalBroker::new();
        let worker = Arc::new(WorkerThreadService::new());
        let consumed = ConsumedMethod::new("Ns::Do.Echo", worker).unwrap();
        consumed.connect(&broker.participant("consumer"));

        // Server down: the call queues, then its context is dropped so the
        // sweep drains the queue to empty while the server is still
        // unreachable.
        let context = consumed.create_call_context();
        context.input_serializer().end();
        context.call_async(Some(Box::new(|| {}))).unwrap();
        drop(context);
        wait_until(|| consumed.retry_queue.lock().is_empty());
        assert!(!consumed.server_reachable.load(Ordering::SeqCst));

        // A call dispatched into the unreachable state must still go out
        // once the server comes up.
        let context = consumed.create_call_context();
        let mut ser = context.input_serializer();
        ser.write_i32(7, 32);
        ser.end();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        context
            .call_async(Some(Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        let _provided = echo_provider(&broker);
        wait_until(|| fired.load(Ordering::SeqCst) == 1);
        assert_eq!(context.call_state(), crate::call::CallState::Returned);
        assert_eq!(context.output_deserializer().read_i32(32).unwrap(), 7);
    }

    #[test]
    fn dropped_context_is_evicted_and_late_responses_ignored() {
        let broker = LocalBroker::new();
        let _provided = echo_provider(&broker);

        let worker = Arc::new(WorkerThreadService::new());
        let consumed = ConsumedMethod::new("Ns::Do.Echo", worker).unwrap();
        consumed.connect(&broker.participant("consumer"));

        let context = consumed.create_call_context();
        context.input_serializer().end();
        context.call_async(Some(Box::new(|| {}))).unwrap();
        drop(context);
        assert!(consumed.pending_calls.lock().is_empty());

        // The in-flight response finds no context and is dropped.
        std::thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn provider_without_callback_sends_no_response() {
        let broker = LocalBroker::new();
        let participant = broker.participant("provider");
        let provided = ProvidedMethod::new("Ns::Do.Quiet").unwrap();
        provided.connect(&participant);

        let worker = Arc::new(WorkerThreadService::new());
        let consumed = ConsumedMethod::new("Ns::Do.Quiet", worker).unwrap();
        consumed.connect(&broker.participant("consumer"));

        let context = consumed.create_call_context();
        context.input_serializer().end();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        context
            .call_async(Some(Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(context.call_state(), crate::call::CallState::Called);
    }

    #[test]
    fn one_way_call_retains_no_pending_entry() {
        let broker = LocalBroker::new();
        let _provided = echo_provider(&broker);

        let worker = Arc::new(WorkerThreadService::new());
        let consumed = ConsumedMethod::new("Ns::Do.Echo", worker).unwrap();
        consumed.connect(&broker.participant("consumer"));

        let context = consumed.create_call_context();
        context.input_serializer().end();
        context.call_async(None).unwrap();
        assert!(consumed.pending_calls.lock().is_empty());
    }
}
