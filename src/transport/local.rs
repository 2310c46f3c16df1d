//! In-process middleware: a label-matching loopback broker.
//!
//! All participants created from one [`LocalBroker`] share a topic space. A
//! single delivery thread plays the role of the middleware's I/O threads:
//! published data and RPC traffic are routed on it, and endpoint handlers are
//! invoked from it. The one exception is the server-not-reachable signal,
//! which the contract requires to be raised synchronously from within
//! [`RpcClient::call`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    DataMessageHandler, DataPublisher, DataSubscriber, EndpointSpec, Participant,
    ParticipantConfig, ParticipantFactory, RpcCallEvent, RpcCallResultEvent, RpcCallStatus,
    RpcClient, RpcRequestHandler, RpcResultHandler, RpcServer,
};
use crate::error::AdapterError;

enum BrokerMessage {
    Publish {
        spec: EndpointSpec,
        data: Bytes,
    },
    Request {
        server: u64,
        token: u64,
        data: Bytes,
    },
    Response {
        client: u64,
        call_handle: u64,
        data: Bytes,
    },
    Shutdown,
}

#[derive(Default)]
struct Endpoints {
    subscribers: HashMap<u64, (EndpointSpec, DataMessageHandler)>,
    servers: HashMap<u64, (EndpointSpec, RpcRequestHandler)>,
    clients: HashMap<u64, (EndpointSpec, RpcResultHandler)>,
}

struct BrokerInner {
    endpoints: Mutex<Endpoints>,
    /// In-flight RPC calls: token → (client endpoint, caller's handle).
    pending_calls: Mutex<HashMap<u64, (u64, u64)>>,
    tx: Sender<BrokerMessage>,
    next_id: AtomicU64,
}

impl BrokerInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn deliver(&self, rx: &Receiver<BrokerMessage>) {
        while let Ok(message) = rx.recv() {
            match message {
                BrokerMessage::Publish { spec, data } => {
                    // Snapshot matching handlers so delivery runs unlocked.
                    let handlers: Vec<DataMessageHandler> = {
                        let endpoints = self.endpoints.lock();
                        endpoints
                            .subscribers
                            .values()
                            .filter(|(sub_spec, _)| sub_spec.matches(&spec))
                            .map(|(_, handler)| Arc::clone(handler))
                            .collect()
                    };
                    trace!(topic = %spec.topic, subscribers = handlers.len(), "delivering data");
                    for handler in handlers {
                        handler(data.clone());
                    }
                }
                BrokerMessage::Request { server, token, data } => {
                    let handler = self
                        .endpoints
                        .lock()
                        .servers
                        .get(&server)
                        .map(|(_, handler)| Arc::clone(handler));
                    match handler {
                        Some(handler) => handler(RpcCallEvent {
                            call_token: token,
                            data,
                        }),
                        None => {
                            debug!("dropping request for a server that has gone away");
                            self.pending_calls.lock().remove(&token);
                        }
                    }
                }
                BrokerMessage::Response {
                    client,
                    call_handle,
                    data,
                } => {
                    let handler = self
                        .endpoints
                        .lock()
                        .clients
                        .get(&client)
                        .map(|(_, handler)| Arc::clone(handler));
                    match handler {
                        Some(handler) => handler(RpcCallResultEvent {
                            call_handle,
                            status: RpcCallStatus::Success,
                            data,
                        }),
                        None => debug!("dropping response for a client that has gone away"),
                    }
                }
                BrokerMessage::Shutdown => return,
            }
        }
    }
}

/// Shared topic space plus its delivery thread.
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let inner = Arc::new(BrokerInner {
            endpoints: Mutex::new(Endpoints::default()),
            pending_calls: Mutex::new(HashMap::new()),
            tx,
            next_id: AtomicU64::new(1),
        });
        let delivery_inner = Arc::clone(&inner);
        let delivery = std::thread::spawn(move || delivery_inner.deliver(&rx));
        Self {
            inner,
            delivery: Mutex::new(Some(delivery)),
        }
    }

    /// Creates a participant on this broker's topic space.
    pub fn participant(&self, name: &str) -> Arc<dyn Participant> {
        Arc::new(LocalParticipant {
            broker: Arc::clone(&self.inner),
            name: name.to_owned(),
        })
    }

    /// A factory producing participants on this broker, for
    /// [`crate::service::ClaService::new`].
    pub fn factory(&self) -> LocalParticipantFactory {
        LocalParticipantFactory {
            broker: Arc::clone(&self.inner),
        }
    }
}

impl Drop for LocalBroker {
    fn drop(&mut self) {
        let _ = self.inner.tx.send(BrokerMessage::Shutdown);
        if let Some(handle) = self.delivery.lock().take() {
            let _ = handle.join();
        }
    }
}

struct LocalParticipant {
    broker: Arc<BrokerInner>,
    name: String,
}

impl Participant for LocalParticipant {
    fn create_data_publisher(&self, name: &str, spec: &EndpointSpec) -> Arc<dyn DataPublisher> {
        trace!(participant = %self.name, %name, "creating data publisher");
        Arc::new(LocalDataPublisher {
            broker: Arc::clone(&self.broker),
            spec: spec.clone(),
        })
    }

    fn create_data_subscriber(
        &self,
        name: &str,
        spec: &EndpointSpec,
        handler: DataMessageHandler,
    ) -> Box<dyn DataSubscriber> {
        trace!(participant = %self.name, %name, "creating data subscriber");
        let id = self.broker.next_id();
        self.broker
            .endpoints
            .lock()
            .subscribers
            .insert(id, (spec.clone(), handler));
        Box::new(LocalDataSubscriber {
            broker: Arc::clone(&self.broker),
            id,
        })
    }

    fn create_rpc_client(
        &self,
        name: &str,
        spec: &EndpointSpec,
        handler: RpcResultHandler,
    ) -> Arc<dyn RpcClient> {
        trace!(participant = %self.name, %name, "creating rpc client");
        let id = self.broker.next_id();
        self.broker
            .endpoints
            .lock()
            .clients
            .insert(id, (spec.clone(), Arc::clone(&handler)));
        Arc::new(LocalRpcClient {
            broker: Arc::clone(&self.broker),
            spec: spec.clone(),
            id,
            handler,
        })
    }

    fn create_rpc_server(
        &self,
        name: &str,
        spec: &EndpointSpec,
        handler: RpcRequestHandler,
    ) -> Arc<dyn RpcServer> {
        trace!(participant = %self.name, %name, "creating rpc server");
        let id = self.broker.next_id();
        self.broker
            .endpoints
            .lock()
            .servers
            .insert(id, (spec.clone(), handler));
        Arc::new(LocalRpcServer {
            broker: Arc::clone(&self.broker),
            id,
        })
    }
}

struct LocalDataPublisher {
    broker: Arc<BrokerInner>,
    spec: EndpointSpec,
}

impl DataPublisher for LocalDataPublisher {
    fn publish(&self, data: Vec<u8>) {
        let _ = self.broker.tx.send(BrokerMessage::Publish {
            spec: self.spec.clone(),
            data: Bytes::from(data),
        });
    }
}

struct LocalDataSubscriber {
    broker: Arc<BrokerInner>,
    id: u64,
}

impl DataSubscriber for LocalDataSubscriber {}

impl Drop for LocalDataSubscriber {
    fn drop(&mut self) {
        self.broker.endpoints.lock().subscribers.remove(&self.id);
    }
}

struct LocalRpcClient {
    broker: Arc<BrokerInner>,
    spec: EndpointSpec,
    id: u64,
    handler: RpcResultHandler,
}

impl RpcClient for LocalRpcClient {
    fn call(&self, data: Vec<u8>, call_handle: u64) {
        let server = {
            let endpoints = self.broker.endpoints.lock();
            endpoints
                .servers
                .iter()
                .find(|(_, (spec, _))| spec.matches(&self.spec))
                .map(|(id, _)| *id)
        };
        match server {
            Some(server) => {
                let token = self.broker.next_id();
                self.broker
                    .pending_calls
                    .lock()
                    .insert(token, (self.id, call_handle));
                let _ = self.broker.tx.send(BrokerMessage::Request {
                    server,
                    token,
                    data: Bytes::from(data),
                });
            }
            None => {
                // Synchronous unreachable signal, per the endpoint contract.
                (self.handler)(RpcCallResultEvent {
                    call_handle,
                    status: RpcCallStatus::ServerNotReachable,
                    data: Bytes::new(),
                });
            }
        }
    }
}

impl Drop for LocalRpcClient {
    fn drop(&mut self) {
        self.broker.endpoints.lock().clients.remove(&self.id);
    }
}

struct LocalRpcServer {
    broker: Arc<BrokerInner>,
    id: u64,
}

impl RpcServer for LocalRpcServer {
    fn submit_result(&self, call_token: u64, data: Vec<u8>) {
        let pending = self.broker.pending_calls.lock().remove(&call_token);
        match pending {
            Some((client, call_handle)) => {
                let _ = self.broker.tx.send(BrokerMessage::Response {
                    client,
                    call_handle,
                    data: Bytes::from(data),
                });
            }
            None => debug!("result submitted for an unknown call token"),
        }
    }
}

impl Drop for LocalRpcServer {
    fn drop(&mut self) {
        self.broker.endpoints.lock().servers.remove(&self.id);
    }
}

/// [`ParticipantFactory`] producing participants on one [`LocalBroker`].
pub struct LocalParticipantFactory {
    broker: Arc<BrokerInner>,
}

impl ParticipantFactory for LocalParticipantFactory {
    fn configuration_from_file(&self, path: &str) -> Result<ParticipantConfig, AdapterError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            AdapterError::Configuration(format!(
                "error creating participant configuration from file '{path}': {err}"
            ))
        })?;
        Ok(ParticipantConfig {
            source_path: Some(path.to_owned()),
            contents,
        })
    }

    fn configuration_from_string(&self, contents: &str) -> ParticipantConfig {
        ParticipantConfig {
            source_path: None,
            contents: contents.to_owned(),
        }
    }

    fn create_participant(
        &self,
        _config: &ParticipantConfig,
        participant_name: &str,
    ) -> Result<Arc<dyn Participant>, AdapterError> {
        Ok(Arc::new(LocalParticipant {
            broker: Arc::clone(&self.broker),
            name: participant_name.to_owned(),
        }))
    }
}
