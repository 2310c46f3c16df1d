//! Contracts the adapter requires from the messaging middleware.
//!
//! The middleware itself is an external collaborator; the adapter only needs
//! topic pub-sub and RPC primitives behind the traits below plus a
//! [`ParticipantFactory`] to create participants. [`local`] ships an
//! in-process implementation used by the integration tests and by hosts that
//! wire two adapters together in one process.

pub mod local;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::AdapterError;

/// Media type announced on data (pub-sub) endpoints.
pub const MEDIA_TYPE_DATA: &str = "application/vnd.vector.sil.data; protocolVersion=1";
/// Media type announced on RPC endpoints.
pub const MEDIA_TYPE_RPC: &str = "application/vnd.vector.sil.rpc; protocolVersion=1";

/// Topic, media type and mandatory matching labels of an endpoint. The
/// middleware only connects endpoints whose topic, media type and labels all
/// agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub topic: String,
    pub media_type: String,
    pub labels: Vec<(String, String)>,
}

impl EndpointSpec {
    /// `true` if both sides' mandatory labels are satisfied by the other.
    pub fn matches(&self, other: &EndpointSpec) -> bool {
        fn labels_satisfied(wanted: &EndpointSpec, offered: &EndpointSpec) -> bool {
            wanted.labels.iter().all(|(key, value)| {
                offered
                    .labels
                    .iter()
                    .any(|(k, v)| k == key && v == value)
            })
        }
        self.topic == other.topic
            && self.media_type == other.media_type
            && labels_satisfied(self, other)
            && labels_satisfied(other, self)
    }
}

/// Status of a finished RPC call attempt, reported to the client's result
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCallStatus {
    Success,
    /// No matching server; reported synchronously from within
    /// [`RpcClient::call`].
    ServerNotReachable,
    InternalServerError,
    UndefinedError,
}

/// Result event delivered to an RPC client's handler.
#[derive(Debug, Clone)]
pub struct RpcCallResultEvent {
    /// The caller-supplied handle of [`RpcClient::call`].
    pub call_handle: u64,
    pub status: RpcCallStatus,
    pub data: Bytes,
}

/// Request event delivered to an RPC server's handler. `call_token`
/// identifies the call for [`RpcServer::submit_result`].
#[derive(Debug, Clone)]
pub struct RpcCallEvent {
    pub call_token: u64,
    pub data: Bytes,
}

pub type DataMessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;
pub type RpcResultHandler = Arc<dyn Fn(RpcCallResultEvent) + Send + Sync>;
pub type RpcRequestHandler = Arc<dyn Fn(RpcCallEvent) + Send + Sync>;

pub trait DataPublisher: Send + Sync {
    fn publish(&self, data: Vec<u8>);
}

/// Handle keeping a subscription alive; dropping it unsubscribes.
pub trait DataSubscriber: Send + Sync {}

pub trait RpcClient: Send + Sync {
    /// Dispatches a call. The result handler registered at creation receives
    /// exactly one [`RpcCallResultEvent`] carrying `call_handle`; when no
    /// server is reachable, it is invoked synchronously from within this
    /// method.
    fn call(&self, data: Vec<u8>, call_handle: u64);
}

pub trait RpcServer: Send + Sync {
    /// Submits the response to the call identified by `call_token`.
    fn submit_result(&self, call_token: u64, data: Vec<u8>);
}

/// A connection of this process to the middleware. Endpoint handlers are
/// invoked on the middleware's internal I/O threads.
pub trait Participant: Send + Sync {
    fn create_data_publisher(&self, name: &str, spec: &EndpointSpec) -> Arc<dyn DataPublisher>;

    fn create_data_subscriber(
        &self,
        name: &str,
        spec: &EndpointSpec,
        handler: DataMessageHandler,
    ) -> Box<dyn DataSubscriber>;

    fn create_rpc_client(
        &self,
        name: &str,
        spec: &EndpointSpec,
        handler: RpcResultHandler,
    ) -> Arc<dyn RpcClient>;

    fn create_rpc_server(
        &self,
        name: &str,
        spec: &EndpointSpec,
        handler: RpcRequestHandler,
    ) -> Arc<dyn RpcServer>;

    /// Starts the autonomous lifecycle of this participant, if it has one.
    fn start_lifecycle(&self) {}

    /// Stops the lifecycle and blocks until it has wound down.
    fn stop_lifecycle(&self) {}
}

/// Participant configuration resolved by [`crate::service::ClaService`] before
/// connecting. An empty `contents` selects the middleware defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantConfig {
    /// Path of the configuration file, if one was used.
    pub source_path: Option<String>,
    pub contents: String,
}

/// Creates middleware participants. Creation may fail transiently (e.g. the
/// registry is not up yet); the service retries until it succeeds.
pub trait ParticipantFactory: Send + Sync {
    fn configuration_from_file(&self, path: &str) -> Result<ParticipantConfig, AdapterError>;

    fn configuration_from_string(&self, contents: &str) -> ParticipantConfig;

    fn create_participant(
        &self,
        config: &ParticipantConfig,
        participant_name: &str,
    ) -> Result<Arc<dyn Participant>, AdapterError>;
}
