//! Member runtimes: the typed endpoints of a distributed object.
//!
//! Each member binds one path to one middleware endpoint. Consumed members
//! mirror remote state into the local process, provided members push local
//! state out. The concrete runtimes are plain structs; dispatch over the
//! kind/direction combinations happens by matching [`Member`], not through a
//! trait-object hierarchy.

mod data;
mod event;
mod field;
mod method;

pub use data::{ConsumedData, ProvidedData};
pub use event::{ConsumedEvent, ProvidedEvent};
pub use field::{ConsumedField, ProvidedField};
pub use method::{CallResult, ConsumedMethod, ProvidedMethod, ProviderCallback};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{AdapterError, Result};
use crate::path::CommunicationInfo;
use crate::transport::{EndpointSpec, Participant, MEDIA_TYPE_DATA, MEDIA_TYPE_RPC};
use crate::value::ValueUpdateMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Data,
    Event,
    Field,
    Method,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read locally, written/serviced by the peer.
    Consumed,
    /// Written/serviced locally, read by the peer.
    Provided,
}

/// When a provided data/event/field member transmits its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTrigger {
    /// Transmit on every value update.
    OnUpdate,
    /// Transmit only when the value actually changed.
    OnChange,
}

impl TxTrigger {
    pub(crate) fn update_mode(self) -> ValueUpdateMode {
        match self {
            TxTrigger::OnUpdate => ValueUpdateMode::OnUpdate,
            TxTrigger::OnChange => ValueUpdateMode::OnChange,
        }
    }
}

/// State common to all member runtimes.
pub(crate) struct MemberBase {
    info: CommunicationInfo,
    kind: MemberKind,
    direction: Direction,
    connected: AtomicBool,
}

impl MemberBase {
    pub(crate) fn new(full_path: &str, kind: MemberKind, direction: Direction) -> Result<Self> {
        Ok(Self {
            info: CommunicationInfo::parse(full_path)?,
            kind,
            direction,
            connected: AtomicBool::new(false),
        })
    }

    pub(crate) fn full_path(&self) -> &str {
        self.info.canonical_name()
    }

    pub(crate) fn kind(&self) -> MemberKind {
        self.kind
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn pubsub_spec(&self) -> EndpointSpec {
        self.spec(MEDIA_TYPE_DATA)
    }

    pub(crate) fn rpc_spec(&self) -> EndpointSpec {
        self.spec(MEDIA_TYPE_RPC)
    }

    fn spec(&self, media_type: &str) -> EndpointSpec {
        EndpointSpec {
            topic: self.info.topic().to_owned(),
            media_type: media_type.to_owned(),
            labels: self.info.labels(),
        }
    }
}

/// One-shot gate released by the first inbound transmission of a consumed
/// member.
#[derive(Default)]
pub(crate) struct FirstTransmissionGate {
    timeout: Mutex<Option<Duration>>,
    received: Mutex<bool>,
    signal: Condvar,
}

impl FirstTransmissionGate {
    /// Arms the gate with the timeout later used by [`wait`](Self::wait).
    pub(crate) fn enable(&self, timeout: Duration) {
        *self.timeout.lock() = Some(timeout);
    }

    pub(crate) fn notify(&self) {
        let mut received = self.received.lock();
        *received = true;
        self.signal.notify_all();
    }

    /// Blocks until the first transmission or the armed timeout expires.
    /// Returns immediately when the gate was never armed.
    pub(crate) fn wait(&self) -> Result<()> {
        let Some(timeout) = *self.timeout.lock() else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        let mut received = self.received.lock();
        while !*received {
            let now = Instant::now();
            if now >= deadline {
                return Err(AdapterError::Timeout);
            }
            self.signal.wait_for(&mut received, deadline - now);
        }
        Ok(())
    }
}

/// A member slot of a distributed object, discriminated by kind × direction.
#[derive(Clone)]
pub(crate) enum Member {
    ConsumedData(Arc<ConsumedData>),
    ProvidedData(Arc<ProvidedData>),
    ConsumedEvent(Arc<ConsumedEvent>),
    ProvidedEvent(Arc<ProvidedEvent>),
    ConsumedField(Arc<ConsumedField>),
    ProvidedField(Arc<ProvidedField>),
    ConsumedMethod(Arc<ConsumedMethod>),
    ProvidedMethod(Arc<ProvidedMethod>),
}

impl Member {
    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        match self {
            Member::ConsumedData(member) => member.connect(participant),
            Member::ProvidedData(member) => member.connect(participant),
            Member::ConsumedEvent(member) => member.connect(participant),
            Member::ProvidedEvent(member) => member.connect(participant),
            Member::ConsumedField(member) => member.connect(participant),
            Member::ProvidedField(member) => member.connect(participant),
            Member::ConsumedMethod(member) => member.connect(participant),
            Member::ProvidedMethod(member) => member.connect(participant),
        }
    }

    pub(crate) fn disconnect(&self) {
        match self {
            Member::ConsumedData(member) => member.disconnect(),
            Member::ProvidedData(member) => member.disconnect(),
            Member::ConsumedEvent(member) => member.disconnect(),
            Member::ProvidedEvent(member) => member.disconnect(),
            Member::ConsumedField(member) => member.disconnect(),
            Member::ProvidedField(member) => member.disconnect(),
            Member::ConsumedMethod(member) => member.disconnect(),
            Member::ProvidedMethod(member) => member.disconnect(),
        }
    }
}
