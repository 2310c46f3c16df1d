use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{Direction, FirstTransmissionGate, MemberBase, MemberKind, TxTrigger};
use crate::error::Result;
use crate::thread_context::CallbackScope;
use crate::transport::{DataMessageHandler, DataPublisher, DataSubscriber, Participant};
use crate::value::{CallbackHandle, ValueEntity, ValueUpdateMode, INVALID_CALLBACK_HANDLE};

/// Data member mirroring a value published by the peer.
pub struct ConsumedData {
    base: MemberBase,
    value: Arc<ValueEntity>,
    subscriber: Mutex<Option<Box<dyn DataSubscriber>>>,
    first_rx: Arc<FirstTransmissionGate>,
}

impl ConsumedData {
    pub(crate) fn new(full_path: &str) -> Result<Self> {
        let value = Arc::new(ValueEntity::new());
        let first_rx = Arc::new(FirstTransmissionGate::default());
        let gate = Arc::clone(&first_rx);
        value.register_callback(Arc::new(move |_| gate.notify()), ValueUpdateMode::OnUpdate);
        Ok(Self {
            base: MemberBase::new(full_path, MemberKind::Data, Direction::Consumed)?,
            value,
            subscriber: Mutex::new(None),
            first_rx,
        })
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

    /// The value entity backing this member. Inbound messages overwrite it
    /// and fan out to its callbacks.
    pub fn value(&self) -> &Arc<ValueEntity> {
        &self.value
    }

    /// Arms [`wait_for_first_transmission`](Self::wait_for_first_transmission)
    /// with `timeout`.
    pub fn block_at_connect(&self, timeout: Duration) {
        self.first_rx.enable(timeout);
    }

    /// Blocks until the first inbound message, failing with `Timeout` once
    /// the armed timeout expires. Returns immediately if
    /// [`block_at_connect`](Self::block_at_connect) was never called.
    pub fn wait_for_first_transmission(&self) -> Result<()> {
        self.first_rx.wait()
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        let value = Arc::clone(&self.value);
        let handler: DataMessageHandler = Arc::new(move |data: Bytes| {
            let _scope = CallbackScope::enter();
            value.set_data(data.to_vec());
        });
        let subscriber = participant.create_data_subscriber(
            self.base.full_path(),
            &self.base.pubsub_spec(),
            handler,
        );
        *self.subscriber.lock() = Some(subscriber);
        self.base.set_connected(true);
        debug!("member connected: {}", self.full_path());
    }

    pub(crate) fn disconnect(&self) {
        self.base.set_connected(false);
        *self.subscriber.lock() = None;
        debug!("member disconnected: {}", self.full_path());
    }
}

/// Data member publishing a locally written value to the peer.
pub struct ProvidedData {
    base: MemberBase,
    value: Arc<ValueEntity>,
    tx_trigger: TxTrigger,
    publisher: Mutex<Option<Arc<dyn DataPublisher>>>,
    transmit_handle: Mutex<CallbackHandle>,
}

impl ProvidedData {
    pub(crate) fn new(full_path: &str, tx_trigger: TxTrigger) -> Result<Self> {
        Ok(Self {
            base: MemberBase::new(full_path, MemberKind::Data, Direction::Provided)?,
            value: Arc::new(ValueEntity::new()),
            tx_trigger,
            publisher: Mutex::new(None),
            transmit_handle: Mutex::new(INVALID_CALLBACK_HANDLE),
        })
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

    /// The value entity backing this member. Writing it triggers a transmit
    /// according to the member's [`TxTrigger`].
    pub fn value(&self) -> &Arc<ValueEntity> {
        &self.value
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        let publisher = participant
            .create_data_publisher(self.base.full_path(), &self.base.pubsub_spec());
        let transmit = Arc::clone(&publisher);
        let handle = self.value.register_callback(
            Arc::new(move |entity: &ValueEntity| transmit.publish(entity.copy_data())),
            self.tx_trigger.update_mode(),
        );
        *self.transmit_handle.lock() = handle;
        *self.publisher.lock() = Some(publisher);
        self.base.set_connected(true);
        debug!("member connected: {}", self.full_path());
    }

    pub(crate) fn disconnect(&self) {
        let handle = core::mem::replace(&mut *self.transmit_handle.lock(), INVALID_CALLBACK_HANDLE);
        self.value.unregister_callback(handle);
        self.base.set_connected(false);
        *self.publisher.lock() = None;
        debug!("member disconnected: {}", self.full_path());
    }
}
