use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    ConsumedEvent, ConsumedMethod, Direction, MemberBase, MemberKind, ProvidedEvent,
    ProvidedMethod, ProviderCallback, TxTrigger,
};
use crate::call::ProviderCallContext;
use crate::error::{AdapterError, Result};
use crate::transport::Participant;
use crate::value::ValueEntity;
use crate::worker::WorkerThreadService;

const GETTER_SUFFIX: &str = ".Get";
const SETTER_SUFFIX: &str = ".Set";
const NOTIFICATION_SUFFIX: &str = ".Notification";

/// Field member mirroring a value owned by the peer.
///
/// The getter, setter and notification event all share the field's value
/// entity: a successful getter/setter response or an inbound notification
/// atomically updates the field's observable value. On the consumer side the
/// setter behaves exactly like the getter, because the setter RPC's response
/// payload is the new field value.
pub struct ConsumedField {
    base: MemberBase,
    value: Arc<ValueEntity>,
    worker: Arc<WorkerThreadService>,
    getter: Mutex<Option<Arc<ConsumedMethod>>>,
    setter: Mutex<Option<Arc<ConsumedMethod>>>,
    notification: Mutex<Option<Arc<ConsumedEvent>>>,
}

impl ConsumedField {
    pub(crate) fn new(full_path: &str, worker: Arc<WorkerThreadService>) -> Result<Self> {
        Ok(Self {
            base: MemberBase::new(full_path, MemberKind::Field, Direction::Consumed)?,
            value: Arc::new(ValueEntity::new()),
            worker,
            getter: Mutex::new(None),
            setter: Mutex::new(None),
            notification: Mutex::new(None),
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

    /// The field's cached value, shared with its getter, setter and
    /// notification.
    pub fn value(&self) -> &Arc<ValueEntity> {
        &self.value
    }

    /// The field's getter method; a successful response updates the cached
    /// value. Created on first request, which must happen while disconnected.
    pub fn getter(&self) -> Result<Arc<ConsumedMethod>> {
        self.sub_member(&self.getter, "getter", |path| {
            ConsumedMethod::with_mirror(
                &format!("{path}{GETTER_SUFFIX}"),
                Arc::clone(&self.worker),
                Arc::clone(&self.value),
            )
        })
    }

    /// The field's setter method. Like the getter, its response payload is
    /// the (new) field value and updates the cache.
    pub fn setter(&self) -> Result<Arc<ConsumedMethod>> {
        self.sub_member(&self.setter, "setter", |path| {
            ConsumedMethod::with_mirror(
                &format!("{path}{SETTER_SUFFIX}"),
                Arc::clone(&self.worker),
                Arc::clone(&self.value),
            )
        })
    }

    /// The field's notification event, sharing the cached value.
    pub fn notification(&self) -> Result<Arc<ConsumedEvent>> {
        self.sub_member(&self.notification, "event", |path| {
            ConsumedEvent::with_value(
                &format!("{path}{NOTIFICATION_SUFFIX}"),
                Arc::clone(&self.value),
            )
            .map(Arc::new)
        })
    }

    fn sub_member<T>(
        &self,
        slot: &Mutex<Option<Arc<T>>>,
        what: &str,
        create: impl FnOnce(&str) -> Result<Arc<T>>,
    ) -> Result<Arc<T>> {
        if self.is_connected() {
            return Err(AdapterError::InvalidState(format!(
                "cannot get a new {what} while the consumed field member is connected"
            )));
        }
        let mut slot = slot.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = create(self.base.full_path())?;
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        if let Some(getter) = self.getter.lock().as_ref() {
            getter.connect(participant);
        }
        if let Some(setter) = self.setter.lock().as_ref() {
            setter.connect(participant);
        }
        if let Some(notification) = self.notification.lock().as_ref() {
            notification.connect(participant);
        }
        self.base.set_connected(true);
        debug!("member connected: {}", self.full_path());
    }

    pub(crate) fn disconnect(&self) {
        if let Some(notification) = self.notification.lock().as_ref() {
            notification.disconnect();
        }
        if let Some(setter) = self.setter.lock().as_ref() {
            setter.disconnect();
        }
        if let Some(getter) = self.getter.lock().as_ref() {
            getter.disconnect();
        }
        self.base.set_connected(false);
        debug!("member disconnected: {}", self.full_path());
    }
}

/// Field member owning a value read by the peer.
///
/// The getter and setter come with default implementations operating on the
/// shared value entity; the notification event transmits the value according
/// to the field's [`TxTrigger`].
pub struct ProvidedField {
    base: MemberBase,
    value: Arc<ValueEntity>,
    tx_trigger: TxTrigger,
    getter: Mutex<Option<Arc<ProvidedMethod>>>,
    setter: Mutex<Option<Arc<ProvidedMethod>>>,
    notification: Mutex<Option<Arc<ProvidedEvent>>>,
}

impl ProvidedField {
    pub(crate) fn new(full_path: &str, tx_trigger: TxTrigger) -> Result<Self> {
        Ok(Self {
            base: MemberBase::new(full_path, MemberKind::Field, Direction::Provided)?,
            value: Arc::new(ValueEntity::new()),
            tx_trigger,
            getter: Mutex::new(None),
            setter: Mutex::new(None),
            notification: Mutex::new(None),
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

    pub fn value(&self) -> &Arc<ValueEntity> {
        &self.value
    }

    /// The field's getter. Without a user callback it replies with the
    /// current value bytes.
    pub fn getter(&self) -> Result<Arc<ProvidedMethod>> {
        self.sub_member(&self.getter, "getter", |path| {
            let value = Arc::clone(&self.value);
            let default: ProviderCallback = Arc::new(move |context: &ProviderCallContext| {
                context.set_output_data(value.copy_data());
            });
            ProvidedMethod::with_default(&format!("{path}{GETTER_SUFFIX}"), default)
        })
    }

    /// The field's setter. Without a user callback it stores the request
    /// payload as the new value and replies with it.
    pub fn setter(&self) -> Result<Arc<ProvidedMethod>> {
        self.sub_member(&self.setter, "setter", |path| {
            let value = Arc::clone(&self.value);
            let default: ProviderCallback = Arc::new(move |context: &ProviderCallContext| {
                let new_value = context.input_data();
                value.set_data(new_value.clone());
                context.set_output_data(new_value);
            });
            ProvidedMethod::with_default(&format!("{path}{SETTER_SUFFIX}"), default)
        })
    }

    /// The field's notification event, transmitting the shared value.
    pub fn notification(&self) -> Result<Arc<ProvidedEvent>> {
        self.sub_member(&self.notification, "event", |path| {
            ProvidedEvent::with_value(
                &format!("{path}{NOTIFICATION_SUFFIX}"),
                self.tx_trigger,
                Arc::clone(&self.value),
            )
            .map(Arc::new)
        })
    }

    fn sub_member<T>(
        &self,
        slot: &Mutex<Option<Arc<T>>>,
        what: &str,
        create: impl FnOnce(&str) -> Result<Arc<T>>,
    ) -> Result<Arc<T>> {
        if self.is_connected() {
            return Err(AdapterError::InvalidState(format!(
                "cannot get a new {what} while the provided field member is connected"
            )));
        }
        let mut slot = slot.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = create(self.base.full_path())?;
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        if let Some(getter) = self.getter.lock().as_ref() {
            getter.connect(participant);
        }
        if let Some(setter) = self.setter.lock().as_ref() {
            setter.connect(participant);
        }
        if let Some(notification) = self.notification.lock().as_ref() {
            notification.connect(participant);
        }
        self.base.set_connected(true);
        debug!("member connected: {}", self.full_path());
    }

    pub(crate) fn disconnect(&self) {
        if let Some(notification) = self.notification.lock().as_ref() {
            notification.disconnect();
        }
        if let Some(setter) = self.setter.lock().as_ref() {
            setter.disconnect();
        }
        if let Some(getter) = self.getter.lock().as_ref() {
            getter.disconnect();
        }
        self.base.set_connected(false);
        debug!("member disconnected: {}", self.full_path());
    }
}
