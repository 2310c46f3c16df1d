//! Distributed objects: keyed containers of members under a common path
//! prefix.

mod container;

pub use container::{InstContainer, InstContainerElement};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::member::{
    ConsumedData, ConsumedEvent, ConsumedField, ConsumedMethod, Member, ProvidedData,
    ProvidedEvent, ProvidedField, ProvidedMethod, TxTrigger,
};
use crate::transport::Participant;
use crate::worker::WorkerThreadService;

/// A named bundle of members whose state is mirrored with the peer.
///
/// Members are created lazily by the first request for their path and live
/// until the object is dropped. A path identifies at most one member role:
/// requesting an existing path as a different kind or direction fails with
/// `InvalidUsage`. New members can only be requested while the service is
/// disconnected.
pub struct DistributedObject {
    path: String,
    members: Mutex<HashMap<String, Member>>,
    participant: Mutex<Option<Arc<dyn Participant>>>,
    worker: Arc<WorkerThreadService>,
}

impl DistributedObject {
    pub(crate) fn new(path: String, worker: Arc<WorkerThreadService>) -> Self {
        Self {
            path,
            members: Mutex::new(HashMap::new()),
            participant: Mutex::new(None),
            worker,
        }
    }

    /// The object's full path, i.e. `Namespace::Instance`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn consumed_data(&self, path: &str) -> Result<Arc<ConsumedData>> {
        self.member(
            path,
            |member| match member {
                Member::ConsumedData(data) => Some(Arc::clone(data)),
                _ => None,
            },
            |full_path| {
                let data = Arc::new(ConsumedData::new(full_path)?);
                Ok((Member::ConsumedData(Arc::clone(&data)), data))
            },
        )
    }

    pub fn provided_data(&self, path: &str, tx_trigger: TxTrigger) -> Result<Arc<ProvidedData>> {
        self.member(
            path,
            |member| match member {
                Member::ProvidedData(data) => Some(Arc::clone(data)),
                _ => None,
            },
            |full_path| {
                let data = Arc::new(ProvidedData::new(full_path, tx_trigger)?);
                Ok((Member::ProvidedData(Arc::clone(&data)), data))
            },
        )
    }

    pub fn consumed_event(&self, path: &str) -> Result<Arc<ConsumedEvent>> {
        self.member(
            path,
            |member| match member {
                Member::ConsumedEvent(event) => Some(Arc::clone(event)),
                _ => None,
            },
            |full_path| {
                let event = Arc::new(ConsumedEvent::new(full_path)?);
                Ok((Member::ConsumedEvent(Arc::clone(&event)), event))
            },
        )
    }

    pub fn provided_event(&self, path: &str, tx_trigger: TxTrigger) -> Result<Arc<ProvidedEvent>> {
        self.member(
            path,
            |member| match member {
                Member::ProvidedEvent(event) => Some(Arc::clone(event)),
                _ => None,
            },
            |full_path| {
                let event = Arc::new(ProvidedEvent::new(full_path, tx_trigger)?);
                Ok((Member::ProvidedEvent(Arc::clone(&event)), event))
            },
        )
    }

    pub fn consumed_field(&self, path: &str) -> Result<Arc<ConsumedField>> {
        self.member(
            path,
            |member| match member {
                Member::ConsumedField(field) => Some(Arc::clone(field)),
                _ => None,
            },
            |full_path| {
                let field = Arc::new(ConsumedField::new(full_path, Arc::clone(&self.worker))?);
                Ok((Member::ConsumedField(Arc::clone(&field)), field))
            },
        )
    }

    pub fn provided_field(&self, path: &str, tx_trigger: TxTrigger) -> Result<Arc<ProvidedField>> {
        self.member(
            path,
            |member| match member {
                Member::ProvidedField(field) => Some(Arc::clone(field)),
                _ => None,
            },
            |full_path| {
                let field = Arc::new(ProvidedField::new(full_path, tx_trigger)?);
                Ok((Member::ProvidedField(Arc::clone(&field)), field))
            },
        )
    }

    pub fn consumed_method(&self, path: &str) -> Result<Arc<ConsumedMethod>> {
        self.member(
            path,
            |member| match member {
                Member::ConsumedMethod(method) => Some(Arc::clone(method)),
                _ => None,
            },
            |full_path| {
                let method = ConsumedMethod::new(full_path, Arc::clone(&self.worker))?;
                Ok((Member::ConsumedMethod(Arc::clone(&method)), method))
            },
        )
    }

    pub fn provided_method(&self, path: &str) -> Result<Arc<ProvidedMethod>> {
        self.member(
            path,
            |member| match member {
                Member::ProvidedMethod(method) => Some(Arc::clone(method)),
                _ => None,
            },
            |full_path| {
                let method = ProvidedMethod::new(full_path)?;
                Ok((Member::ProvidedMethod(Arc::clone(&method)), method))
            },
        )
    }

    fn member<T>(
        &self,
        path: &str,
        as_existing: impl Fn(&Member) -> Option<Arc<T>>,
        create: impl FnOnce(&str) -> Result<(Member, Arc<T>)>,
    ) -> Result<Arc<T>> {
        let mut members = self.members.lock();
        if let Some(member) = members.get(path) {
            return as_existing(member).ok_or_else(|| {
                AdapterError::InvalidUsage(format!(
                    "DO member with existing path '{path}' but different type was requested"
                ))
            });
        }
        if self.participant.lock().is_some() {
            return Err(AdapterError::InvalidState(
                "cannot get a new DO member while the DO is connected".to_owned(),
            ));
        }

        let full_path = format!("{}.{path}", self.path);
        let (member, typed) = create(&full_path)?;
        members.insert(path.to_owned(), member);
        debug!("created DO member '{full_path}'");
        Ok(typed)
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        debug!("connecting members of {}...", self.path);
        *self.participant.lock() = Some(Arc::clone(participant));
        for member in self.members.lock().values() {
            member.connect(participant);
        }
    }

    pub(crate) fn disconnect(&self) {
        for member in self.members.lock().values() {
            member.disconnect();
        }
        *self.participant.lock() = None;
    }
}
