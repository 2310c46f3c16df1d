//! Name → distributed-object map of one service.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AdapterError, Result};
use crate::object::DistributedObject;
use crate::transport::Participant;
use crate::worker::WorkerThreadService;

/// Registry of all distributed objects of a service, keyed by absolute path.
/// Objects can only be added while the service is disconnected.
pub(crate) struct DoRegistry {
    instances: Mutex<HashMap<String, Arc<DistributedObject>>>,
    participant: Mutex<Option<Arc<dyn Participant>>>,
    worker: Arc<WorkerThreadService>,
}

impl DoRegistry {
    pub(crate) fn new(worker: Arc<WorkerThreadService>) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            participant: Mutex::new(None),
            worker,
        }
    }

    /// Returns the object registered under `path`, creating it if absent.
    pub(crate) fn get_do(&self, path: &str) -> Result<Arc<DistributedObject>> {
        if path.is_empty() {
            return Err(AdapterError::InvalidUsage(
                "cannot get a DO with an empty path".to_owned(),
            ));
        }

        let mut instances = self.instances.lock();
        if let Some(instance) = instances.get(path) {
            return Ok(Arc::clone(instance));
        }
        if self.participant.lock().is_some() {
            return Err(AdapterError::InvalidState(
                "cannot get a new DO while the service is connected".to_owned(),
            ));
        }

        let instance = Arc::new(DistributedObject::new(
            path.to_owned(),
            Arc::clone(&self.worker),
        ));
        instances.insert(path.to_owned(), Arc::clone(&instance));
        debug!("created DO '{path}'");
        Ok(instance)
    }

    pub(crate) fn connect(&self, participant: &Arc<dyn Participant>) {
        *self.participant.lock() = Some(Arc::clone(participant));
        for instance in self.instances.lock().values() {
            instance.connect(participant);
        }
    }

    pub(crate) fn disconnect(&self) {
        for instance in self.instances.lock().values() {
            instance.disconnect();
        }
        *self.participant.lock() = None;
    }
}
