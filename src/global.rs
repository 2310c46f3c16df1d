//! Process-wide service facade.
//!
//! Production hosts that only ever need one adapter install it once with
//! [`init`] and use the free functions from anywhere in the process. Tests
//! and multi-adapter hosts use [`crate::service::ClaService`] instances
//! directly.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AdapterError, Result};
use crate::object::{DistributedObject, InstContainer};
use crate::service::ClaService;
use crate::transport::{Participant, ParticipantFactory};

static SERVICE: Mutex<Option<Arc<ClaService>>> = Mutex::new(None);

/// Installs the process-wide service. Fails with `InvalidState` when one is
/// already installed.
pub fn init(factory: Box<dyn ParticipantFactory>) -> Result<()> {
    let mut service = SERVICE.lock();
    if service.is_some() {
        return Err(AdapterError::InvalidState(
            "the process-wide service is already initialized".to_owned(),
        ));
    }
    *service = Some(Arc::new(ClaService::new(factory)));
    Ok(())
}

/// Removes the process-wide service, stopping its worker thread. The service
/// should be disconnected first.
pub fn teardown() -> Result<()> {
    SERVICE
        .lock()
        .take()
        .map(drop)
        .ok_or_else(not_initialized)
}

/// The installed process-wide service.
pub fn instance() -> Result<Arc<ClaService>> {
    SERVICE.lock().as_ref().map(Arc::clone).ok_or_else(not_initialized)
}

/// See [`ClaService::connect`].
pub fn connect() -> Result<()> {
    instance()?.connect()
}

/// See [`ClaService::connect_with_name`].
pub fn connect_with_name(participant_name: &str) -> Result<()> {
    instance()?.connect_with_name(participant_name)
}

/// See [`ClaService::connect_with_participant`].
pub fn connect_with_participant(participant: Arc<dyn Participant>) -> Result<()> {
    instance()?.connect_with_participant(participant)
}

/// See [`ClaService::disconnect`].
pub fn disconnect() -> Result<()> {
    instance()?.disconnect()
}

/// See [`ClaService::get_do`].
pub fn get_do(path: &str) -> Result<Arc<DistributedObject>> {
    instance()?.get_do(path)
}

/// See [`ClaService::get_do_inst_container`].
pub fn get_do_inst_container(path: &str) -> Result<Arc<InstContainer>> {
    instance()?.get_do_inst_container(path)
}

fn not_initialized() -> AdapterError {
    AdapterError::InvalidState("the process-wide service is not initialized".to_owned())
}
