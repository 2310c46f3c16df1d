//! Top-level service owning the registry, the worker thread and the
//! middleware connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{AdapterError, Result};
use crate::object::{DistributedObject, InstContainer};
use crate::registry::DoRegistry;
use crate::transport::{Participant, ParticipantConfig, ParticipantFactory};
use crate::worker::WorkerThreadService;

/// Environment variable naming the middleware participant configuration file.
pub const CONFIG_PATH_ENV_VAR: &str = "SILKIT_CONFIG_PATH";

/// Participant name used when the host does not supply one.
pub const DEFAULT_PARTICIPANT_NAME: &str = "SilAdapter";

const CREATE_PARTICIPANT_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const CREATE_PARTICIPANT_WARN_AFTER: u32 = 5;

struct Connection {
    participant: Arc<dyn Participant>,
    /// `true` when the service created the participant itself and therefore
    /// owns its lifecycle; borrowed participants are left untouched.
    owns_lifecycle: bool,
}

/// Entry point for all adapter functionality: build the object tree while
/// disconnected, then [`connect`](Self::connect) to mirror it with the peer.
pub struct ClaService {
    factory: Box<dyn ParticipantFactory>,
    worker: Arc<WorkerThreadService>,
    registry: Arc<DoRegistry>,
    containers: Mutex<HashMap<String, Arc<InstContainer>>>,
    connection: Mutex<Option<Connection>>,
}

impl ClaService {
    pub fn new(factory: Box<dyn ParticipantFactory>) -> Self {
        let worker = Arc::new(WorkerThreadService::new());
        Self {
            factory,
            registry: Arc::new(DoRegistry::new(Arc::clone(&worker))),
            worker,
            containers: Mutex::new(HashMap::new()),
            connection: Mutex::new(None),
        }
    }

    /// Connects under [`DEFAULT_PARTICIPANT_NAME`].
    pub fn connect(&self) -> Result<()> {
        self.connect_with_name(DEFAULT_PARTICIPANT_NAME)
    }

    /// Creates a participant named `participant_name` and connects every
    /// registered member. Blocks while participant creation is retried.
    pub fn connect_with_name(&self, participant_name: &str) -> Result<()> {
        self.ensure_disconnected()?;
        let config = self.create_participant_config()?;
        let participant = self.create_participant(&config, participant_name);
        self.attach(participant, true)
    }

    /// Connects through a participant owned by the host. The participant's
    /// lifecycle is not started and [`disconnect`](Self::disconnect) will not
    /// tear the participant down.
    pub fn connect_with_participant(&self, participant: Arc<dyn Participant>) -> Result<()> {
        self.attach(participant, false)
    }

    /// Reverses a connect: stops the lifecycle, disconnects every member,
    /// drops the participant and joins the worker thread.
    pub fn disconnect(&self) -> Result<()> {
        let connection = self.connection.lock().take().ok_or_else(|| {
            AdapterError::InvalidState("service is not connected".to_owned())
        })?;

        if connection.owns_lifecycle {
            connection.participant.stop_lifecycle();
        }
        self.registry.disconnect();
        drop(connection);
        self.worker.stop();
        debug!("service disconnected");
        Ok(())
    }

    /// The distributed object registered under `path`, created if absent.
    /// Fails for empty paths and while connected.
    pub fn get_do(&self, path: &str) -> Result<Arc<DistributedObject>> {
        self.registry.get_do(path)
    }

    /// The instance container registered under `path`, created on first use.
    pub fn get_do_inst_container(&self, path: &str) -> Result<Arc<InstContainer>> {
        if path.is_empty() {
            return Err(AdapterError::InvalidUsage(
                "cannot get a DO instance container with an empty path".to_owned(),
            ));
        }
        let mut containers = self.containers.lock();
        let container = containers.entry(path.to_owned()).or_insert_with(|| {
            Arc::new(InstContainer::new(
                path.to_owned(),
                Arc::clone(&self.registry),
            ))
        });
        Ok(Arc::clone(container))
    }

    fn ensure_disconnected(&self) -> Result<()> {
        if self.connection.lock().is_some() {
            return Err(AdapterError::InvalidState(
                "service is already connected".to_owned(),
            ));
        }
        Ok(())
    }

    fn attach(&self, participant: Arc<dyn Participant>, owns_lifecycle: bool) -> Result<()> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(AdapterError::InvalidState(
                "service is already connected".to_owned(),
            ));
        }

        self.registry.connect(&participant);
        if owns_lifecycle {
            participant.start_lifecycle();
        }
        *connection = Some(Connection {
            participant,
            owns_lifecycle,
        });
        debug!("service connected");
        Ok(())
    }

    fn create_participant_config(&self) -> Result<ParticipantConfig> {
        match std::env::var(CONFIG_PATH_ENV_VAR) {
            Ok(path) if !path.is_empty() => {
                self.factory.configuration_from_file(&path).map_err(|err| {
                    let message = format!(
                        "error creating participant configuration from file '{path}': {err}"
                    );
                    error!("{message}");
                    AdapterError::Configuration(message)
                })
            }
            _ => Ok(self.factory.configuration_from_string("")),
        }
    }

    /// Participant creation can fail transiently while the middleware
    /// registry is still starting; retry until it succeeds, warning once.
    fn create_participant(
        &self,
        config: &ParticipantConfig,
        participant_name: &str,
    ) -> Arc<dyn Participant> {
        let mut retries = 0u32;
        let mut was_warned = false;
        loop {
            match self.factory.create_participant(config, participant_name) {
                Ok(participant) => {
                    if was_warned {
                        info!("connected successfully after retrying");
                    }
                    return participant;
                }
                Err(err) => {
                    let used_config = match &config.source_path {
                        Some(path) => format!(
                            "used configuration file set by environment variable {CONFIG_PATH_ENV_VAR}: {path}."
                        ),
                        None => "used the default middleware configuration.".to_owned(),
                    };
                    let message = format!(
                        "couldn't connect because participant creation failed: {err}. {used_config} Retrying..."
                    );
                    retries += 1;
                    if retries == CREATE_PARTICIPANT_WARN_AFTER {
                        warn!("{message}");
                        was_warned = true;
                    } else {
                        debug!("{message}");
                    }
                }
            }
            std::thread::sleep(CREATE_PARTICIPANT_RETRY_INTERVAL);
        }
    }
}

impl Drop for ClaService {
    fn drop(&mut self) {
        self.worker.stop();
    }
}
